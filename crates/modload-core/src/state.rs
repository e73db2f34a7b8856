//! Arena of loader scopes and module entries.
//!
//! Scopes and entries reference each other in both directions (a scope is
//! owned by an entry, an entry lives in a scope, a local entry points at its
//! parent entry), so both are stored in flat vectors and linked by index.
//! Records are never removed; `delete` only unbinds names.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{BoxFuture, Shared};
use serde_json::Map;
use tokio::time::Instant;

use modload_analysis::SourceAnalysis;
use modload_types::ModuleExport;

use crate::api::EXPORT_DEFINE_NAME;
use crate::error::{ExportStyle, LoadResult};
use crate::factory::Factory;
use crate::hooks::EntryInfo;
use crate::resolver::DependencyResolver;
use crate::settle::Settle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct ScopeId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct EntryId(usize);

pub(crate) const ROOT_SCOPE: ScopeId = ScopeId(0);

pub(crate) type FetchJob = Shared<BoxFuture<'static, LoadResult<()>>>;

/// In-flight or completed fetch of one address.
pub(crate) struct FetchRecord {
    /// The entry the fetched body was evaluated for.
    pub(crate) owner: EntryId,
    pub(crate) job: FetchJob,
}

/// An outstanding top-level `use` request.
pub(crate) struct PendingLoad {
    pub(crate) id: u64,
    pub(crate) names: Vec<String>,
}

pub(crate) struct ScopeRecord {
    pub(crate) parent: Option<ScopeId>,
    /// Entry whose private scope this is. `None` for the root.
    pub(crate) owner: Option<EntryId>,
    /// Name used as referer when normalizing from this scope.
    pub(crate) referer: Option<String>,
    pub(crate) entries: HashMap<String, EntryId>,
    pub(crate) modules: HashMap<String, ModuleExport>,
    pub(crate) fetches: HashMap<String, FetchRecord>,
    /// Entries started here whose dependency set is not known yet.
    pub(crate) registering: usize,
    pub(crate) pending_loads: Vec<PendingLoad>,
    pub(crate) export: ModuleExport,
    pub(crate) export_style: Option<ExportStyle>,
    pub(crate) watchdog_armed: bool,
}

impl ScopeRecord {
    fn new(parent: Option<ScopeId>, owner: Option<EntryId>, referer: Option<String>) -> Self {
        Self {
            parent,
            owner,
            referer,
            entries: HashMap::new(),
            modules: HashMap::new(),
            fetches: HashMap::new(),
            registering: 0,
            pending_loads: Vec::new(),
            export: ModuleExport::empty(),
            export_style: None,
            watchdog_armed: false,
        }
    }

    pub(crate) fn display_name(&self) -> String {
        self.referer.clone().unwrap_or_else(|| "<top>".to_string())
    }
}

pub(crate) struct EntryRecord {
    pub(crate) name: String,
    pub(crate) metadata: Map<String, serde_json::Value>,
    pub(crate) address: Option<String>,
    pub(crate) source: Option<Arc<str>>,
    pub(crate) analysis: Option<SourceAnalysis>,
    /// Normalized dependency names, set once the dependency set is known.
    pub(crate) dependency_names: Option<Vec<String>>,
    pub(crate) factory: Option<Factory>,
    /// Set when this entry located to an address another entry already owns.
    pub(crate) alias_of: Option<EntryId>,
    pub(crate) registered: bool,
    pub(crate) fetching: bool,
    pub(crate) enabled: bool,
    pub(crate) resolved: bool,
    pub(crate) enable_on_define: bool,
    /// Counted in the owning scope's `registering` total.
    pub(crate) registering: bool,
    /// Set for sub-modules declared inside another entry's body.
    pub(crate) parent_entry: Option<EntryId>,
    pub(crate) resolvers: HashMap<String, Arc<DependencyResolver>>,
    pub(crate) completion: Arc<Settle<LoadResult<ModuleExport>>>,
    /// Scope whose entry table holds this entry.
    pub(crate) owner_scope: ScopeId,
    /// This entry's private scope.
    pub(crate) scope: ScopeId,
    pub(crate) started: Option<Instant>,
}

impl EntryRecord {
    pub(crate) fn is_settled(&self) -> bool {
        self.completion.is_settled()
    }

    pub(crate) fn info(&self) -> EntryInfo {
        EntryInfo {
            name: self.name.clone(),
            metadata: self.metadata.clone(),
            address: self.address.clone(),
        }
    }
}

pub(crate) struct LoaderState {
    scopes: Vec<ScopeRecord>,
    entries: Vec<EntryRecord>,
    next_load_id: u64,
}

impl LoaderState {
    pub(crate) fn new() -> Self {
        Self {
            scopes: vec![ScopeRecord::new(None, None, None)],
            entries: Vec::new(),
            next_load_id: 0,
        }
    }

    pub(crate) fn scope(&self, id: ScopeId) -> &ScopeRecord {
        &self.scopes[id.0]
    }

    pub(crate) fn scope_mut(&mut self, id: ScopeId) -> &mut ScopeRecord {
        &mut self.scopes[id.0]
    }

    pub(crate) fn entry(&self, id: EntryId) -> &EntryRecord {
        &self.entries[id.0]
    }

    pub(crate) fn entry_mut(&mut self, id: EntryId) -> &mut EntryRecord {
        &mut self.entries[id.0]
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = (EntryId, &EntryRecord)> {
        self.entries.iter().enumerate().map(|(i, e)| (EntryId(i), e))
    }

    pub(crate) fn scope_count(&self) -> usize {
        self.scopes.len()
    }

    pub(crate) fn scopes(&self) -> impl Iterator<Item = &ScopeRecord> {
        self.scopes.iter()
    }

    /// `from`, then each ancestor up to the root.
    pub(crate) fn chain(&self, from: ScopeId) -> impl Iterator<Item = ScopeId> + '_ {
        std::iter::successors(Some(from), move |id| self.scope(*id).parent)
    }

    /// Create an entry in `owner_scope`, together with its private scope.
    pub(crate) fn create_entry(
        &mut self,
        owner_scope: ScopeId,
        name: &str,
        parent_entry: Option<EntryId>,
    ) -> EntryId {
        let id = EntryId(self.entries.len());
        let scope = ScopeId(self.scopes.len());
        self.scopes.push(ScopeRecord::new(
            Some(owner_scope),
            Some(id),
            Some(name.to_string()),
        ));
        self.entries.push(EntryRecord {
            name: name.to_string(),
            metadata: Map::new(),
            address: None,
            source: None,
            analysis: None,
            dependency_names: None,
            factory: None,
            alias_of: None,
            registered: false,
            fetching: false,
            enabled: false,
            resolved: false,
            enable_on_define: false,
            registering: false,
            parent_entry,
            resolvers: HashMap::new(),
            completion: Arc::new(Settle::new()),
            owner_scope,
            scope,
            started: None,
        });
        self.scope_mut(owner_scope)
            .entries
            .insert(name.to_string(), id);
        id
    }

    /// Entry bound to `name` in `scope` itself, created there if missing.
    pub(crate) fn get_or_create_local(&mut self, scope: ScopeId, name: &str) -> EntryId {
        match self.scope(scope).entries.get(name) {
            Some(id) => *id,
            None => self.create_entry(scope, name, None),
        }
    }

    /// Entry bound to `name` in `from` or any ancestor.
    pub(crate) fn find_entry(&self, from: ScopeId, name: &str) -> Option<EntryId> {
        self.chain(from)
            .find_map(|id| self.scope(id).entries.get(name).copied())
    }

    /// Entry bound to `name` up the chain, else a new one at the root.
    pub(crate) fn find_or_create_entry(&mut self, from: ScopeId, name: &str) -> EntryId {
        match self.find_entry(from, name) {
            Some(id) => id,
            None => self.create_entry(ROOT_SCOPE, name, None),
        }
    }

    /// Cached export for `name` in `from` or any ancestor.
    pub(crate) fn find_module(&self, from: ScopeId, name: &str) -> Option<ModuleExport> {
        self.chain(from)
            .find_map(|id| self.scope(id).modules.get(name).cloned())
    }

    /// Scope in the chain that caches an export for `name`.
    pub(crate) fn find_module_scope(&self, from: ScopeId, name: &str) -> Option<ScopeId> {
        self.chain(from)
            .find(|id| self.scope(*id).modules.contains_key(name))
    }

    /// Fetch record for `address` in `from` or any ancestor.
    pub(crate) fn find_fetch(&self, from: ScopeId, address: &str) -> Option<&FetchRecord> {
        self.chain(from)
            .find_map(|id| self.scope(id).fetches.get(address))
    }

    pub(crate) fn registering_total(&self) -> usize {
        self.scopes.iter().map(|s| s.registering).sum()
    }

    /// Mark an entry as started: timestamp it and count it as registering.
    pub(crate) fn mark_started(&mut self, id: EntryId) {
        let entry = self.entry_mut(id);
        if entry.started.is_some() {
            return;
        }
        entry.started = Some(Instant::now());
        entry.registering = true;
        let owner = entry.owner_scope;
        self.scope_mut(owner).registering += 1;
    }

    /// Stop counting an entry as registering.
    pub(crate) fn mark_registered(&mut self, id: EntryId) {
        let entry = self.entry_mut(id);
        if !entry.registering {
            return;
        }
        entry.registering = false;
        let owner = entry.owner_scope;
        let scope = self.scope_mut(owner);
        scope.registering = scope.registering.saturating_sub(1);
    }

    /// Dependency edges of an entry as `(name, target entry)` pairs.
    pub(crate) fn dependency_targets(&self, id: EntryId) -> Vec<(String, Option<EntryId>)> {
        let entry = self.entry(id);
        if let Some(owner) = entry.alias_of {
            return vec![(self.entry(owner).name.clone(), Some(owner))];
        }
        entry
            .dependency_names
            .iter()
            .flatten()
            .map(|name| (name.clone(), self.find_entry(entry.scope, name)))
            .collect()
    }

    /// Export producer of an entry whose body chose a deferred export.
    pub(crate) fn deferred_producer(&self, id: EntryId) -> Option<EntryId> {
        let scope = self.scope(self.entry(id).scope);
        match scope.export_style {
            Some(ExportStyle::Deferred) => scope.entries.get(EXPORT_DEFINE_NAME).copied(),
            _ => None,
        }
    }

    /// Local sub-module entries of `parent` that were declared but never defined.
    pub(crate) fn dormant_children(&self, parent: EntryId) -> Vec<EntryId> {
        let scope = self.entry(parent).scope;
        self.scope(scope)
            .entries
            .values()
            .copied()
            .filter(|id| {
                let child = self.entry(*id);
                child.parent_entry == Some(parent) && !child.registered && !child.is_settled()
            })
            .collect()
    }

    pub(crate) fn push_load(&mut self, scope: ScopeId, names: Vec<String>) -> u64 {
        self.next_load_id += 1;
        let id = self.next_load_id;
        self.scope_mut(scope)
            .pending_loads
            .push(PendingLoad { id, names });
        id
    }

    pub(crate) fn remove_load(&mut self, scope: ScopeId, load_id: u64) {
        self.scope_mut(scope)
            .pending_loads
            .retain(|load| load.id != load_id);
    }
}
