//! Module entry lifecycle.
//!
//! An entry moves through `fetching -> registered -> enabled -> resolved`.
//! Apart from `fetching`, the flags only ever turn on. `enable` is the single
//! driver: it can be called any number of times and from anywhere (a `use`
//! request, a dependency edge, a late `define`), and each call advances the
//! entry by at most one step before handing the rest to a spawned task.

use std::sync::Arc;

use futures::future::try_join_all;
use futures::FutureExt;
use tracing::{debug, info, trace, warn};

use modload_analysis::SourceAnalysis;
use modload_types::ModuleExport;

use crate::api::ModuleApi;
use crate::error::{LoadError, LoadResult};
use crate::factory::Factory;
use crate::loader::LoaderInner;
use crate::resolver::{DependencyResolver, Resolution};
use crate::state::{EntryId, FetchRecord};

enum EnableStep {
    Delegate(EntryId),
    Fetch,
    Run,
    Nothing,
}

/// Where an entry's dependency names come from.
enum DependencySource {
    Alias(EntryId),
    Names(Vec<String>),
    Analyze(Arc<str>),
}

impl LoaderInner {
    pub(crate) fn enable(self: &Arc<Self>, id: EntryId) {
        let step = {
            let mut state = self.state.lock();
            let entry = state.entry_mut(id);
            entry.enable_on_define = true;

            if entry.is_settled() {
                EnableStep::Nothing
            } else if let (Some(parent), false) = (entry.parent_entry, entry.registered) {
                // A local sub-module gets its factory from the parent's body.
                EnableStep::Delegate(parent)
            } else if !entry.registered {
                if entry.fetching {
                    EnableStep::Nothing
                } else {
                    entry.fetching = true;
                    state.mark_started(id);
                    EnableStep::Fetch
                }
            } else if entry.fetching || entry.enabled {
                EnableStep::Nothing
            } else {
                entry.enabled = true;
                entry.enable_on_define = false;
                state.mark_started(id);
                EnableStep::Run
            }
        };

        match step {
            EnableStep::Delegate(parent) => self.enable(parent),
            EnableStep::Fetch => {
                tokio::spawn(Arc::clone(self).fetch_and_register(id));
            }
            EnableStep::Run => {
                tokio::spawn(Arc::clone(self).run_entry(id));
            }
            EnableStep::Nothing => {}
        }
    }

    /// Record a factory for an entry and enable it if someone is waiting.
    pub(crate) fn register(
        self: &Arc<Self>,
        id: EntryId,
        factory: Factory,
        analysis: Option<SourceAnalysis>,
    ) {
        let wanted = {
            let mut state = self.state.lock();
            let entry = state.entry_mut(id);
            if entry.enabled || entry.is_settled() {
                warn!(module = %entry.name, "ignoring define for a module that already started");
                return;
            }
            entry.factory = Some(factory);
            if analysis.is_some() {
                entry.analysis = analysis;
            }
            entry.registered = true;
            trace!(module = %entry.name, "registered factory");
            entry.enable_on_define
        };
        if wanted {
            self.enable(id);
        }
    }

    async fn fetch_and_register(self: Arc<Self>, id: EntryId) {
        if let Err(err) = self.try_fetch_and_register(id).await {
            self.reject(id, err);
        }
    }

    async fn try_fetch_and_register(self: &Arc<Self>, id: EntryId) -> LoadResult<()> {
        let info = self.state.lock().entry(id).info();
        let address = self
            .hooks
            .locate(&info)
            .await
            .map_err(|e| LoadError::locate(&info.name, e))?;
        debug!(module = %info.name, address = %address, "located module");

        let (job, owner) = {
            let mut state = self.state.lock();
            state.entry_mut(id).address = Some(address.clone());
            let scope = state.entry(id).owner_scope;
            let existing = state
                .find_fetch(scope, &address)
                .map(|record| (record.job.clone(), record.owner));
            match existing {
                Some(found) => found,
                None => {
                    let job = Arc::clone(self)
                        .fetch_job(id, address.clone())
                        .boxed()
                        .shared();
                    state.scope_mut(scope).fetches.insert(
                        address.clone(),
                        FetchRecord {
                            owner: id,
                            job: job.clone(),
                        },
                    );
                    (job, id)
                }
            }
        };

        job.await?;

        {
            let mut state = self.state.lock();
            if owner != id && !state.entry(id).registered {
                debug!(
                    module = %info.name,
                    owner = %state.entry(owner).name,
                    address = %address,
                    "address already evaluated; aliasing"
                );
                let entry = state.entry_mut(id);
                entry.alias_of = Some(owner);
                entry.factory = Some(Factory::empty());
                entry.registered = true;
            }
            state.entry_mut(id).fetching = false;
        }
        self.enable(id);
        Ok(())
    }

    /// Fetch, translate, analyze and evaluate one address for entry `id`.
    async fn fetch_job(self: Arc<Self>, id: EntryId, address: String) -> LoadResult<()> {
        let info = self.state.lock().entry(id).info();
        let name = info.name.clone();

        info!(module = %name, address = %address, "fetching module");
        let source = self
            .hooks
            .fetch(&info)
            .await
            .map_err(|e| LoadError::fetch(&name, &address, e))?;
        let source = self
            .hooks
            .translate(&info, source)
            .await
            .map_err(|e| LoadError::fetch(&name, &address, e))?;
        self.state.lock().entry_mut(id).source = Some(Arc::from(source.as_str()));

        let analysis = self
            .analyzer
            .analyze(&source, Some(self.config.api_name.as_str()))
            .map_err(|e| LoadError::analysis(&name, e))?;
        debug!(
            module = %name,
            dependencies = ?analysis.dependency_names,
            module_body = analysis.is_module_body,
            "analyzed source"
        );

        let factory = if analysis.is_module_body {
            self.evaluator
                .compile_module(&info, &source)
                .map_err(|e| LoadError::analysis(&name, e))?
        } else {
            // A plain script is defined the moment it has run.
            self.evaluator
                .run_script(&info, &source)
                .map_err(|e| LoadError::factory(&name, e))?;
            Factory::empty()
        };
        self.register(id, factory, Some(analysis));
        Ok(())
    }

    async fn run_entry(self: Arc<Self>, id: EntryId) {
        match self.try_run_entry(id).await {
            Ok(export) => self.finalize(id, export),
            Err(err) => self.reject(id, err),
        }
    }

    async fn try_run_entry(self: &Arc<Self>, id: EntryId) -> LoadResult<ModuleExport> {
        let (name, scope, factory, source) = {
            let state = self.state.lock();
            let entry = state.entry(id);
            let factory = entry.factory.clone().unwrap_or_else(Factory::empty);
            let source = if let Some(owner) = entry.alias_of {
                DependencySource::Alias(owner)
            } else if let Some(analysis) = &entry.analysis {
                DependencySource::Names(analysis.dependency_names.clone())
            } else if let Some(names) = factory.dependencies() {
                DependencySource::Names(names.to_vec())
            } else if let Some(text) = factory.source() {
                DependencySource::Analyze(Arc::from(text))
            } else {
                DependencySource::Names(Vec::new())
            };
            (entry.name.clone(), entry.scope, factory, source)
        };

        let resolvers = match source {
            DependencySource::Alias(owner) => self.wire_alias(id, owner),
            DependencySource::Analyze(text) => {
                let analysis = self
                    .analyzer
                    .analyze(&text, None)
                    .map_err(|e| LoadError::analysis(&name, e))?;
                let names = analysis.dependency_names.clone();
                self.state.lock().entry_mut(id).analysis = Some(analysis);
                self.wire_dependencies(id, &name, names).await?
            }
            DependencySource::Names(names) => self.wire_dependencies(id, &name, names).await?,
        };

        let settled = try_join_all(resolvers.iter().map(|r| r.wait())).await?;
        let forced = settled
            .iter()
            .filter(|r| matches!(r, Resolution::Forced))
            .count();
        debug!(module = %name, dependencies = settled.len(), forced, "dependencies settled");

        let alias_of = self.state.lock().entry(id).alias_of;
        if let Some(owner) = alias_of {
            return Ok(match settled.into_iter().next() {
                Some(Resolution::Resolved(export)) => export,
                _ => self.scope_export_of(owner),
            });
        }

        self.materialize_locals(id);

        let api = ModuleApi::new(Arc::clone(self), scope);
        factory
            .invoke(&api)
            .map_err(|e| LoadError::factory(&name, e))?;

        let deferred = self.state.lock().deferred_producer(id);
        match deferred {
            Some(producer) => {
                let pending = self.state.lock().entry(producer).completion.wait();
                self.enable(producer);
                let export = pending
                    .await
                    .unwrap_or_else(|| Err(LoadError::Abandoned { name: name.clone() }))?;
                self.state.lock().scope_mut(scope).export = export.clone();
                Ok(export)
            }
            None => Ok(self.state.lock().scope(scope).export.clone()),
        }
    }

    /// Normalize `names` and create one resolver handle per dependency.
    async fn wire_dependencies(
        self: &Arc<Self>,
        id: EntryId,
        name: &str,
        names: Vec<String>,
    ) -> LoadResult<Vec<Arc<DependencyResolver>>> {
        let mut normalized: Vec<String> = Vec::with_capacity(names.len());
        for dep in &names {
            let dep = self.normalize(dep, Some(name)).await?;
            if !normalized.contains(&dep) {
                normalized.push(dep);
            }
        }

        let mut state = self.state.lock();
        let scope = state.entry(id).scope;
        state.mark_registered(id);
        let resolvers: Vec<_> = normalized
            .iter()
            .map(|dep| {
                let target = Arc::clone(self).resolve_normalized(scope, dep.clone());
                DependencyResolver::spawn(dep.clone(), target)
            })
            .collect();
        let entry = state.entry_mut(id);
        entry.dependency_names = Some(normalized);
        for resolver in &resolvers {
            entry
                .resolvers
                .insert(resolver.name().to_string(), Arc::clone(resolver));
        }
        Ok(resolvers)
    }

    /// An alias waits on the entry that owns its address, not on a pipeline.
    fn wire_alias(self: &Arc<Self>, id: EntryId, owner: EntryId) -> Vec<Arc<DependencyResolver>> {
        let mut state = self.state.lock();
        state.mark_registered(id);
        let owner_entry = state.entry(owner);
        let owner_name = owner_entry.name.clone();
        let pending = owner_entry.completion.wait();
        let abandoned = owner_name.clone();
        let resolver = DependencyResolver::spawn(owner_name.clone(), async move {
            pending
                .await
                .unwrap_or(Err(LoadError::Abandoned { name: abandoned }))
        });
        let entry = state.entry_mut(id);
        entry.dependency_names = Some(vec![owner_name.clone()]);
        entry.resolvers.insert(owner_name, Arc::clone(&resolver));
        vec![resolver]
    }

    /// Create entries for the sub-modules the body declares, parented to `id`.
    fn materialize_locals(&self, id: EntryId) {
        let mut state = self.state.lock();
        let entry = state.entry(id);
        let scope = entry.scope;
        let locals = entry
            .analysis
            .as_ref()
            .map(|a| a.local_definition_names.clone())
            .unwrap_or_default();
        for local in locals {
            if !state.scope(scope).entries.contains_key(&local) {
                trace!(module = %state.entry(id).name, local = %local, "declared local module");
                state.create_entry(scope, &local, Some(id));
            }
        }
    }

    pub(crate) fn scope_export_of(&self, id: EntryId) -> ModuleExport {
        let state = self.state.lock();
        let scope = state.entry(id).scope;
        state.scope(scope).export.clone()
    }

    pub(crate) fn finalize(&self, id: EntryId, export: ModuleExport) {
        let mut state = self.state.lock();
        let entry = state.entry(id);
        if entry.is_settled() {
            trace!(module = %entry.name, "completion already settled; dropping result");
            return;
        }
        let name = entry.name.clone();
        let owner_scope = entry.owner_scope;
        let completion = Arc::clone(&entry.completion);

        state
            .scope_mut(owner_scope)
            .modules
            .insert(name.clone(), export.clone());
        state.entry_mut(id).resolved = true;
        completion.settle(Ok(export.clone()));
        info!(module = %name, "module resolved");

        for child in state.dormant_children(id) {
            state.entry(child).completion.settle(Ok(export.clone()));
        }
    }

    pub(crate) fn reject(&self, id: EntryId, err: LoadError) {
        let mut state = self.state.lock();
        state.mark_registered(id);
        let entry = state.entry(id);
        if entry.completion.settle(Err(err.clone())) {
            warn!(module = %entry.name, error = %err, "module rejected");
        }
        for child in state.dormant_children(id) {
            state.entry(child).completion.settle(Err(err.clone()));
        }
    }
}
