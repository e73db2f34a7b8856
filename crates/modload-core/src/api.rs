//! Public surface of a loader scope.
//!
//! Every scope, root or private, is addressed through a [`ModuleApi`]. External
//! code gets the root one from [`Loader::api`](crate::Loader::api); a module
//! factory receives the one for its own private scope.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::task::JoinHandle;
use tracing::{debug, trace};

use modload_types::ModuleExport;

use crate::error::{ExportStyle, LoadError, LoadResult};
use crate::factory::Factory;
use crate::loader::LoaderInner;
use crate::state::{ScopeId, ROOT_SCOPE};

/// Reserved local name of the deferred export producer.
pub const EXPORT_DEFINE_NAME: &str = "@@export";

#[derive(Clone)]
pub struct ModuleApi {
    inner: Arc<LoaderInner>,
    scope: ScopeId,
}

impl std::fmt::Debug for ModuleApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleApi")
            .field("loader", &self.inner.id)
            .field("scope", &self.name().unwrap_or_else(|| "<top>".to_string()))
            .finish()
    }
}

impl ModuleApi {
    pub(crate) fn new(inner: Arc<LoaderInner>, scope: ScopeId) -> Self {
        Self { inner, scope }
    }

    /// Name of the module owning this scope; `None` for the root.
    pub fn name(&self) -> Option<String> {
        self.inner.state.lock().scope(self.scope).referer.clone()
    }

    /// The root scope of this loader.
    pub fn top(&self) -> ModuleApi {
        ModuleApi::new(Arc::clone(&self.inner), ROOT_SCOPE)
    }

    fn normalize_now(&self, name: &str) -> LoadResult<String> {
        let referer = self.name();
        self.inner.normalize_now(name, referer.as_deref())
    }

    /// Register `factory` for `name` in this scope.
    ///
    /// If something is already waiting on `name`, the module starts right away.
    pub fn define(&self, name: &str, factory: Factory) -> LoadResult<()> {
        let name = self.normalize_now(name)?;
        let id = self.inner.state.lock().get_or_create_local(self.scope, &name);
        debug!(module = %name, "define");
        self.inner.register(id, factory, None);
        Ok(())
    }

    /// Register `factory` for the module that owns this scope.
    pub fn define_anonymous(&self, factory: Factory) -> LoadResult<()> {
        let owner = self
            .inner
            .state
            .lock()
            .scope(self.scope)
            .owner
            .ok_or(LoadError::NoOwningModule)?;
        self.inner.register(owner, factory, None);
        Ok(())
    }

    /// Produce this scope's export from the result of `factory`, run as a
    /// reserved local module once the current body returns.
    pub fn export_define(&self, factory: Factory) -> LoadResult<()> {
        {
            let mut state = self.inner.state.lock();
            let scope = state.scope_mut(self.scope);
            if scope.export_style == Some(ExportStyle::Direct) {
                return Err(LoadError::ExportConflict {
                    scope: scope.display_name(),
                    existing: ExportStyle::Direct,
                });
            }
            scope.export_style = Some(ExportStyle::Deferred);
        }
        let id = self
            .inner
            .state
            .lock()
            .get_or_create_local(self.scope, EXPORT_DEFINE_NAME);
        self.inner.register(id, factory, None);
        Ok(())
    }

    /// Set this scope's export directly. The last write wins.
    pub fn set_export(&self, value: impl Into<ModuleExport>) -> LoadResult<()> {
        let mut state = self.inner.state.lock();
        let scope = state.scope_mut(self.scope);
        if scope.export_style == Some(ExportStyle::Deferred) {
            return Err(LoadError::ExportConflict {
                scope: scope.display_name(),
                existing: ExportStyle::Deferred,
            });
        }
        scope.export_style = Some(ExportStyle::Direct);
        scope.export = value.into();
        Ok(())
    }

    /// This scope's current export, `{}` until something sets it.
    pub fn export(&self) -> ModuleExport {
        self.inner.state.lock().scope(self.scope).export.clone()
    }

    /// Current export of the named module, resolved or not.
    ///
    /// A name sharing another entry's address reports that entry's export.
    pub fn module(&self, name: &str) -> LoadResult<ModuleExport> {
        let name = self.normalize_now(name)?;
        let state = self.inner.state.lock();
        if let Some(export) = state.find_module(self.scope, &name) {
            return Ok(export);
        }
        match state.find_entry(self.scope, &name) {
            Some(id) => {
                let id = state.entry(id).alias_of.unwrap_or(id);
                Ok(state.scope(state.entry(id).scope).export.clone())
            }
            None => Err(LoadError::UnknownModule { name }),
        }
    }

    /// Whether `name` already has a cached export visible from this scope.
    pub fn has(&self, name: &str) -> LoadResult<bool> {
        let name = self.normalize_now(name)?;
        Ok(self
            .inner
            .state
            .lock()
            .find_module(self.scope, &name)
            .is_some())
    }

    /// Forget a resolved module so the next request loads it again.
    ///
    /// Only the name, cached export and fetch record are dropped. The old entry
    /// and its private scope stay in the loader's arena, so every delete and
    /// reload cycle grows the loader by one entry and one scope
    /// ([`LoaderStats::entries`](crate::LoaderStats::entries) shows it).
    pub fn delete(&self, name: &str) -> LoadResult<()> {
        let name = self.normalize_now(name)?;
        let mut state = self.inner.state.lock();
        let cached = state
            .find_module_scope(self.scope, &name)
            .ok_or_else(|| LoadError::UnknownModule { name: name.clone() })?;
        state.scope_mut(cached).modules.remove(&name);

        if let Some(id) = state.find_entry(self.scope, &name) {
            let entry = state.entry(id);
            let owner_scope = entry.owner_scope;
            let address = entry.address.clone();
            state.scope_mut(owner_scope).entries.remove(&name);
            if let Some(address) = address {
                let holder = state
                    .chain(owner_scope)
                    .find(|s| state.scope(*s).fetches.contains_key(&address));
                if let Some(holder) = holder {
                    state.scope_mut(holder).fetches.remove(&address);
                }
            }
        }
        debug!(module = %name, "deleted module");
        Ok(())
    }

    /// Load `names` and deliver their exports in request order.
    ///
    /// The same name twice in one request is rejected before anything is
    /// fetched. Different spellings that normalize to one module share one load.
    pub fn use_modules(&self, names: &[&str]) -> LoadResult<LoadRequest> {
        for (i, name) in names.iter().enumerate() {
            if names[..i].contains(name) {
                return Err(LoadError::DuplicateRequest {
                    name: name.to_string(),
                });
            }
        }
        let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        trace!(modules = ?names, "use");
        let label = names.join(", ");
        let handle = tokio::spawn(Arc::clone(&self.inner).load_top_level(self.scope, names));
        Ok(LoadRequest { label, handle })
    }

    /// Load `names` and pass their exports to `callback`. Failures go to the
    /// loader's unhandled-error hook.
    pub fn use_with<F>(&self, names: &[&str], callback: F) -> LoadResult<JoinHandle<()>>
    where
        F: FnOnce(&[ModuleExport]) + Send + 'static,
    {
        let hooks = Arc::clone(&self.inner.hooks);
        self.use_with_errback(names, callback, move |err| hooks.report_unhandled(&err))
    }

    pub fn use_with_errback<F, E>(
        &self,
        names: &[&str],
        callback: F,
        errback: E,
    ) -> LoadResult<JoinHandle<()>>
    where
        F: FnOnce(&[ModuleExport]) + Send + 'static,
        E: FnOnce(LoadError) + Send + 'static,
    {
        let request = self.use_modules(names)?;
        Ok(tokio::spawn(async move {
            match request.await {
                Ok(exports) => callback(&exports),
                Err(err) => errback(err),
            }
        }))
    }

    /// Load a single module.
    pub async fn import(&self, name: &str) -> LoadResult<ModuleExport> {
        self.use_modules(&[name])?
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| LoadError::UnknownModule {
                name: name.to_string(),
            })
    }
}

/// A pending `use` request.
#[must_use = "dropping a load request detaches it"]
pub struct LoadRequest {
    label: String,
    handle: JoinHandle<LoadResult<Vec<ModuleExport>>>,
}

impl Future for LoadRequest {
    type Output = LoadResult<Vec<ModuleExport>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.handle).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(LoadError::Abandoned {
                name: self.label.clone(),
            })),
            Poll::Pending => Poll::Pending,
        }
    }
}
