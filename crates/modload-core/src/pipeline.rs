//! Name to export resolution.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{debug, trace};

use modload_types::ModuleExport;

use crate::error::{LoadError, LoadResult};
use crate::loader::LoaderInner;
use crate::state::ScopeId;

impl LoaderInner {
    pub(crate) async fn normalize(&self, name: &str, referer: Option<&str>) -> LoadResult<String> {
        self.hooks
            .normalize(name, referer)
            .resolve()
            .await
            .map_err(|e| LoadError::normalize(name, Some(e)))
    }

    /// Normalize without waiting; a pending hook result is an error.
    pub(crate) fn normalize_now(&self, name: &str, referer: Option<&str>) -> LoadResult<String> {
        match self.hooks.normalize(name, referer).now() {
            Some(result) => result.map_err(|e| LoadError::normalize(name, Some(e))),
            None => Err(LoadError::normalize(name, None)),
        }
    }

    /// Resolve an already normalized name as seen from scope `from`.
    pub(crate) async fn resolve_normalized(
        self: Arc<Self>,
        from: ScopeId,
        name: String,
    ) -> LoadResult<ModuleExport> {
        let (id, pending) = {
            let mut state = self.state.lock();
            if let Some(export) = state.find_module(from, &name) {
                trace!(module = %name, "module cache hit");
                return Ok(export);
            }
            let id = state.find_or_create_entry(from, &name);
            (id, state.entry(id).completion.wait())
        };
        self.enable(id);
        pending
            .await
            .unwrap_or(Err(LoadError::Abandoned { name }))
    }

    /// Run one top-level request from `scope` and return exports in request order.
    pub(crate) async fn load_top_level(
        self: Arc<Self>,
        scope: ScopeId,
        names: Vec<String>,
    ) -> LoadResult<Vec<ModuleExport>> {
        let referer = self.state.lock().scope(scope).referer.clone();
        let mut normalized = Vec::with_capacity(names.len());
        for name in &names {
            normalized.push(self.normalize(name, referer.as_deref()).await?);
        }

        let mut unique: Vec<String> = Vec::new();
        for name in &normalized {
            if !unique.contains(name) {
                unique.push(name.clone());
            }
        }

        let load_id = self.state.lock().push_load(scope, unique.clone());
        debug!(load = load_id, modules = ?unique, "top-level load started");
        self.arm_watchdog(scope);

        let result = try_join_all(
            unique
                .iter()
                .map(|name| Arc::clone(&self).resolve_normalized(scope, name.clone())),
        )
        .await;
        self.state.lock().remove_load(scope, load_id);

        let exports = result?;
        let by_name: HashMap<&str, &ModuleExport> = unique
            .iter()
            .map(String::as_str)
            .zip(exports.iter())
            .collect();
        debug!(load = load_id, "top-level load finished");
        Ok(normalized
            .iter()
            .filter_map(|name| by_name.get(name.as_str()).map(|export| (*export).clone()))
            .collect())
    }
}
