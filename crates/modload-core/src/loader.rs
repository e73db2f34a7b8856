//! Root loader and its builder.
//!
//! A [`Loader`] owns one arena of scopes and entries. Its root scope is the
//! top of every scope chain created while loading; [`Loader::api`] hands out
//! the public surface for that root scope.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use modload_core::{Loader, MemoryHooks, NativeEvaluator};
//!
//! let hooks = Arc::new(MemoryHooks::new().with_module("util", "module.export = {};"));
//! let loader = Loader::builder()
//!     .hooks(hooks)
//!     .evaluator(NativeEvaluator::new().with_body("util", |_| Ok(())))
//!     .build()?;
//!
//! let exports = loader.api().use_modules(&["util"])?.await?;
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use modload_analysis::{ScanAnalyzer, SourceAnalyzer};

use crate::api::ModuleApi;
use crate::config::LoaderConfig;
use crate::evaluator::{Evaluator, NativeEvaluator};
use crate::hooks::LoaderHooks;
use crate::registry;
use crate::state::{LoaderState, ROOT_SCOPE};

static NEXT_LOADER_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) struct LoaderInner {
    pub(crate) id: u64,
    pub(crate) state: Mutex<LoaderState>,
    pub(crate) hooks: Arc<dyn LoaderHooks>,
    pub(crate) evaluator: Arc<dyn Evaluator>,
    pub(crate) analyzer: Arc<dyn SourceAnalyzer>,
    pub(crate) config: LoaderConfig,
}

impl LoaderInner {
    pub(crate) fn stats(&self) -> LoaderStats {
        let state = self.state.lock();
        let mut stats = LoaderStats {
            loader_id: self.id,
            scopes: state.scope_count(),
            ..Default::default()
        };
        for (_, entry) in state.entries() {
            stats.entries += 1;
            if entry.resolved {
                stats.resolved += 1;
            } else if matches!(entry.completion.peek(), Some(Err(_))) {
                stats.rejected += 1;
            }
            stats.source_bytes += entry.source.as_ref().map_or(0, |s| s.len());
        }
        for scope in state.scopes() {
            stats.fetches += scope.fetches.len();
            stats.cached_modules += scope.modules.len();
            stats.pending_loads += scope.pending_loads.len();
        }
        stats
    }
}

/// Point-in-time counters for one loader.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoaderStats {
    pub loader_id: u64,
    pub scopes: usize,
    pub entries: usize,
    pub resolved: usize,
    pub rejected: usize,
    pub fetches: usize,
    pub cached_modules: usize,
    pub pending_loads: usize,
    /// Total size of fetched source text.
    pub source_bytes: usize,
}

#[derive(Clone)]
pub struct Loader {
    inner: Arc<LoaderInner>,
}

impl Loader {
    pub fn builder() -> LoaderBuilder {
        LoaderBuilder::default()
    }

    /// Loader with default config and analyzer.
    pub fn new<H, E>(hooks: H, evaluator: E) -> Self
    where
        H: LoaderHooks + 'static,
        E: Evaluator + 'static,
    {
        let config = LoaderConfig::default();
        let analyzer = Arc::new(ScanAnalyzer::new(config.api_name.clone()));
        Self::from_parts(Arc::new(hooks), Arc::new(evaluator), analyzer, config)
    }

    fn from_parts(
        hooks: Arc<dyn LoaderHooks>,
        evaluator: Arc<dyn Evaluator>,
        analyzer: Arc<dyn SourceAnalyzer>,
        config: LoaderConfig,
    ) -> Self {
        let inner = Arc::new(LoaderInner {
            id: NEXT_LOADER_ID.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(LoaderState::new()),
            hooks,
            evaluator,
            analyzer,
            config,
        });
        debug!(loader = inner.id, "created loader");
        registry::register(&inner);
        Self { inner }
    }

    /// Public surface of the root scope.
    pub fn api(&self) -> ModuleApi {
        ModuleApi::new(Arc::clone(&self.inner), ROOT_SCOPE)
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> LoaderStats {
        self.inner.stats()
    }
}

#[derive(Default)]
pub struct LoaderBuilder {
    hooks: Option<Arc<dyn LoaderHooks>>,
    evaluator: Option<Arc<dyn Evaluator>>,
    analyzer: Option<Arc<dyn SourceAnalyzer>>,
    config: Option<LoaderConfig>,
}

impl LoaderBuilder {
    pub fn hooks<H: LoaderHooks + 'static>(mut self, hooks: Arc<H>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn evaluator<E: Evaluator + 'static>(mut self, evaluator: E) -> Self {
        self.evaluator = Some(Arc::new(evaluator));
        self
    }

    pub fn analyzer<A: SourceAnalyzer + 'static>(mut self, analyzer: A) -> Self {
        self.analyzer = Some(Arc::new(analyzer));
        self
    }

    pub fn config(mut self, config: LoaderConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn build(self) -> Result<Loader> {
        let hooks = self
            .hooks
            .ok_or_else(|| anyhow!("loader hooks are required (at least a fetch hook)"))?;
        let config = self.config.unwrap_or_default();
        let evaluator = self
            .evaluator
            .unwrap_or_else(|| Arc::new(NativeEvaluator::new()));
        let analyzer = self
            .analyzer
            .unwrap_or_else(|| Arc::new(ScanAnalyzer::new(config.api_name.clone())));
        Ok(Loader::from_parts(hooks, evaluator, analyzer, config))
    }
}
