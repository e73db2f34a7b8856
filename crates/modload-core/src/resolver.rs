//! Dependency resolver handles.
//!
//! An entry never waits on a dependency's pipeline directly. It waits on a
//! [`DependencyResolver`] that normally settles when the pipeline does, but can
//! also be forced to settle early by the watchdog to break a cycle. Forcing only
//! affects this one edge: the dependency's own completion is untouched and still
//! reaches every other consumer with the real value.

use std::future::Future;
use std::sync::Arc;

use tracing::trace;

use crate::error::{LoadError, LoadResult};
use crate::settle::Settle;
use modload_types::ModuleExport;

/// How a resolver handle settled.
#[derive(Debug, Clone)]
pub(crate) enum Resolution {
    /// The dependency pipeline finished with this export.
    Resolved(ModuleExport),
    /// The watchdog settled the edge without a value.
    Forced,
}

pub(crate) struct DependencyResolver {
    name: String,
    settled: Settle<Result<Resolution, LoadError>>,
}

impl DependencyResolver {
    /// Create a handle that follows `target` and spawn the task that forwards it.
    pub(crate) fn spawn<F>(name: String, target: F) -> Arc<Self>
    where
        F: Future<Output = LoadResult<ModuleExport>> + Send + 'static,
    {
        let handle = Arc::new(Self {
            name,
            settled: Settle::new(),
        });
        let forward = Arc::clone(&handle);
        tokio::spawn(async move {
            let outcome = target.await.map(Resolution::Resolved);
            if !forward.settled.settle(outcome) {
                trace!(dependency = %forward.name, "late settlement after forced resolution");
            }
        });
        handle
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Force the handle to settle now, without a value. No-op if already settled.
    pub(crate) fn force(&self) -> bool {
        self.settled.settle(Ok(Resolution::Forced))
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.settled.is_settled()
    }

    pub(crate) fn wait(&self) -> impl Future<Output = LoadResult<Resolution>> + Send + 'static {
        let pending = self.settled.wait();
        let name = self.name.clone();
        async move {
            pending
                .await
                .unwrap_or(Err(LoadError::Abandoned { name }))
        }
    }
}
