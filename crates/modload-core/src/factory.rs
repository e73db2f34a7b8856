//! Module factories.

use std::fmt;
use std::sync::Arc;

use crate::api::ModuleApi;

pub type FactoryFn = dyn Fn(&ModuleApi) -> anyhow::Result<()> + Send + Sync;

/// The callable a module registers to produce its export.
///
/// A factory runs once, after every dependency it declares has settled, with
/// the [`ModuleApi`] of the module's private scope. It produces its export by
/// calling [`ModuleApi::set_export`] or [`ModuleApi::export_define`].
///
/// Dependencies are discovered in this order:
/// 1. names given with [`Factory::with_dependencies`],
/// 2. analysis of the text given with [`Factory::with_source`],
/// 3. none.
///
/// Factories produced by the fetch path are analyzed at fetch time instead.
#[derive(Clone)]
pub struct Factory {
    body: Arc<FactoryFn>,
    dependencies: Option<Vec<String>>,
    source: Option<Arc<str>>,
}

impl Factory {
    pub fn new<F>(body: F) -> Self
    where
        F: Fn(&ModuleApi) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            body: Arc::new(body),
            dependencies: None,
            source: None,
        }
    }

    /// A factory that does nothing; used for plain scripts.
    pub fn empty() -> Self {
        Self::new(|_| Ok(())).with_dependencies(Vec::<String>::new())
    }

    pub fn with_dependencies<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_source(mut self, source: impl Into<Arc<str>>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn dependencies(&self) -> Option<&[String]> {
        self.dependencies.as_deref()
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub(crate) fn invoke(&self, api: &ModuleApi) -> anyhow::Result<()> {
        (self.body)(api)
    }
}

impl fmt::Debug for Factory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Factory")
            .field("dependencies", &self.dependencies)
            .field("has_source", &self.source.is_some())
            .finish()
    }
}
