//! Loader hooks.
//!
//! A concrete loader configuration decides how names are normalized, where a
//! module lives, how its text is read and whether the text is transformed
//! before analysis. The engine only calls these hooks; it never reads storage
//! itself.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, error};

use crate::error::LoadError;

/// Snapshot of an entry handed to hooks.
#[derive(Debug, Clone, Default)]
pub struct EntryInfo {
    pub name: String,
    pub metadata: Map<String, Value>,
    /// Set once `locate` has finished.
    pub address: Option<String>,
}

impl EntryInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// The located address, or the name if locate has not run.
    pub fn address_or_name(&self) -> &str {
        self.address.as_deref().unwrap_or(&self.name)
    }
}

/// A hook result that is either available now or still pending.
///
/// Call sites that must answer synchronously (`has`, `delete`, `module`) reject
/// a `Pending` value instead of waiting for it.
pub enum Deferred<T> {
    Ready(Result<T>),
    Pending(BoxFuture<'static, Result<T>>),
}

impl<T> Deferred<T> {
    pub fn ready(value: T) -> Self {
        Deferred::Ready(Ok(value))
    }

    pub fn pending<F>(future: F) -> Self
    where
        F: std::future::Future<Output = Result<T>> + Send + 'static,
    {
        Deferred::Pending(Box::pin(future))
    }

    pub async fn resolve(self) -> Result<T> {
        match self {
            Deferred::Ready(result) => result,
            Deferred::Pending(future) => future.await,
        }
    }

    /// The value if it is available without waiting.
    pub fn now(self) -> Option<Result<T>> {
        match self {
            Deferred::Ready(result) => Some(result),
            Deferred::Pending(_) => None,
        }
    }
}

#[async_trait]
pub trait LoaderHooks: Send + Sync {
    /// Canonicalize `name`, optionally relative to the module requesting it.
    fn normalize(&self, name: &str, _referer: Option<&str>) -> Deferred<String> {
        Deferred::ready(name.to_string())
    }

    /// Map an entry to the address its source is fetched from.
    async fn locate(&self, entry: &EntryInfo) -> Result<String> {
        Ok(format!("{}.js", entry.name))
    }

    /// Read the raw source text at `entry.address`.
    async fn fetch(&self, entry: &EntryInfo) -> Result<String>;

    /// Transform fetched source before analysis.
    async fn translate(&self, _entry: &EntryInfo, source: String) -> Result<String> {
        Ok(source)
    }

    /// Last stop for a failed `use` that has no error callback.
    fn report_unhandled(&self, err: &LoadError) {
        error!(error = %err, "unhandled module load failure");
    }
}

/// In-memory source table keyed by address.
///
/// Counts fetches per address, which makes it the fixture of choice for
/// checking deduplication.
#[derive(Debug, Default)]
pub struct MemoryHooks {
    sources: Mutex<HashMap<String, String>>,
    aliases: Mutex<HashMap<String, String>>,
    fetch_counts: Mutex<HashMap<String, usize>>,
}

impl MemoryHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `source` under the default address for `name` (`name.js`).
    pub fn with_module(self, name: &str, source: impl Into<String>) -> Self {
        self.insert(&format!("{}.js", name), source);
        self
    }

    /// Make `name` locate to `address` instead of `name.js`.
    pub fn with_location(self, name: &str, address: &str) -> Self {
        self.aliases
            .lock()
            .insert(name.to_string(), address.to_string());
        self
    }

    pub fn insert(&self, address: &str, source: impl Into<String>) {
        self.sources
            .lock()
            .insert(address.to_string(), source.into());
    }

    /// How many times `address` has been fetched.
    pub fn fetch_count(&self, address: &str) -> usize {
        self.fetch_counts.lock().get(address).copied().unwrap_or(0)
    }

    pub fn total_fetches(&self) -> usize {
        self.fetch_counts.lock().values().sum()
    }
}

#[async_trait]
impl LoaderHooks for MemoryHooks {
    async fn locate(&self, entry: &EntryInfo) -> Result<String> {
        Ok(self
            .aliases
            .lock()
            .get(&entry.name)
            .cloned()
            .unwrap_or_else(|| format!("{}.js", entry.name)))
    }

    async fn fetch(&self, entry: &EntryInfo) -> Result<String> {
        let address = entry.address_or_name().to_string();
        *self.fetch_counts.lock().entry(address.clone()).or_insert(0) += 1;
        debug!(address = %address, "memory fetch");
        self.sources
            .lock()
            .get(&address)
            .cloned()
            .ok_or_else(|| anyhow!("{} not found (status 404)", address))
    }
}

/// Reads sources from files under a root directory.
#[derive(Debug, Clone)]
pub struct FileHooks {
    root: PathBuf,
}

impl FileHooks {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl LoaderHooks for FileHooks {
    async fn fetch(&self, entry: &EntryInfo) -> Result<String> {
        let path = self.root.join(entry.address_or_name());
        debug!(path = %path.display(), "reading module source");
        tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))
    }
}
