#![allow(dead_code)]
//! Shared fixtures for the engine integration tests.
//!
//! - `init_tracing`: opt-in log output (`RUST_LOG=modload_core=trace`)
//! - `CallLog`: records which module bodies ran, in order
//! - hook wrappers for stalled fetches, asynchronous normalization and
//!   unhandled-error capture

use std::future::Future;
use std::sync::{Arc, Once};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use modload_core::{
    Deferred, EntryInfo, LoadError, Loader, LoaderConfig, LoaderHooks, MemoryHooks, ModuleApi,
    NativeEvaluator,
};

static TRACING_INIT: Once = Once::new();

pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        if std::env::var("RUST_LOG").is_ok() {
            tracing_subscriber::registry()
                .with(fmt::layer().with_test_writer())
                .with(EnvFilter::from_default_env())
                .init();
        }
    });
}

/// Build a loader over shared hooks so the test can inspect fetch counts.
pub fn loader_with<H: LoaderHooks + 'static>(hooks: Arc<H>, evaluator: NativeEvaluator) -> Loader {
    loader_with_config(hooks, evaluator, LoaderConfig::default())
}

pub fn loader_with_config<H: LoaderHooks + 'static>(
    hooks: Arc<H>,
    evaluator: NativeEvaluator,
    config: LoaderConfig,
) -> Loader {
    init_tracing();
    Loader::builder()
        .hooks(hooks)
        .evaluator(evaluator)
        .config(config)
        .build()
        .expect("loader should build")
}

/// Fail the test instead of hanging when a load never settles.
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("load did not settle in time")
}

/// Ordered record of module bodies that ran.
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, name: &str) {
        self.0.lock().push(name.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.0.lock().iter().filter(|n| *n == name).count()
    }

    /// A body that logs `name` and exports `value`.
    pub fn body(
        &self,
        name: &str,
        value: Value,
    ) -> impl Fn(&ModuleApi) -> anyhow::Result<()> + Send + Sync + 'static {
        let log = self.clone();
        let name = name.to_string();
        move |api| {
            log.push(&name);
            api.set_export(value.clone())?;
            Ok(())
        }
    }
}

/// Hooks whose fetch never completes for addresses in `stalled`.
pub struct StallingHooks {
    pub inner: MemoryHooks,
    pub stalled: Vec<String>,
}

#[async_trait]
impl LoaderHooks for StallingHooks {
    async fn locate(&self, entry: &EntryInfo) -> anyhow::Result<String> {
        self.inner.locate(entry).await
    }

    async fn fetch(&self, entry: &EntryInfo) -> anyhow::Result<String> {
        if self.stalled.iter().any(|a| a == entry.address_or_name()) {
            futures::future::pending::<()>().await;
        }
        self.inner.fetch(entry).await
    }
}

/// Hooks that strip a leading `./` asynchronously and record unhandled errors.
#[derive(Default)]
pub struct RelativeHooks {
    pub inner: MemoryHooks,
    pub reported: Mutex<Vec<String>>,
}

#[async_trait]
impl LoaderHooks for RelativeHooks {
    fn normalize(&self, name: &str, _referer: Option<&str>) -> Deferred<String> {
        let name = name.to_string();
        Deferred::pending(async move { Ok(name.trim_start_matches("./").to_string()) })
    }

    async fn locate(&self, entry: &EntryInfo) -> anyhow::Result<String> {
        self.inner.locate(entry).await
    }

    async fn fetch(&self, entry: &EntryInfo) -> anyhow::Result<String> {
        self.inner.fetch(entry).await
    }

    fn report_unhandled(&self, err: &LoadError) {
        self.reported.lock().push(err.to_string());
    }
}
