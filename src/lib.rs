//! Modload
//!
//! Run-time module loading with on-the-fly dependency discovery:
//!
//! - **Pipeline**: name to export, memoized per name and deduplicated per address
//! - **Scopes**: every module gets a private namespace chained to the root
//! - **Watchdog**: breaks dependency cycles and enforces an optional wait interval
//! - **Analysis**: dependencies are read from each source the first time it is fetched
//!
//! See [`Loader`] to get started and [`ModuleApi`] for the define/use surface.

#![allow(clippy::result_large_err)]

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

pub use modload_analysis::{scan, ScanAnalyzer, SourceAnalysis, SourceAnalyzer};
pub use modload_core::{
    disable_tracking, enable_tracking, init_from_env, is_tracking, tracked_loaders, Deferred,
    EntryInfo, Evaluator, ExportStyle, Factory, FileHooks, LoadError, LoadRequest, LoadResult,
    Loader, LoaderBuilder, LoaderConfig, LoaderHooks, LoaderStats, MemoryHooks, ModuleApi,
    NativeEvaluator, EXPORT_DEFINE_NAME,
};
pub use modload_types::{env_duration_ms, env_flag, env_name_or, env_parse, env_parse_or, ModuleExport};

/// Loader reading sources from `root`, configured from the environment.
///
/// See [`LoaderConfig::from_env`] for the variables read.
pub fn file_loader<E>(root: impl AsRef<Path>, evaluator: E) -> Result<Loader>
where
    E: Evaluator + 'static,
{
    let root = root.as_ref();
    let root = root
        .canonicalize()
        .with_context(|| format!("module root {} is not accessible", root.display()))?;
    let config = LoaderConfig::from_env();
    info!(
        root = %root.display(),
        watch_ms = config.watch_interval.as_millis() as u64,
        wait_ms = config.wait_interval.map(|w| w.as_millis() as u64),
        "creating file loader"
    );
    Loader::builder()
        .hooks(std::sync::Arc::new(FileHooks::new(root)))
        .evaluator(evaluator)
        .analyzer(ScanAnalyzer::new(config.api_name.clone()))
        .config(config)
        .build()
}
