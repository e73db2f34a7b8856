//! Modload Core
//!
//! Run-time module loading engine.
//!
//! Given a symbolic module name, the engine normalizes it, locates and fetches
//! its source, analyzes the source for dependencies, and drives the module
//! through registration and evaluation exactly once. Exports are memoized per
//! scope chain and fetches are deduplicated per address.
//!
//! # Core Modules
//!
//! - [`loader`]: `Loader`, its builder and stats
//! - [`api`]: `ModuleApi`, the define/use/has/delete/export surface of a scope
//! - [`hooks`]: normalize/locate/fetch/translate hooks, with memory and file backed implementations
//! - [`evaluator`]: the evaluation environment contract and a closure-backed environment
//! - [`factory`]: module factories
//! - [`config`]: loader configuration
//! - [`registry`]: opt-in process-wide list of live loaders
//!
//! Internally, every module gets an entry and a private scope in one arena per
//! loader. Entries wait on their dependencies through resolver handles that a
//! periodic watchdog can force to break dependency cycles.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use modload_core::{Factory, Loader, MemoryHooks, ModuleExport, NativeEvaluator};
//!
//! let hooks = MemoryHooks::new()
//!     .with_module("util", "module.export = { shout };")
//!     .with_module("greet", "var util = module('util'); module.export = hi;");
//! let evaluator = NativeEvaluator::new()
//!     .with_body("util", |m| Ok(m.set_export(serde_json::json!({"shout": true}))?))
//!     .with_body("greet", |m| Ok(m.set_export(ModuleExport::function(|_| "hi".into()))?));
//!
//! let loader = Loader::new(hooks, evaluator);
//! let greet = loader.api().import("greet").await?;
//! ```

#![allow(clippy::result_large_err)]
#![allow(clippy::type_complexity)]

pub mod api;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod factory;
pub mod hooks;
pub mod loader;
pub mod registry;

mod lifecycle;
mod pipeline;
mod resolver;
mod settle;
mod state;
mod watchdog;

pub use api::{LoadRequest, ModuleApi, EXPORT_DEFINE_NAME};
pub use config::LoaderConfig;
pub use error::{ExportStyle, LoadError, LoadResult};
pub use evaluator::{Evaluator, NativeEvaluator};
pub use factory::Factory;
pub use hooks::{Deferred, EntryInfo, FileHooks, LoaderHooks, MemoryHooks};
pub use loader::{Loader, LoaderBuilder, LoaderStats};
pub use modload_analysis::{ScanAnalyzer, SourceAnalysis, SourceAnalyzer};
pub use modload_types::ModuleExport;
pub use registry::{
    disable_tracking, enable_tracking, init_from_env, is_tracking, tracked_loaders,
};
