//! Evaluation environment contract.
//!
//! The engine does not execute source text. Once a fetched source has been
//! analyzed, it asks the [`Evaluator`] either to turn a module body into a
//! [`Factory`] (which the engine runs later, against the module's own scope) or
//! to run a plain script immediately.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use parking_lot::RwLock;
use tracing::debug;

use crate::factory::Factory;
use crate::hooks::EntryInfo;

pub trait Evaluator: Send + Sync {
    /// Prepare a module body for later invocation.
    fn compile_module(&self, entry: &EntryInfo, source: &str) -> Result<Factory>;

    /// Run a plain, non-module script now.
    fn run_script(&self, entry: &EntryInfo, source: &str) -> Result<()>;
}

type ScriptFn = dyn Fn(&str) -> Result<()> + Send + Sync;

/// Evaluation environment backed by Rust closures keyed by module name.
///
/// Source text is still fetched and analyzed by the engine; this environment
/// only supplies the behaviour behind it. Module bodies without a registered
/// body fail to compile. Scripts without a registered body run as no-ops.
#[derive(Default)]
pub struct NativeEvaluator {
    bodies: RwLock<HashMap<String, Factory>>,
    scripts: RwLock<HashMap<String, Arc<ScriptFn>>>,
}

impl NativeEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the body run for module `name`.
    pub fn with_body<F>(self, name: &str, body: F) -> Self
    where
        F: Fn(&crate::api::ModuleApi) -> Result<()> + Send + Sync + 'static,
    {
        self.bodies
            .write()
            .insert(name.to_string(), Factory::new(body));
        self
    }

    /// Register the behaviour of a plain script `name`.
    pub fn with_script<F>(self, name: &str, script: F) -> Self
    where
        F: Fn(&str) -> Result<()> + Send + Sync + 'static,
    {
        self.scripts
            .write()
            .insert(name.to_string(), Arc::new(script));
        self
    }
}

impl Evaluator for NativeEvaluator {
    fn compile_module(&self, entry: &EntryInfo, source: &str) -> Result<Factory> {
        let body = self
            .bodies
            .read()
            .get(&entry.name)
            .cloned()
            .ok_or_else(|| anyhow!("no native body registered for {}", entry.name))?;
        debug!(module = %entry.name, bytes = source.len(), "compiled native module body");
        Ok(body.with_source(source))
    }

    fn run_script(&self, entry: &EntryInfo, source: &str) -> Result<()> {
        let script = self.scripts.read().get(&entry.name).cloned();
        match script {
            Some(script) => script(source),
            None => Ok(()),
        }
    }
}
