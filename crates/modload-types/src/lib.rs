//! Shared types for the modload workspace.
//!
//! This crate holds the leaf types every other member needs: the opaque
//! [`ModuleExport`] value that factories produce and consumers receive, and
//! the environment-variable helpers used to build loader configuration.

pub mod env_utils;
pub mod export;

pub use env_utils::{env_duration_ms, env_flag, env_name_or, env_parse, env_parse_or};
pub use export::ModuleExport;
