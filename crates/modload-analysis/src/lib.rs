//! Static source analysis for module bodies.
//!
//! The loader never executes source text to discover dependencies. Instead a
//! [`SourceAnalyzer`] looks at the text once, when it is first fetched (or when
//! a directly defined factory carries its source), and reports:
//!
//! - the dependency names the body requests through the module API,
//! - the names of sub-modules the body defines locally,
//! - whether the body uses the deferred-export mechanism,
//! - whether the text is a module body at all, or a plain script.
//!
//! [`ScanAnalyzer`] is the default implementation. It works on a token stream,
//! not a full syntax tree, which is enough to recognise the handful of call
//! shapes the module API exposes.

pub mod scan;

use serde::{Deserialize, Serialize};

pub use scan::ScanAnalyzer;

/// Result of analyzing one piece of source text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceAnalysis {
    /// Requested dependencies in first-seen order, without duplicates.
    pub dependency_names: Vec<String>,
    /// Sub-modules defined inside this body with `api.define('name', ...)`.
    pub local_definition_names: Vec<String>,
    /// Set when the body registers a deferred export producer.
    pub exports_marker: Option<String>,
    /// The body reads or writes `api.export`.
    pub uses_export: bool,
    /// True iff any dependency, local definition or export usage was found.
    pub is_module_body: bool,
}

impl SourceAnalysis {
    fn finish(mut self) -> Self {
        self.is_module_body = !self.dependency_names.is_empty()
            || !self.local_definition_names.is_empty()
            || self.exports_marker.is_some()
            || self.uses_export;
        self
    }
}

/// Turns source text into a [`SourceAnalysis`].
///
/// `api_name` is the identifier the body uses for the module API. When `None`
/// the analyzer decides on its own (see [`ScanAnalyzer`]).
pub trait SourceAnalyzer: Send + Sync {
    fn analyze(&self, source: &str, api_name: Option<&str>) -> anyhow::Result<SourceAnalysis>;
}
