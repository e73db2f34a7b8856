//! Load error types.
//!
//! Every failure the engine reports carries the operation that failed and the
//! module it failed for. Failures coming from hooks, analyzers, evaluators and
//! factories keep the original `anyhow::Error` as their [`source`].
//!
//! [`LoadError`] is `Clone`: one rejected entry delivers the same error to every
//! consumer waiting on it.
//!
//! [`source`]: std::error::Error::source

use std::sync::Arc;
use std::time::Duration;

/// Which export style a scope has committed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportStyle {
    /// The factory assigned the export value itself.
    Direct,
    /// The factory registered a deferred export producer.
    Deferred,
}

impl std::fmt::Display for ExportStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportStyle::Direct => write!(f, "export"),
            ExportStyle::Deferred => write!(f, "exportDefine"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum LoadError {
    /// A name could not be normalized, or not synchronously where that is required.
    Normalize {
        name: String,
        cause: Option<Arc<anyhow::Error>>,
    },

    /// The locate hook failed.
    Locate {
        name: String,
        cause: Arc<anyhow::Error>,
    },

    /// The fetch or translate hook failed for an address.
    Fetch {
        name: String,
        address: String,
        cause: Arc<anyhow::Error>,
    },

    /// The source text could not be analyzed or prepared for evaluation.
    Analysis {
        name: String,
        cause: Arc<anyhow::Error>,
    },

    /// The module body (or plain script) failed while running.
    Factory {
        name: String,
        cause: Arc<anyhow::Error>,
    },

    /// The same name appeared twice in one `use` request.
    DuplicateRequest { name: String },

    /// Direct and deferred export were both attempted on one scope.
    ExportConflict {
        /// Name of the module owning the scope (`<top>` for the root scope).
        scope: String,
        /// The style that was already in use.
        existing: ExportStyle,
    },

    /// No entry or cached export exists for the name.
    UnknownModule { name: String },

    /// The entry did not resolve within the configured wait interval.
    Timeout { name: String, waited: Duration },

    /// Anonymous `define` called on a scope that is not owned by a module.
    NoOwningModule,

    /// The loader was dropped while the request was still pending.
    Abandoned { name: String },
}

impl LoadError {
    pub(crate) fn locate(name: &str, cause: anyhow::Error) -> Self {
        LoadError::Locate {
            name: name.to_string(),
            cause: Arc::new(cause),
        }
    }

    pub(crate) fn fetch(name: &str, address: &str, cause: anyhow::Error) -> Self {
        LoadError::Fetch {
            name: name.to_string(),
            address: address.to_string(),
            cause: Arc::new(cause),
        }
    }

    pub(crate) fn analysis(name: &str, cause: anyhow::Error) -> Self {
        LoadError::Analysis {
            name: name.to_string(),
            cause: Arc::new(cause),
        }
    }

    pub(crate) fn factory(name: &str, cause: anyhow::Error) -> Self {
        LoadError::Factory {
            name: name.to_string(),
            cause: Arc::new(cause),
        }
    }

    pub(crate) fn normalize(name: &str, cause: Option<anyhow::Error>) -> Self {
        LoadError::Normalize {
            name: name.to_string(),
            cause: cause.map(Arc::new),
        }
    }

    /// The module name this error is about, if it names one.
    pub fn module_name(&self) -> Option<&str> {
        match self {
            LoadError::Normalize { name, .. }
            | LoadError::Locate { name, .. }
            | LoadError::Fetch { name, .. }
            | LoadError::Analysis { name, .. }
            | LoadError::Factory { name, .. }
            | LoadError::DuplicateRequest { name }
            | LoadError::UnknownModule { name }
            | LoadError::Timeout { name, .. }
            | LoadError::Abandoned { name } => Some(name),
            LoadError::ExportConflict { scope, .. } => Some(scope),
            LoadError::NoOwningModule => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, LoadError::Timeout { .. })
    }
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadError::Normalize { name, cause } => {
                write!(f, "normalize failed for \"{}\"", name)?;
                match cause {
                    Some(cause) => write!(f, ": {}", cause),
                    None => write!(f, ": name cannot be normalized synchronously"),
                }
            }
            LoadError::Locate { name, cause } => {
                write!(f, "locate failed for \"{}\": {}", name, cause)
            }
            LoadError::Fetch {
                name,
                address,
                cause,
            } => write!(f, "fetch failed for \"{}\" at {}: {}", name, address, cause),
            LoadError::Analysis { name, cause } => {
                write!(f, "parse error for \"{}\": {}", name, cause)
            }
            LoadError::Factory { name, cause } => {
                write!(f, "evaluation error for \"{}\": {}", name, cause)
            }
            LoadError::DuplicateRequest { name } => write!(
                f,
                "duplicate dependencies to load are not allowed: \"{}\"",
                name
            ),
            LoadError::ExportConflict { scope, existing } => write!(
                f,
                "module \"{}\" already uses {}; export styles cannot be mixed",
                scope, existing
            ),
            LoadError::UnknownModule { name } => {
                write!(f, "module with name \"{}\" does not have an export", name)
            }
            LoadError::Timeout { name, waited } => write!(
                f,
                "module timeout: \"{}\" unresolved after {}ms",
                name,
                waited.as_millis()
            ),
            LoadError::NoOwningModule => {
                write!(f, "anonymous define called outside of a module scope")
            }
            LoadError::Abandoned { name } => {
                write!(f, "loader dropped before \"{}\" resolved", name)
            }
        }
    }
}

impl std::error::Error for LoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LoadError::Normalize {
                cause: Some(cause), ..
            }
            | LoadError::Locate { cause, .. }
            | LoadError::Fetch { cause, .. }
            | LoadError::Analysis { cause, .. }
            | LoadError::Factory { cause, .. } => Some(&***cause),
            _ => None,
        }
    }
}

pub type LoadResult<T> = Result<T, LoadError>;
