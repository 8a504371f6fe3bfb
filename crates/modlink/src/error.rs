//! Error types for the module graph.

use crate::manager::Entry;
use std::path::PathBuf;
use thiserror::Error;

/// Boxed error produced by script artifacts, module hooks and engines.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while resolving, linking or tearing down modules.
#[derive(Error, Debug)]
pub enum ModuleError {
    /// Identifier has no resolvable target.
    #[error("Module not found: {0}")]
    NotFound(String),

    /// Root load collision. Carries the entry that was loaded first.
    #[error("Module already loaded: {}", .0.identifier())]
    AlreadyLoaded(Box<Entry>),

    /// Unload target is not held by the manager.
    #[error("Module not loaded: {0}")]
    NotLoaded(String),

    /// Source failed to produce an artifact.
    #[error("Failed to compile module at '{}': {source}", path.display())]
    Compilation {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    /// An artifact, a require callback or a teardown hook raised.
    #[error("Execution failed while {phase}: {source}")]
    Execution {
        phase: String,
        #[source]
        source: BoxError,
    },

    /// A require call's target could not be resolved.
    #[error("Failed to resolve dependency '{identifier}'")]
    Resolution {
        identifier: String,
        #[source]
        source: Option<Box<ModuleError>>,
    },

    /// Protocol violation (double close, post-close access, double bind, bad label).
    #[error("Illegal usage: {0}")]
    IllegalUsage(String),

    /// A reevaluation cascade went deeper than the configured bound.
    #[error("Reevaluation cascade exceeded depth {0}")]
    CascadeTooDeep(usize),

    /// Several independent failures collected during a best-effort pass.
    #[error("{} failures: [{}]", .0.len(), join_messages(.0))]
    Aggregate(Vec<ModuleError>),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for module graph operations.
pub type ModuleResult<T> = std::result::Result<T, ModuleError>;

impl ModuleError {
    pub fn illegal(message: impl Into<String>) -> Self {
        ModuleError::IllegalUsage(message.into())
    }

    pub fn execution(phase: impl Into<String>, source: impl Into<BoxError>) -> Self {
        ModuleError::Execution {
            phase: phase.into(),
            source: source.into(),
        }
    }

    pub fn resolution(identifier: impl Into<String>, source: Option<ModuleError>) -> Self {
        ModuleError::Resolution {
            identifier: identifier.into(),
            source: source.map(Box::new),
        }
    }

    pub fn compilation(path: impl Into<PathBuf>, source: impl Into<BoxError>) -> Self {
        ModuleError::Compilation {
            path: path.into(),
            source: source.into(),
        }
    }

    /// Fold the failures of a best-effort pass into a single result.
    pub fn collect(mut errors: Vec<ModuleError>) -> ModuleResult<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ModuleError::Aggregate(errors)),
        }
    }

    /// Number of leaf failures this error stands for.
    pub fn failure_count(&self) -> usize {
        match self {
            ModuleError::Aggregate(errors) => errors.iter().map(ModuleError::failure_count).sum(),
            _ => 1,
        }
    }
}

fn join_messages(errors: &[ModuleError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
