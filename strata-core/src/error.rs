//! Error types for strata-core.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for build operations.
pub type Result<T> = std::result::Result<T, BuildError>;

/// Errors that abort a build run.
#[derive(Error, Debug)]
pub enum BuildError {
    /// The root configuration is malformed or uses a disallowed form.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },

    /// A required generated file could not be read or written.
    #[error("File error at {path}: {source}")]
    FileIo {
        /// File or directory the operation targeted.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// One or more plugins failed inside a required phase.
    #[error("Phase '{phase}' failed: {}", format_hook_errors(.errors))]
    HookFailed {
        /// Phase the hooks ran in.
        phase: &'static str,
        /// Every participant failure, in plugin order.
        errors: Vec<HookError>,
    },

    /// A cascading phase kept producing actions past the pass limit.
    #[error("Phase '{phase}' did not settle after {passes} passes")]
    CascadeLimitExceeded {
        /// Cascading phase that failed to settle.
        phase: &'static str,
        /// Number of drain passes performed.
        passes: usize,
    },

    /// An external stage (schema building, query extraction) failed.
    #[error("Stage '{stage}' failed: {message}")]
    Stage {
        /// Stage name.
        stage: &'static str,
        /// Description of the failure.
        message: String,
    },

    /// JSON serialization of a generated file failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BuildError {
    /// Shorthand for a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        BuildError::Configuration {
            message: message.into(),
        }
    }

    /// Wrap an IO error with the path it concerned.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BuildError::FileIo {
            path: path.into(),
            source,
        }
    }
}

fn format_hook_errors(errors: &[HookError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Page or redirect contract violations raised by plugin actions.
///
/// These are returned to the hook that issued the action; a failed
/// validation never touches the store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The page input has no path.
    #[error("Page is missing a path")]
    MissingPath,

    /// The page input has no component.
    #[error("Page '{path}' is missing a component")]
    MissingComponent {
        /// Path of the offending page.
        path: String,
    },

    /// The component reference is not an absolute path.
    #[error("Component '{component}' for page '{path}' must be an absolute path")]
    ComponentNotAbsolute {
        /// Path of the offending page.
        path: String,
        /// Component as supplied.
        component: String,
    },

    /// The page context uses a key the build reserves for itself.
    #[error("Context key '{key}' on page '{path}' is reserved")]
    ReservedContextKey {
        /// Path of the offending page.
        path: String,
        /// The reserved key.
        key: String,
    },

    /// A redirect is missing its source or destination.
    #[error("Redirect requires both from_path and to_path")]
    MissingRedirectPath,
}

/// A plugin hook that threw, rejected or returned an error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("plugin '{plugin}' failed in {hook}: {message}")]
pub struct HookError {
    /// Plugin identity.
    pub plugin: String,
    /// Hook name as plugins know it.
    pub hook: String,
    /// Description of the failure.
    pub message: String,
}

/// Error raised by a hook handler before the runner attaches plugin identity.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct HandlerError {
    /// Description of the failure.
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<ValidationError> for HandlerError {
    fn from(err: ValidationError) -> Self {
        HandlerError::new(err.to_string())
    }
}

impl From<std::io::Error> for HandlerError {
    fn from(err: std::io::Error) -> Self {
        HandlerError::new(err.to_string())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::new(err.to_string())
    }
}

/// Recoverable cache maintenance failures.
///
/// The orchestrator logs these and keeps going with a possibly stale cache.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Neither removing nor emptying the cache directory worked.
    #[error("Failed to clear cache directory {path}: {source}")]
    Remove {
        /// Cache directory.
        path: PathBuf,
        /// Error from the emptying fallback.
        #[source]
        source: std::io::Error,
    },

    /// The fingerprint baseline or incremental state could not be written.
    #[error("Failed to persist {path}: {message}")]
    Persist {
        /// File that was being written.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// Persisted state exists but could not be read back.
    #[error("Failed to load {path}: {message}")]
    Load {
        /// File that was being read.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },
}
