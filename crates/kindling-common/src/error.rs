//! Error types for kindling
//!
//! Errors are structured with fields so a failed run can be reported with
//! the command that failed, what was being waited on, or which path could
//! not be written. Every variant is fatal to the current run; the only
//! tolerated failure is an "already exists" answer from an external tool,
//! which never becomes an `Error` (see [`crate::runner::Applied`]).

use std::path::PathBuf;

use thiserror::Error;

use crate::runner::CommandErrorKind;

/// Main error type for kindling operations
#[derive(Debug, Error)]
pub enum Error {
    /// An external tool exited non-zero or could not be executed
    #[error("command `{command}` failed ({kind}, exit code {exit_code}): {stderr}")]
    ExternalCommand {
        /// The command line as it was run
        command: String,
        /// Process exit code (127 when the binary is missing)
        exit_code: i32,
        /// Captured standard error, trimmed
        stderr: String,
        /// Classified failure kind
        kind: CommandErrorKind,
    },

    /// A readiness probe never succeeded within its attempt budget
    #[error("timed out waiting for {what} after {attempts} attempts{}", last_error_suffix(.last_error))]
    ReadinessTimeout {
        /// What was being waited on (e.g. "gitops readiness")
        what: String,
        /// Number of probe invocations made
        attempts: u32,
        /// Last error observed from the probe, if any
        last_error: Option<String>,
    },

    /// The manifest template could not be fetched or rendered
    #[error("template error [{template}]: {message}")]
    TemplateFetch {
        /// Template location (URL or local path)
        template: String,
        /// Description of what failed
        message: String,
    },

    /// A directory or file owned by kindling could not be read or written
    #[error("filesystem error at {}: {source}", .path.display())]
    Filesystem {
        /// Path that could not be accessed
        path: PathBuf,
        /// The underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// A component was about to be installed before its dependencies were ready
    #[error("{component} cannot be installed before its dependencies are ready: {}", .missing.join(", "))]
    DependencyNotReady {
        /// Component whose install was attempted
        component: String,
        /// Dependencies that had not been observed ready
        missing: Vec<String>,
    },

    /// The cluster state machine was asked to make an illegal move
    #[error("invalid cluster state transition from {from} to {to}")]
    InvalidTransition {
        /// Current state
        from: String,
        /// Requested state
        to: String,
    },

    /// Invalid configuration or input
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
    },

    /// Tool output or a manifest could not be decoded
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// The named cluster does not exist
    #[error("cluster not found: {name}")]
    ClusterNotFound {
        /// Cluster name
        name: String,
    },

    /// The cluster exists but has not converged
    #[error("cluster {name} is not ready: {} not ready", .pending.join(", "))]
    NotReady {
        /// Cluster name
        name: String,
        /// Components that were not observed ready
        pending: Vec<String>,
    },

    /// An HTTP client could not be built
    #[error("http error for {url}: {message}")]
    Http {
        /// Target URL
        url: String,
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error: {message}")]
    Internal {
        /// Description of what failed
        message: String,
    },
}

fn last_error_suffix(last_error: &Option<String>) -> String {
    match last_error {
        Some(e) => format!(" (last error: {e})"),
        None => String::new(),
    }
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
        }
    }

    /// Create a filesystem error for the given path
    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Create a template error for the given template location
    pub fn template_fetch(template: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::TemplateFetch {
            template: template.into(),
            message: msg.into(),
        }
    }

    /// Failure kind when this error came from an external command
    pub fn command_kind(&self) -> Option<CommandErrorKind> {
        match self {
            Self::ExternalCommand { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}
