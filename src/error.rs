//! Error types for the diagrelay library
//!
//! This module defines all error types that can occur while sweeping rotated
//! logs and shipping the active log. None of them is fatal to the agent: the
//! poll cycle converts every error into a logged outcome and retries on the
//! next tick. The helpers on [`RelayError`] let callers tell transient
//! failures from configuration mistakes.

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the diagrelay library
pub type Result<T> = std::result::Result<T, RelayError>;

/// Main error type for all diagrelay operations
#[derive(Debug, Error)]
pub enum RelayError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid rotation glob
    #[error("Invalid rotation pattern: {0}")]
    InvalidPattern(#[from] globset::Error),

    /// The target-name resolver could not produce a remote name
    #[error("Failed to resolve target for {file_name}: {message}")]
    Resolve {
        /// Logical file name that was being resolved
        file_name: String,
        /// Reason reported by the resolver
        message: String,
    },

    /// Network-level failure talking to the remote store (includes timeouts)
    #[error("Transport error for {target}: {message}")]
    Transport {
        /// Remote target of the failed request
        target: String,
        /// Underlying transport message
        message: String,
    },

    /// The remote store answered with a non-success status
    #[error("Remote store rejected {method} {target} with status {status}")]
    RemoteStatus {
        /// HTTP method of the request
        method: &'static str,
        /// Remote target of the failed request
        target: String,
        /// HTTP status code
        status: u16,
    },

    /// Staging a byte range into a temporary file failed
    #[error("Failed to stage {path:?}: {source}")]
    Staging {
        /// Source file being staged
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl RelayError {
    /// Create a resolve error for a logical file name
    pub fn resolve(file_name: impl Into<String>, message: impl Into<String>) -> Self {
        RelayError::Resolve {
            file_name: file_name.into(),
            message: message.into(),
        }
    }

    /// Create a transport error for a remote target
    pub fn transport(target: impl Into<String>, message: impl Into<String>) -> Self {
        RelayError::Transport {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error with a custom message
    pub fn config(msg: impl Into<String>) -> Self {
        RelayError::InvalidConfiguration(msg.into())
    }

    /// Check if the failed operation is worth retrying on the next cycle
    pub fn is_transient(&self) -> bool {
        match self {
            RelayError::Io(_)
            | RelayError::Staging { .. }
            | RelayError::Transport { .. }
            | RelayError::Resolve { .. } => true,
            // 4xx other than timeouts and throttling will not fix themselves
            RelayError::RemoteStatus { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            _ => false,
        }
    }

    /// Check if this error came from the remote side
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            RelayError::Transport { .. } | RelayError::RemoteStatus { .. }
        )
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            RelayError::Transport { target, .. } => {
                format!(
                    "Could not reach the diagnostic store at {}. Check NC_DIAGNOSTIC_AGENT_SERVICE and network policies.",
                    target
                )
            }
            RelayError::RemoteStatus { status: 401 | 403, target, .. } => {
                format!("The diagnostic store refused access to {}. Check the store's credentials.", target)
            }
            RelayError::InvalidConfiguration(msg) => {
                format!("Invalid configuration: {}. Run 'diagrelay config' to inspect the effective settings.", msg)
            }
            _ => self.to_string(),
        }
    }
}
