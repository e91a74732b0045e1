//! Error types for the rotator
//!
//! Errors carry enough context (namespace, secret name, attempt counts) to be
//! actionable from a pipeline log without re-running with debug output.

use std::fmt;

use thiserror::Error;

/// Main error type for rotation operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The target service account does not exist in the namespace
    #[error("service account {namespace}/{name} not found")]
    Binding {
        /// Namespace that was searched
        namespace: String,
        /// Service account name
        name: String,
    },

    /// The token controller did not populate the secret within the bounded wait
    #[error("token for secret {namespace}/{secret} not populated after {attempts} attempts")]
    TokenNotReady {
        /// Namespace of the minted secret
        namespace: String,
        /// Name of the minted secret
        secret: String,
        /// Number of reads performed before giving up
        attempts: u32,
    },

    /// Destination store rejected the credentials
    #[error("harness rejected credentials (HTTP {status}): {message}")]
    Auth {
        /// HTTP status returned
        status: u16,
        /// Message body returned by the API
        message: String,
    },

    /// Destination store scope (org/project) does not exist
    #[error("harness scope not found (HTTP {status}): {message}")]
    NotFound {
        /// HTTP status returned
        status: u16,
        /// Message body returned by the API
        message: String,
    },

    /// A single secret could not be deleted during cleanup
    #[error("failed to delete secret {namespace}/{name}: {message}")]
    Delete {
        /// Namespace of the secret
        namespace: String,
        /// Name of the secret
        name: String,
        /// Underlying failure
        message: String,
    },

    /// Any other Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Transport-level HTTP failure talking to the destination store
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Destination store returned an unexpected non-success status
    #[error("harness api error (HTTP {status}): {message}")]
    HarnessApi {
        /// HTTP status returned
        status: u16,
        /// Message body returned by the API
        message: String,
    },

    /// Invalid configuration
    #[error("validation error: {0}")]
    Validation(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Local file I/O error (step outputs)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a cleanup delete error for a single secret
    pub fn delete(
        namespace: impl Into<String>,
        name: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Delete {
            namespace: namespace.into(),
            name: name.into(),
            message: msg.into(),
        }
    }
}

/// Workflow stage in which a run failed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Creating the new token secret
    Mint,
    /// Writing the token to the destination store
    Publish,
    /// Removing superseded token secrets
    Cleanup,
}

impl Stage {
    /// Lowercase stage name used in logs and failure messages
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Mint => "mint",
            Stage::Publish => "publish",
            Stage::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rotation run that ended in `Failed(stage)`
#[derive(Debug, Error)]
#[error("{stage} stage failed: {source}")]
pub struct RotationError {
    /// Stage that failed
    pub stage: Stage,
    /// Underlying cause
    #[source]
    pub source: Error,
}

impl RotationError {
    /// Tag an error with the stage it occurred in
    pub fn new(stage: Stage, source: Error) -> Self {
        Self { stage, source }
    }
}
