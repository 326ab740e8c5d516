//! Error types for configpin
//!
//! Errors are grouped by how the controllers react to them: transient API
//! failures and write conflicts are retried with backoff, everything else is
//! terminal for the current reconciliation pass.

use thiserror::Error;

/// Main error type for configpin operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error that may succeed on retry (network, 5xx, timeouts)
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        source: kube::Error,
    },

    /// The target object vanished between lookup and write
    #[error("not found: {message}")]
    NotFound {
        /// Description of what was missing
        message: String,
    },

    /// Optimistic-concurrency write race (HTTP 409)
    #[error("conflict: {message}")]
    Conflict {
        /// Message returned by the API server
        message: String,
    },

    /// The object handed to a reconciler cannot be addressed
    #[error("malformed key: {message}")]
    MalformedKey {
        /// Description of what is missing or invalid
        message: String,
    },

    /// Validation failure, either raised by a webhook or returned by the API
    /// server when an admission hook rejected a write
    #[error("validation error{}: {message}", format_path(.path))]
    Validation {
        /// Field path the error refers to (e.g. "spec")
        path: Option<String>,
        /// Human readable summary
        message: String,
        /// Extra detail, such as a diff
        details: Option<String>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Invalid startup configuration
    #[error("configuration error: {message}")]
    Config {
        /// Description of what is wrong
        message: String,
    },
}

fn format_path(path: &Option<String>) -> String {
    path.as_ref().map(|p| format!(" at {p}")).unwrap_or_default()
}

impl From<kube::Error> for Error {
    fn from(source: kube::Error) -> Self {
        match source {
            kube::Error::Api(ref resp) if resp.code == 404 => Self::NotFound {
                message: resp.message.clone(),
            },
            kube::Error::Api(ref resp) if resp.code == 409 => Self::Conflict {
                message: resp.message.clone(),
            },
            // Admission denials and schema rejections come back as 400/403/422
            kube::Error::Api(ref resp) if matches!(resp.code, 400 | 403 | 422) => {
                Self::Validation {
                    path: None,
                    message: resp.message.clone(),
                    details: None,
                }
            }
            source => Self::Kube { source },
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}

impl Error {
    /// Create a not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound {
            message: msg.into(),
        }
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict {
            message: msg.into(),
        }
    }

    /// Create a malformed key error
    pub fn malformed_key(msg: impl Into<String>) -> Self {
        Self::MalformedKey {
            message: msg.into(),
        }
    }

    /// Create a validation error without a field path
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            path: None,
            message: msg.into(),
            details: None,
        }
    }

    /// Create a validation error for a field path with details
    pub fn validation_for_field(
        path: impl Into<String>,
        msg: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self::Validation {
            path: Some(path.into()),
            message: msg.into(),
            details: Some(details.into()),
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Whether a reconciliation that failed with this error should be retried
    ///
    /// Only transient API failures and write conflicts can succeed on a later
    /// attempt; the rest wait for the next change event.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Kube { .. } | Self::Conflict { .. })
    }

    /// Whether this error is an AlreadyExists/Conflict response
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Render the error the way admission responses present it to users
    ///
    /// Validation errors with a path become `"<message>: <path>"` followed by
    /// the details on the next line, so `kubectl` shows the diff verbatim.
    pub fn admission_message(&self) -> String {
        match self {
            Self::Validation {
                path,
                message,
                details,
            } => {
                let mut out = message.clone();
                if let Some(path) = path {
                    out.push_str(": ");
                    out.push_str(path);
                }
                if let Some(details) = details {
                    out.push('\n');
                    out.push_str(details);
                }
                out
            }
            other => other.to_string(),
        }
    }
}
