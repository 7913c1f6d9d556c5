//! Error types for clusterprobe
//!
//! Errors are structured with fields so a failed scenario can be diagnosed from
//! the message alone: the resource kind and name, which stopping condition
//! fired, and the last underlying cause.

use thiserror::Error;

use crate::poll::WaitError;
use crate::provision::ProvisionError;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for clusterprobe operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Invalid configuration (poll specs, attempt counts, resource inputs)
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
        /// The offending field or flag, if known
        field: Option<String>,
    },

    /// Reading the current state of a resource failed.
    ///
    /// This is a transient condition from the point of view of the poll
    /// engine: the resource itself has not been judged, only the query.
    #[error("query error for {target}: {message}")]
    Query {
        /// Resource the query was for (e.g. "pod core/web")
        target: String,
        /// Description of what failed
        message: String,
        /// Whether the API reported the resource as missing
        not_found: bool,
    },

    /// I/O error (endpoint probes, script files)
    #[error("io error [{context}]: {source}")]
    Io {
        /// What was being done when the error occurred
        context: String,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// SSH session error (handshake, authentication, channel)
    #[error("ssh error [{context}]: {source}")]
    Ssh {
        /// What was being done when the error occurred
        context: String,
        /// The underlying libssh2 error
        #[source]
        source: ssh2::Error,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// A bounded wait gave up
    #[error(transparent)]
    Wait(#[from] WaitError),

    /// Every provisioning attempt failed
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error for a specific field
    pub fn validation_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a query error for a resource
    pub fn query(target: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Query {
            target: target.into(),
            message: msg.into(),
            not_found: false,
        }
    }

    /// Create a query error for a resource the API does not (yet) know about
    pub fn not_found(target: impl Into<String>) -> Self {
        Self::Query {
            target: target.into(),
            message: "not found".to_string(),
            not_found: true,
        }
    }

    /// Convert a kube-rs error raised while reading `target` into a query error.
    ///
    /// A 404 keeps its identity so callers can tell "not visible yet" apart
    /// from transport failures.
    pub fn from_kube_query(target: impl Into<String>, err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ref resp) if resp.code == 404 => Self::not_found(target),
            other => Self::query(target, other.to_string()),
        }
    }

    /// Create an I/O error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create an SSH error with context
    pub fn ssh(context: impl Into<String>, source: ssh2::Error) -> Self {
        Self::Ssh {
            context: context.into(),
            source,
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation and serialization errors are not retryable (they need an
    /// input fix). Query, I/O and SSH errors are. Kubernetes errors depend on the
    /// status code. Exhausted waits and provisioning runs are final.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code)
            ),
            Error::Validation { .. } => false,
            Error::Query { .. } => true,
            Error::Io { .. } => true,
            Error::Ssh { .. } => true,
            Error::Serialization { .. } => false,
            Error::Wait(_) => false,
            Error::Provision(_) => false,
            Error::Internal { .. } => true,
        }
    }

    /// Whether this error reports a resource the API could not find
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Query { not_found, .. } => *not_found,
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 404,
            _ => false,
        }
    }
}
