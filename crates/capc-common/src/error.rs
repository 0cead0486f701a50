//! Error types for the CloudStack provider
//!
//! Errors are structured with fields to aid debugging in production.
//! Each variant carries the object or remote command it concerns.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Why an owner lookup failed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OwnershipFailure {
    /// The owner prototype type has no registered kind
    UnregisteredKind,
    /// The owner prototype type resolves to more than one kind
    AmbiguousKind,
    /// The dependent carries no owner reference of the requested kind
    NoReference,
    /// The referenced owner could not be fetched
    Fetch,
}

/// Main error type for provider operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Validation error for CRD specs that slipped past admission
    #[error("validation error for {object}: {message}")]
    Validation {
        /// Name of the object with invalid configuration
        object: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.zones")
        field: Option<String>,
    },

    /// Remote cloud API error
    #[error("cloud error [{command}]: {message}")]
    Cloud {
        /// Remote command or broker operation that failed
        command: String,
        /// Description of what failed
        message: String,
        /// Whether this error is retryable
        retryable: bool,
    },

    /// Owner reference resolution error
    #[error("ownership error for {object} (kind {kind} in namespace {namespace}): {message}")]
    Ownership {
        /// Name of the dependent object
        object: String,
        /// Owner kind being resolved
        kind: String,
        /// Namespace the owner was looked up in
        namespace: String,
        /// Description of what failed
        message: String,
        /// Failure classification
        failure: OwnershipFailure,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "webhook")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            object: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with object context and field path
    pub fn validation_for_field(
        object: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            object: object.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a retryable cloud error
    pub fn cloud(command: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Cloud {
            command: command.into(),
            message: msg.into(),
            retryable: true,
        }
    }

    /// Create a non-retryable cloud error (e.g., bad credentials)
    pub fn cloud_permanent(command: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Cloud {
            command: command.into(),
            message: msg.into(),
            retryable: false,
        }
    }

    /// Create an ownership error
    pub fn ownership(
        failure: OwnershipFailure,
        object: impl Into<String>,
        kind: impl Into<String>,
        namespace: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Ownership {
            object: object.into(),
            kind: kind.into(),
            namespace: namespace.into(),
            message: msg.into(),
            failure,
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
    /// Validation and serialization errors need a spec change. Ownership errors
    /// are retryable unless the owner kind itself is misconfigured.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => {
                // 4xx means the request itself is wrong
                !matches!(
                    source,
                    kube::Error::Api(ae) if (400..500).contains(&ae.code)
                )
            }
            Error::Validation { .. } => false,
            Error::Cloud { retryable, .. } => *retryable,
            Error::Ownership { failure, .. } => !matches!(
                failure,
                OwnershipFailure::UnregisteredKind | OwnershipFailure::AmbiguousKind
            ),
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// True when the error reports that an owner reference is not set yet
    pub fn is_missing_owner(&self) -> bool {
        matches!(
            self,
            Error::Ownership {
                failure: OwnershipFailure::NoReference,
                ..
            }
        )
    }

    /// True when the Kubernetes API answered 404
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 404)
    }
}
