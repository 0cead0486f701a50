//! Structured classification of remote cloud failures
//!
//! The broker's convergence logic matches on these variants. Classification
//! happens once, at the client boundary, and only for the operation kinds it
//! applies to: lookups may report `NotFound`, creations may report
//! `AlreadyExists`.

use thiserror::Error;

/// Error returned by every [`CloudApi`](crate::CloudApi) call
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CloudError {
    /// A lookup matched nothing
    #[error("{kind} {name:?} not found")]
    NotFound {
        /// Resource kind (domain, account, ...)
        kind: &'static str,
        /// Identity that was looked up
        name: String,
    },

    /// A creation collided with an existing resource
    #[error("{kind} {name:?} already exists")]
    AlreadyExists {
        /// Resource kind
        kind: &'static str,
        /// Identity that was created
        name: String,
    },

    /// The API answered with an error
    #[error("cloud API error [{command}] ({code}): {message}")]
    Api {
        /// API command
        command: String,
        /// HTTP or CloudStack error code
        code: u16,
        /// Error text
        message: String,
    },

    /// The request never got an answer
    #[error("transport error [{command}]: {message}")]
    Transport {
        /// API command
        command: String,
        /// Description of what failed
        message: String,
    },

    /// Credentials are missing or malformed
    #[error("invalid cloud credentials: {0}")]
    Credentials(String),

    /// The caller asked for something that cannot be expressed remotely
    #[error("invalid request: {0}")]
    InvalidInput(String),
}

impl CloudError {
    /// Lookup miss for `kind`
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Creation collision for `kind`
    pub fn already_exists(kind: &'static str, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind,
            name: name.into(),
        }
    }

    /// True for lookup misses
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// True for creation collisions
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// True when retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Api { code, .. } => *code >= 500 || *code == 429,
            Self::Transport { .. } => true,
            _ => false,
        }
    }

    fn command(&self) -> String {
        match self {
            Self::NotFound { kind, .. } => format!("find {}", kind),
            Self::AlreadyExists { kind, .. } => format!("create {}", kind),
            Self::Api { command, .. } | Self::Transport { command, .. } => command.clone(),
            Self::Credentials(_) => "credentials".to_string(),
            Self::InvalidInput(_) => "request".to_string(),
        }
    }
}

impl From<CloudError> for capc_common::Error {
    fn from(err: CloudError) -> Self {
        let command = err.command();
        let message = err.to_string();
        match err {
            CloudError::Credentials(_) | CloudError::InvalidInput(_) => {
                capc_common::Error::cloud_permanent(command, message)
            }
            _ => capc_common::Error::cloud(command, message),
        }
    }
}
