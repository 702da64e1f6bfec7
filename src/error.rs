//! Error types for the annotation sync engine

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Crate-wide result type
pub type Result<T> = std::result::Result<T, SyncError>;

/// Crate-wide error type
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Thread(#[from] ThreadError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Remote operations the annotation service performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
}

/// Errors returned by an annotation service
///
/// Every variant is also broadcast as an [`crate::AnnotationErrorEvent`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// Network or credential failure; an expired token looks exactly like this
    #[error("Could not {operation} annotations due to invalid or expired token: {message}")]
    Transport { operation: Operation, message: String },

    /// The store answered but refused the operation or sent a malformed payload
    #[error("Could not {operation} annotations: {message}")]
    Data { operation: Operation, message: String },
}

/// Reason attached to broadcast service errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorReason {
    Create,
    Read,
    Update,
    Delete,
    Authorization,
}

/// Errors raised by thread operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ThreadError {
    /// Local check, raised before any network call
    #[error("Permission denied: cannot delete annotation {0}")]
    PermissionDenied(String),

    #[error(transparent)]
    Service(#[from] ServiceError),

    /// The task running the server half panicked or was aborted
    #[error("Annotation task stopped: {0}")]
    Interrupted(String),
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Read => "read",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ServiceError {
    pub fn transport(operation: Operation, message: impl fmt::Display) -> Self {
        ServiceError::Transport {
            operation,
            message: message.to_string(),
        }
    }

    pub fn data(operation: Operation, message: impl fmt::Display) -> Self {
        ServiceError::Data {
            operation,
            message: message.to_string(),
        }
    }

    pub fn operation(&self) -> Operation {
        match self {
            ServiceError::Transport { operation, .. } | ServiceError::Data { operation, .. } => {
                *operation
            }
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, ServiceError::Transport { .. })
    }

    /// Reason broadcast for this error
    ///
    /// Create and update failures always report their own operation; read
    /// and delete transport failures report `authorization`.
    pub fn reason(&self) -> ErrorReason {
        match (self.operation(), self.is_transport()) {
            (Operation::Create, _) => ErrorReason::Create,
            (Operation::Update, _) => ErrorReason::Update,
            (_, true) => ErrorReason::Authorization,
            (Operation::Read, false) => ErrorReason::Read,
            (Operation::Delete, false) => ErrorReason::Delete,
        }
    }
}

impl ErrorReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorReason::Create => "create",
            ErrorReason::Read => "read",
            ErrorReason::Update => "update",
            ErrorReason::Delete => "delete",
            ErrorReason::Authorization => "authorization",
        }
    }
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
