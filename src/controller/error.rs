//! Error types for the controller.
//!
//! Defines the error taxonomy and its classification for retry behavior.

use std::time::Duration;
use thiserror::Error;

use crate::apply::{ApplyError, StoreError};

/// Error type for controller operations
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Child store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Missing required field in resource
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// The spec cannot be synthesized
    #[error("Invalid spec: {0}")]
    InvalidSpec(String),

    /// A referenced object is absent or not ready yet
    #[error("Pending dependency: {0}")]
    PendingDependency(String),

    /// A child write kept conflicting past the retry ceiling
    #[error("Conflict exhausted on {key} after {attempts} attempts")]
    ConflictExhausted { key: String, attempts: u32 },

    /// The pass ran out of time
    #[error("Reconcile deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Retry class of an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Wait for the spec to change
    InvalidSpec,
    /// Bounded backoff until the dependency is ready
    PendingDependency,
    /// Backoff, like transient
    ConflictExhausted,
    /// Exponential backoff
    Transient,
    /// Wait for a change; operator intervention needed
    Unrecoverable,
}

impl ErrorClass {
    /// Label value for metrics and event reasons.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::InvalidSpec => "InvalidSpec",
            ErrorClass::PendingDependency => "PendingDependency",
            ErrorClass::ConflictExhausted => "ConflictExhausted",
            ErrorClass::Transient => "Transient",
            ErrorClass::Unrecoverable => "Unrecoverable",
        }
    }

    /// Whether the driver schedules a retry on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorClass::PendingDependency | ErrorClass::ConflictExhausted | ErrorClass::Transient
        )
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a Kubernetes client error by status code.
fn classify_kube(error: &kube::Error) -> ErrorClass {
    match error {
        kube::Error::Api(response) => match response.code {
            409 => ErrorClass::ConflictExhausted,
            404 | 429 => ErrorClass::Transient,
            code if code >= 500 => ErrorClass::Transient,
            400 | 401 | 403 | 422 => ErrorClass::Unrecoverable,
            _ => ErrorClass::Unrecoverable,
        },
        kube::Error::SerdeError(_) => ErrorClass::Unrecoverable,
        // Network, TLS, and service errors
        _ => ErrorClass::Transient,
    }
}

impl Error {
    /// Retry class of this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Kube(e) => classify_kube(e),
            Error::Store(e) => match e {
                StoreError::Kube(e) => classify_kube(e),
                StoreError::Conflict(_) | StoreError::AlreadyExists(_) => {
                    ErrorClass::ConflictExhausted
                }
                StoreError::NotFound(_) => ErrorClass::Transient,
                StoreError::Serialization(_) | StoreError::Rejected(_) => {
                    ErrorClass::Unrecoverable
                }
            },
            Error::InvalidSpec(_) => ErrorClass::InvalidSpec,
            Error::PendingDependency(_) => ErrorClass::PendingDependency,
            Error::ConflictExhausted { .. } => ErrorClass::ConflictExhausted,
            Error::DeadlineExceeded(_) => ErrorClass::Transient,
            Error::MissingField(_) | Error::Serialization(_) => ErrorClass::Unrecoverable,
        }
    }

    /// Check if this error indicates a not-found condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(e)) if e.code == 404)
    }

    /// Check if this error should be retried
    pub fn is_retryable(&self) -> bool {
        self.class().is_retryable()
    }

    /// Status condition reason for this error.
    pub fn reason(&self) -> &'static str {
        match self {
            Error::DeadlineExceeded(_) => "DeadlineExceeded",
            _ => self.class().as_str(),
        }
    }
}

impl From<ApplyError> for Error {
    fn from(error: ApplyError) -> Self {
        match error {
            ApplyError::ConflictExhausted { key, attempts } => Error::ConflictExhausted {
                key: key.to_string(),
                attempts,
            },
            ApplyError::OwnedElsewhere { key, owner } => Error::InvalidSpec(format!(
                "{key} already exists and belongs to parent uid {owner}; choose another name"
            )),
            ApplyError::Store(e) => Error::Store(e),
        }
    }
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, Error>;
