//! Error types for the elector

use elector_types::TypeError;
use std::time::Duration;
use thiserror::Error;

/// Result type for elector operations
pub type Result<T> = std::result::Result<T, ElectorError>;

/// Classified outcome of a failed store call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No record exists under the key
    #[error("record not found")]
    NotFound,

    /// Create-if-absent found an existing record
    #[error("record already exists")]
    AlreadyExists,

    /// Optimistic concurrency collision
    #[error("write conflict")]
    Conflict,

    /// Network, authorization or any other failure
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Losing a create race, which is an expected outcome rather than a failure
    pub fn is_contention(&self) -> bool {
        matches!(self, Self::AlreadyExists | Self::Conflict)
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
}

impl From<kube::Error> for StoreError {
    fn from(err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(response) if response.code == 404 => Self::NotFound,
            kube::Error::Api(response) if response.code == 409 => {
                if response.reason == "AlreadyExists" {
                    Self::AlreadyExists
                } else {
                    Self::Conflict
                }
            }
            _ => Self::Unavailable(err.to_string()),
        }
    }
}

/// Elector error types
#[derive(Error, Debug)]
pub enum ElectorError {
    /// Own identity could not be resolved; the candidate cannot take part
    #[error("Candidate setup failed: {0}")]
    Setup(String),

    /// Transient store failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A store call exceeded its deadline
    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid election key or identity
    #[error("Invalid value: {0}")]
    Validation(#[from] TypeError),

    /// Listener or socket failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Kubernetes client construction error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// A component cannot serve yet
    #[error("not ready: {0}")]
    NotReady(&'static str),

    /// The task was cancelled
    #[error("cancelled")]
    Cancelled,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ElectorError {
    /// Create a setup error
    pub fn setup(msg: impl Into<String>) -> Self {
        Self::Setup(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Errors a reconciliation round may hit without ending the candidate
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::error::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{} happened", reason),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn test_store_error_classification() {
        assert_eq!(StoreError::from(api_error(404, "NotFound")), StoreError::NotFound);
        assert_eq!(
            StoreError::from(api_error(409, "AlreadyExists")),
            StoreError::AlreadyExists
        );
        assert_eq!(StoreError::from(api_error(409, "Conflict")), StoreError::Conflict);
        assert!(matches!(
            StoreError::from(api_error(403, "Forbidden")),
            StoreError::Unavailable(_)
        ));
    }

    #[test]
    fn test_contention() {
        assert!(StoreError::AlreadyExists.is_contention());
        assert!(StoreError::Conflict.is_contention());
        assert!(!StoreError::NotFound.is_contention());
        assert!(!StoreError::unavailable("connection reset").is_contention());
    }

    #[test]
    fn test_transient_errors() {
        assert!(ElectorError::from(StoreError::unavailable("eof")).is_transient());
        assert!(ElectorError::Timeout(Duration::from_secs(2)).is_transient());
        assert!(!ElectorError::setup("no pod").is_transient());
        assert!(!ElectorError::Cancelled.is_transient());
    }
}
