//! Validation errors for shared types

use thiserror::Error;

/// Result type for type validation
pub type TypeResult<T> = std::result::Result<T, TypeError>;

/// Errors raised while building or validating shared types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypeError {
    /// A required field was empty
    #[error("{0} must not be empty")]
    Empty(&'static str),

    /// A name is not a valid DNS-1123 subdomain
    #[error("invalid {field} '{value}': {reason}")]
    InvalidName {
        field: &'static str,
        value: String,
        reason: &'static str,
    },
}
