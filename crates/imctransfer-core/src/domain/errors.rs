//! Domain error types

use thiserror::Error;

/// Errors that can occur while validating domain values
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Remote identifier is empty or malformed
    #[error("Invalid remote ID: {0}")]
    InvalidRemoteId(String),

    /// Content hash is not a 40 character hexadecimal SHA-1 digest
    #[error("Invalid content hash: {0}")]
    InvalidHash(String),

    /// Remote file name cannot be used as a local file name
    #[error("Invalid file name: {0}")]
    InvalidFileName(String),

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}
