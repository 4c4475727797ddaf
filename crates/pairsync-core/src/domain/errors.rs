//! Domain error types
//!
//! Validation failures raised when constructing domain newtypes.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid synced file name (empty, contains a separator, or is a dot entry)
    #[error("Invalid file name: {0}")]
    InvalidFileName(String),

    /// Invalid peer identifier
    #[error("Invalid peer name: {0}")]
    InvalidPeerName(String),

    /// Actor ID parsing error
    #[error("Invalid actor ID: {0}")]
    InvalidActorId(String),
}
