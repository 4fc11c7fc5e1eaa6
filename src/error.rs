//! Error types for Tourguard.
//!
//! Validation and state errors are surfaced to the caller immediately.
//! Issuance and persistence errors come from external dependencies and are
//! the only kinds the retry layer will try again.

use thiserror::Error;

/// A specialized `Result` type for monitoring operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the monitoring core.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Malformed profile, coordinates or zone definition. Rejected before any
    /// state change.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The operation is not allowed from the entity's current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The operation would violate an invariant (e.g. a second incident
    /// report for the same alert).
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// A referenced tourist, alert or incident does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Identity issuance failed.
    #[error("Issuance error: {0}")]
    Issuance(String),

    /// The store could not be written after all retries.
    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl Error {
    /// Whether the failure came from an external dependency and may succeed
    /// on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Issuance(_) | Error::Persistence(_))
    }
}
