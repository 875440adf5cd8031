//! Sync error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::diff::InvariantViolation;
use crate::envelope::EnvelopeError;

/// Field-level rejection reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Errors a transport can resolve with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The server rejected one or more fields; correct and resubmit
    #[error("Validation failed for {} field(s)", .0.len())]
    Validation(Vec<FieldError>),

    /// The baseline is stale; refetch before diffing again
    #[error("Baseline is out of date: {0}")]
    Conflict(String),

    /// Connection problem; the same envelope can be resent
    #[error("Network error: {0}")]
    Network(String),

    /// Server failure, surfaced verbatim
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// The response could not be understood
    #[error("Invalid server response: {0}")]
    Decode(String),
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Network(_))
    }

    pub fn requires_refetch(&self) -> bool {
        matches!(self, TransportError::Conflict(_))
    }

    /// Per-field messages for validation errors, empty otherwise.
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            TransportError::Validation(errors) => errors,
            _ => &[],
        }
    }
}

/// Errors that prevent a sync from reaching the transport.
///
/// Transport failures are not errors at this level; they resolve as
/// [`SyncResult::Failure`](super::SyncResult::Failure).
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("A submit is already in flight for root {0}")]
    InFlight(String),

    #[error("Root has no server id; persist it before syncing")]
    RootNotPersisted,

    #[error("Sync store has been disposed")]
    Disposed,

    #[error("Working copy is inconsistent with the baseline: {0}")]
    Invariant(#[from] InvariantViolation),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}
