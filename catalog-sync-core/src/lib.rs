//! Catalog Sync Core Library
//!
//! Reconciles an edited nested collection (root → groups → leaves) against
//! its last-known server state and ships only the difference as a multipart
//! envelope.

pub mod apply;
pub mod asset;
pub mod diff;
pub mod envelope;
pub mod extract;
pub mod identity;
pub mod model;
pub mod rebase;
pub mod store;
pub mod sync;
pub mod wire;

pub use apply::{apply_changeset, ApplyContext, ApplyError, MemoryContext};
pub use asset::{AssetRef, AssetSlots};
pub use diff::{
    check_invariants, diff, diff_with, ChangeDetection, Changeset, DiffOptions,
    InvariantViolation, ValueDiff,
};
pub use envelope::{build_envelope, EnvelopeError, TransportEnvelope};
pub use extract::{extract, symbolic_key, BinaryMap, ExtractError};
pub use identity::{classify, Classification, Identity, LocalId, ServerId};
pub use model::{Entity, Fields, Group, Leaf, Root};
pub use store::{Snapshot, SubmissionTicket, SyncStore};
pub use sync::{
    check_server, sync, FieldError, HttpTransport, SyncClient, SyncError, SyncResult, SyncState,
    Transport, TransportError,
};
pub use wire::{CanonicalTree, StructuredDiff};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
