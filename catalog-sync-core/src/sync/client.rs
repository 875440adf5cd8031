//! Sync orchestration: diff → envelope → submit → baseline replacement.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use super::error::{SyncError, TransportError};
use super::transport::Transport;
use crate::diff::{check_invariants, diff_with, DiffOptions};
use crate::envelope::build_envelope;
use crate::identity::ServerId;
use crate::model::Root;
use crate::store::SyncStore;

/// Phase of a sync for one root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Diffing,
    NoChange,
    Building,
    Submitting,
    Success,
    Failure,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncState::Idle => "idle",
            SyncState::Diffing => "diffing",
            SyncState::NoChange => "no change",
            SyncState::Building => "building",
            SyncState::Submitting => "submitting",
            SyncState::Success => "success",
            SyncState::Failure => "failure",
        };
        f.write_str(name)
    }
}

/// Outcome of [`SyncClient::sync`].
#[derive(Debug, Clone)]
pub enum SyncResult {
    /// Nothing to send; no request was made
    NoChange,
    /// The server accepted the changeset
    Success { new_baseline: Root },
    /// The transport rejected; both trees are unchanged
    Failure { error: TransportError },
    /// The store was disposed or re-initialised while submitting
    Discarded,
}

impl SyncResult {
    pub fn is_success(&self) -> bool {
        matches!(self, SyncResult::Success { .. })
    }
}

/// Drives syncs and publishes per-root [`SyncState`]s.
///
/// At most one sync per root id runs through a client at a time, even when
/// several stores hold a copy of the same root.
#[derive(Debug, Default)]
pub struct SyncClient {
    options: DiffOptions,
    states: Mutex<HashMap<ServerId, Arc<watch::Sender<SyncState>>>>,
    in_flight: Mutex<HashSet<ServerId>>,
}

impl SyncClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: DiffOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    /// Current phase for a root.
    pub fn state(&self, root_id: &ServerId) -> SyncState {
        *self.channel(root_id).borrow()
    }

    /// Watches phase changes for a root.
    pub fn subscribe(&self, root_id: &ServerId) -> watch::Receiver<SyncState> {
        self.channel(root_id).subscribe()
    }

    fn channel(&self, root_id: &ServerId) -> Arc<watch::Sender<SyncState>> {
        self.states
            .lock()
            .entry(root_id.clone())
            .or_insert_with(|| Arc::new(watch::channel(SyncState::Idle).0))
            .clone()
    }

    /// Syncs the store's working copy through `transport`.
    ///
    /// Returns `Err` only for problems that stop the sync before the
    /// transport is reached: a second submit for the same root, an
    /// unpersisted root, or a working copy that does not resolve against the
    /// baseline. Transport rejections come back as [`SyncResult::Failure`].
    pub async fn sync<T: Transport>(
        &self,
        store: &SyncStore,
        transport: &T,
    ) -> Result<SyncResult, SyncError> {
        let root_id = store
            .root_id()
            .server_id()
            .cloned()
            .ok_or(SyncError::RootNotPersisted)?;

        let _claim = RootClaim::acquire(&self.in_flight, &root_id)?;
        let (_in_flight, snapshot) = store.begin_submit()?;
        let phase = Phase::start(self.channel(&root_id));

        if let Err(violation) = check_invariants(&snapshot.baseline, &snapshot.working) {
            tracing::error!(root = %root_id, error = %violation, "working copy invariant broken");
            return Err(violation.into());
        }

        let changeset = diff_with(&snapshot.baseline, &snapshot.working, self.options);
        if changeset.is_empty() {
            phase.set(SyncState::NoChange);
            tracing::debug!(root = %root_id, "nothing to sync");
            return Ok(SyncResult::NoChange);
        }

        phase.set(SyncState::Building);
        let envelope = build_envelope(&root_id, &changeset)?;

        phase.set(SyncState::Submitting);
        tracing::info!(
            root = %root_id,
            entries = changeset.entry_count(),
            parts = envelope.binary_parts.len(),
            "submitting changeset"
        );

        let outcome = transport.submit(envelope).await.and_then(|canonical| {
            if canonical.root.id == snapshot.ticket.root_id {
                Ok(canonical)
            } else {
                Err(TransportError::Decode(format!(
                    "canonical tree is for root {}, expected {}",
                    canonical.root.id, root_id
                )))
            }
        });

        match outcome {
            Ok(canonical) => match store.complete_submit(&snapshot, canonical) {
                Some(new_baseline) => {
                    phase.set(SyncState::Success);
                    tracing::info!(root = %root_id, "sync succeeded");
                    Ok(SyncResult::Success { new_baseline })
                }
                None => Ok(SyncResult::Discarded),
            },
            Err(error) => {
                if store.is_stale(&snapshot.ticket) {
                    tracing::debug!(root = %root_id, error = %error, "ignoring failure for stale submit");
                    return Ok(SyncResult::Discarded);
                }
                phase.set(SyncState::Failure);
                tracing::warn!(root = %root_id, error = %error, "sync failed");
                Ok(SyncResult::Failure { error })
            }
        }
    }
}

/// Marks a root as submitting through one client until dropped.
struct RootClaim<'a> {
    claims: &'a Mutex<HashSet<ServerId>>,
    root_id: ServerId,
}

impl<'a> RootClaim<'a> {
    fn acquire(claims: &'a Mutex<HashSet<ServerId>>, root_id: &ServerId) -> Result<Self, SyncError> {
        if !claims.lock().insert(root_id.clone()) {
            return Err(SyncError::InFlight(root_id.to_string()));
        }
        Ok(Self {
            claims,
            root_id: root_id.clone(),
        })
    }
}

impl Drop for RootClaim<'_> {
    fn drop(&mut self) {
        self.claims.lock().remove(&self.root_id);
    }
}

/// Publishes phases for one sync and returns to `Idle` when dropped.
struct Phase {
    sender: Arc<watch::Sender<SyncState>>,
}

impl Phase {
    fn start(sender: Arc<watch::Sender<SyncState>>) -> Self {
        sender.send_replace(SyncState::Diffing);
        Self { sender }
    }

    fn set(&self, state: SyncState) {
        self.sender.send_replace(state);
    }
}

impl Drop for Phase {
    fn drop(&mut self) {
        self.sender.send_replace(SyncState::Idle);
    }
}
