//! Baseline and working copy holder.
//!
//! A [`SyncStore`] owns the two trees for one root. The UI edits the working
//! copy through [`SyncStore::edit`]; the sync client takes snapshots, and on
//! success installs the server's canonical tree atomically.
//!
//! # Lifecycle
//!
//! - `init(baseline)` – capture a fresh baseline, working copy cloned from it
//! - `commit(new_baseline)` – the server accepted; both trees become `new_baseline`
//! - `rollback()` – discard local edits
//! - `dispose()` – the owning context is gone; pending resolutions are ignored

use parking_lot::RwLock;

use crate::identity::Identity;
use crate::model::Root;
use crate::rebase::rebase;
use crate::sync::SyncError;
use crate::wire::CanonicalTree;

/// Identifies one submission against one store epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionTicket {
    pub root_id: Identity,
    pub seq: u64,
}

/// State captured when a submit starts.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub ticket: SubmissionTicket,
    pub baseline: Root,
    pub working: Root,
    revision: u64,
}

#[derive(Debug)]
struct StoreState {
    baseline: Root,
    working: Root,
    /// Bumped on init, dispose and every submission
    seq: u64,
    /// Bumped on every working copy change
    revision: u64,
    in_flight: bool,
    disposed: bool,
}

#[derive(Debug)]
pub struct SyncStore {
    state: RwLock<StoreState>,
}

impl SyncStore {
    pub fn new(baseline: Root) -> Self {
        let working = baseline.clone();
        Self {
            state: RwLock::new(StoreState {
                baseline,
                working,
                seq: 0,
                revision: 0,
                in_flight: false,
                disposed: false,
            }),
        }
    }

    /// Replaces both trees with a freshly loaded baseline.
    ///
    /// Any submit still pending against the previous baseline is discarded
    /// when it resolves.
    pub fn init(&self, baseline: Root) {
        let mut state = self.state.write();
        state.working = baseline.clone();
        state.baseline = baseline;
        state.seq += 1;
        state.revision += 1;
        state.disposed = false;
        tracing::debug!(root = %state.baseline.id, "store initialised");
    }

    /// Installs `new_baseline` as both baseline and working copy.
    pub fn commit(&self, new_baseline: Root) {
        let mut state = self.state.write();
        state.working = new_baseline.clone();
        state.baseline = new_baseline;
        state.revision += 1;
    }

    /// Discards local edits.
    pub fn rollback(&self) {
        let mut state = self.state.write();
        state.working = state.baseline.clone();
        state.revision += 1;
    }

    pub fn dispose(&self) {
        let mut state = self.state.write();
        state.disposed = true;
        state.seq += 1;
    }

    pub fn is_disposed(&self) -> bool {
        self.state.read().disposed
    }

    pub fn root_id(&self) -> Identity {
        self.state.read().baseline.id.clone()
    }

    pub fn baseline(&self) -> Root {
        self.state.read().baseline.clone()
    }

    pub fn working(&self) -> Root {
        self.state.read().working.clone()
    }

    /// Mutates the working copy.
    pub fn edit<R>(&self, f: impl FnOnce(&mut Root) -> R) -> R {
        let mut state = self.state.write();
        state.revision += 1;
        f(&mut state.working)
    }

    pub fn is_in_flight(&self) -> bool {
        self.state.read().in_flight
    }

    /// Marks a submission as started and captures both trees.
    ///
    /// The returned guard clears the in-flight flag when dropped.
    pub(crate) fn begin_submit(&self) -> Result<(InFlight<'_>, Snapshot), SyncError> {
        let mut state = self.state.write();
        if state.disposed {
            return Err(SyncError::Disposed);
        }
        if state.in_flight {
            return Err(SyncError::InFlight(state.baseline.id.to_string()));
        }
        state.in_flight = true;
        state.seq += 1;

        let snapshot = Snapshot {
            ticket: SubmissionTicket {
                root_id: state.baseline.id.clone(),
                seq: state.seq,
            },
            baseline: state.baseline.clone(),
            working: state.working.clone(),
            revision: state.revision,
        };
        Ok((InFlight { store: self }, snapshot))
    }

    /// True when a resolution for `ticket` must be ignored.
    pub fn is_stale(&self, ticket: &SubmissionTicket) -> bool {
        let state = self.state.read();
        state.disposed || state.seq != ticket.seq || state.baseline.id != ticket.root_id
    }

    /// Installs the canonical tree if `snapshot` is still current.
    ///
    /// The working copy becomes the canonical tree when it was not edited
    /// since the snapshot; otherwise the in-flight edits are rebased onto it.
    /// Returns the new baseline, or `None` for a stale snapshot.
    pub(crate) fn complete_submit(&self, snapshot: &Snapshot, canonical: CanonicalTree) -> Option<Root> {
        let mut state = self.state.write();
        if state.disposed
            || state.seq != snapshot.ticket.seq
            || state.baseline.id != snapshot.ticket.root_id
        {
            tracing::debug!(
                root = %snapshot.ticket.root_id,
                seq = snapshot.ticket.seq,
                "ignoring stale submission result"
            );
            return None;
        }

        let working = if state.revision == snapshot.revision {
            canonical.root.clone()
        } else {
            tracing::info!(root = %canonical.root.id, "rebasing edits made during submit");
            rebase(&snapshot.working, &state.working, &canonical)
        };

        state.baseline = canonical.root;
        state.working = working;
        state.revision += 1;
        Some(state.baseline.clone())
    }

    fn finish_submit(&self) {
        self.state.write().in_flight = false;
    }
}

/// Clears the store's in-flight flag on drop.
pub(crate) struct InFlight<'a> {
    store: &'a SyncStore,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.store.finish_submit();
    }
}
