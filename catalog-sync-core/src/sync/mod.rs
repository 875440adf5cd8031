//! Sync orchestration and transports.
//!
//! A sync runs the working copy of a [`SyncStore`](crate::store::SyncStore)
//! through the pipeline:
//!
//! 1. diff against the baseline
//! 2. extract pending assets and build the envelope
//! 3. submit through a [`Transport`]
//! 4. install the canonical tree as the new baseline
//!
//! Only step 3 awaits. At most one submit per root is in flight through a
//! [`SyncClient`].

mod client;
mod error;
mod http;
mod transport;

pub use client::{SyncClient, SyncResult, SyncState};
pub use error::{FieldError, SyncError, TransportError};
pub use http::{check_server, envelope_form, HttpTransport};
pub use transport::Transport;

use std::sync::OnceLock;

use crate::store::SyncStore;

/// Syncs with default diff options through a process-wide [`SyncClient`].
pub async fn sync<T: Transport>(
    store: &SyncStore,
    transport: &T,
) -> Result<SyncResult, SyncError> {
    shared_client().sync(store, transport).await
}

fn shared_client() -> &'static SyncClient {
    static CLIENT: OnceLock<SyncClient> = OnceLock::new();
    CLIENT.get_or_init(SyncClient::new)
}
