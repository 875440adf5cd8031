//! Push a working copy to the server.

use clap::Args;
use std::path::PathBuf;

use catalog_sync_core::{
    DiffOptions, HttpTransport, Root, ServerId, SyncClient, SyncError, SyncResult, SyncStore,
    TransportError,
};

use super::DetectionArg;
use crate::config::Config;
use crate::tree_file::{read_tree, write_tree, TreeFileError};

/// Submit the changes in a working copy and store the server's result
#[derive(Debug, Args)]
pub struct PushCommand {
    /// Baseline tree file (JSON); replaced by the new baseline on success
    pub baseline: PathBuf,

    /// Working copy tree file (JSON); reset to the new baseline on success
    pub working: PathBuf,

    /// Override the configured change detection
    #[arg(long, value_enum)]
    pub detection: Option<DetectionArg>,
}

impl PushCommand {
    pub fn run(&self, config: &Config) -> Result<(), PushError> {
        let rt = tokio::runtime::Runtime::new()
            .map_err(|e| PushError::RuntimeError(e.to_string()))?;
        rt.block_on(self.push(config))
    }

    async fn push(&self, config: &Config) -> Result<(), PushError> {
        let baseline = read_tree(&self.baseline)?;
        let working = read_tree(&self.working)?;
        let root_id = require_server_id(&baseline)?;
        tracing::debug!(
            root = %root_id,
            baseline = %self.baseline.display(),
            working = %self.working.display(),
            "loaded trees"
        );

        let transport = HttpTransport::with_timeout(
            config.server_url.value.clone(),
            config.api_key.value.clone(),
            config.timeout(),
        )?;

        let store = SyncStore::new(baseline);
        store.edit(|root| *root = working);

        let client = SyncClient::with_options(DiffOptions {
            detection: self
                .detection
                .map(Into::into)
                .unwrap_or(config.change_detection.value),
        });

        println!("Pushing to {}...", config.server_url.value);
        match client.sync(&store, &transport).await? {
            SyncResult::NoChange => {
                println!("Already up to date.");
                Ok(())
            }
            SyncResult::Success { new_baseline } => {
                write_tree(&self.baseline, &new_baseline)?;
                write_tree(&self.working, &store.working())?;
                println!("✓ pushed; {} group(s) on server", new_baseline.groups.len());
                Ok(())
            }
            SyncResult::Failure { error } => {
                for field in error.field_errors() {
                    println!("  ✗ {}: {}", field.field, field.message);
                }
                if error.requires_refetch() {
                    println!("Baseline is out of date; fetch the current tree and re-apply your edits.");
                }
                Err(PushError::Rejected(error))
            }
            SyncResult::Discarded => Err(PushError::RuntimeError(
                "submit result was discarded".to_string(),
            )),
        }
    }
}

/// The server id of a persisted tree.
pub fn require_server_id(root: &Root) -> Result<ServerId, PushError> {
    root.server_id().cloned().ok_or(PushError::NotPersisted)
}

/// Errors from the push command
#[derive(Debug)]
pub enum PushError {
    NotPersisted,
    TreeFile(TreeFileError),
    Sync(SyncError),
    Rejected(TransportError),
    RuntimeError(String),
}

impl std::fmt::Display for PushError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PushError::NotPersisted => {
                write!(f, "Baseline root has no server id; it must exist on the server")
            }
            PushError::TreeFile(e) => write!(f, "{}", e),
            PushError::Sync(e) => write!(f, "{}", e),
            PushError::Rejected(e) => write!(f, "Push rejected: {}", e),
            PushError::RuntimeError(e) => write!(f, "Runtime error: {}", e),
        }
    }
}

impl std::error::Error for PushError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PushError::TreeFile(e) => Some(e),
            PushError::Sync(e) => Some(e),
            PushError::Rejected(e) => Some(e),
            PushError::NotPersisted | PushError::RuntimeError(_) => None,
        }
    }
}

impl From<TreeFileError> for PushError {
    fn from(e: TreeFileError) -> Self {
        PushError::TreeFile(e)
    }
}

impl From<SyncError> for PushError {
    fn from(e: SyncError) -> Self {
        PushError::Sync(e)
    }
}

impl From<TransportError> for PushError {
    fn from(e: TransportError) -> Self {
        PushError::Rejected(e)
    }
}
