//! Disk-backed apply context.

use catalog_sync_core::{ApplyContext, ApplyError, ServerId};

use super::storage::ServerStorage;

/// Allocates uuid server ids and writes pending binaries to the asset store.
pub struct DiskContext<'a> {
    storage: &'a ServerStorage,
    root_id: &'a str,
    /// Hosted paths written during this apply
    pub written: Vec<String>,
}

impl<'a> DiskContext<'a> {
    pub fn new(storage: &'a ServerStorage, root_id: &'a str) -> Self {
        Self {
            storage,
            root_id,
            written: Vec::new(),
        }
    }
}

impl ApplyContext for DiskContext<'_> {
    fn allocate_id(&mut self) -> ServerId {
        ServerId::new(uuid::Uuid::new_v4().to_string())
    }

    fn store_asset(
        &mut self,
        owner: &ServerId,
        slot: &str,
        bytes: &[u8],
    ) -> Result<String, ApplyError> {
        let name = self
            .storage
            .store_asset(self.root_id, bytes)
            .map_err(|e| ApplyError::Asset(e.to_string()))?;
        let path = format!("/assets/{}/{}", self.root_id, name);
        tracing::debug!(owner = %owner, slot, path = %path, bytes = bytes.len(), "stored asset");
        self.written.push(path.clone());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_store_asset_returns_hosted_path() {
        let temp = TempDir::new().unwrap();
        let storage = ServerStorage::new(temp.path());
        let mut ctx = DiskContext::new(&storage, "P1");

        let path = ctx
            .store_asset(&ServerId::new("V2"), "icon", b"png")
            .unwrap();
        assert!(path.starts_with("/assets/P1/"));
        assert_eq!(ctx.written, vec![path.clone()]);

        let name = path.rsplit('/').next().unwrap();
        assert_eq!(
            storage.load_asset("P1", name).unwrap(),
            Some(b"png".to_vec())
        );
    }

    #[test]
    fn test_allocated_ids_are_unique() {
        let temp = TempDir::new().unwrap();
        let storage = ServerStorage::new(temp.path());
        let mut ctx = DiskContext::new(&storage, "P1");
        assert_ne!(ctx.allocate_id(), ctx.allocate_id());
    }
}
