//! Server-side tree and asset storage.
//!
//! Each root is stored in its own directory:
//! ```text
//! <DATA_DIR>/
//!   roots/
//!     <root_id>.json
//!   assets/
//!     <root_id>/
//!       <uuid>
//! ```
//!
//! Writes go through a temp file and a rename.

use catalog_sync_core::Root;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Errors that can occur during server storage operations.
#[derive(Debug)]
pub enum ServerStorageError {
    /// I/O error reading or writing a file.
    IoError(PathBuf, io::Error),
    /// A stored tree could not be parsed.
    ParseError(PathBuf, serde_json::Error),
    /// Invalid root ID or asset name (e.g., contains path separators).
    InvalidId(String),
}

impl std::fmt::Display for ServerStorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerStorageError::IoError(path, e) => {
                write!(f, "I/O error for {}: {}", path.display(), e)
            }
            ServerStorageError::ParseError(path, e) => {
                write!(f, "Failed to load tree {}: {}", path.display(), e)
            }
            ServerStorageError::InvalidId(id) => write!(f, "Invalid ID: {}", id),
        }
    }
}

impl std::error::Error for ServerStorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerStorageError::IoError(_, e) => Some(e),
            ServerStorageError::ParseError(_, e) => Some(e),
            ServerStorageError::InvalidId(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerStorage {
    data_dir: PathBuf,
}

impl ServerStorage {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Rejects ids that could escape the data directory.
    pub fn validate_id(id: &str) -> Result<(), ServerStorageError> {
        if id.is_empty()
            || id.contains('/')
            || id.contains('\\')
            || id.contains("..")
            || id.starts_with('.')
        {
            return Err(ServerStorageError::InvalidId(id.to_string()));
        }
        Ok(())
    }

    fn roots_dir(&self) -> PathBuf {
        self.data_dir.join("roots")
    }

    fn root_path(&self, root_id: &str) -> PathBuf {
        self.roots_dir().join(format!("{}.json", root_id))
    }

    fn asset_dir(&self, root_id: &str) -> PathBuf {
        self.data_dir.join("assets").join(root_id)
    }

    /// Loads the stored tree for a root.
    ///
    /// Returns `Ok(None)` if the root doesn't exist yet.
    pub fn load(&self, root_id: &str) -> Result<Option<Root>, ServerStorageError> {
        Self::validate_id(root_id)?;
        let path = self.root_path(root_id);

        match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)
                .map(Some)
                .map_err(|e| ServerStorageError::ParseError(path, e)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ServerStorageError::IoError(path, e)),
        }
    }

    /// Saves the tree for a root, replacing any previous version.
    pub fn save(&self, root_id: &str, root: &Root) -> Result<(), ServerStorageError> {
        Self::validate_id(root_id)?;
        let path = self.root_path(root_id);
        let bytes = serde_json::to_vec_pretty(root)
            .map_err(|e| ServerStorageError::ParseError(path.clone(), e))?;
        write_atomic(&path, &bytes)
    }

    /// Removes a root and its assets. Returns false if it didn't exist.
    pub fn remove(&self, root_id: &str) -> Result<bool, ServerStorageError> {
        Self::validate_id(root_id)?;
        let path = self.root_path(root_id);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(ServerStorageError::IoError(path, e)),
        }

        let assets = self.asset_dir(root_id);
        match fs::remove_dir_all(&assets) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(true),
            Err(e) => Err(ServerStorageError::IoError(assets, e)),
        }
    }

    /// Ids of all stored roots, sorted.
    pub fn list(&self) -> Result<Vec<String>, ServerStorageError> {
        let dir = self.roots_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ServerStorageError::IoError(dir, e)),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ServerStorageError::IoError(dir.clone(), e))?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Stores an uploaded binary under a fresh name and returns the name.
    pub fn store_asset(&self, root_id: &str, bytes: &[u8]) -> Result<String, ServerStorageError> {
        Self::validate_id(root_id)?;
        let name = uuid::Uuid::new_v4().to_string();
        let path = self.asset_dir(root_id).join(&name);
        write_atomic(&path, bytes)?;
        Ok(name)
    }

    /// Loads a stored binary. Returns `Ok(None)` if it doesn't exist.
    pub fn load_asset(
        &self,
        root_id: &str,
        name: &str,
    ) -> Result<Option<Vec<u8>>, ServerStorageError> {
        Self::validate_id(root_id)?;
        Self::validate_id(name)?;
        let path = self.asset_dir(root_id).join(name);

        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ServerStorageError::IoError(path, e)),
        }
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ServerStorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| ServerStorageError::IoError(parent.to_path_buf(), e))?;
    }

    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    fs::write(&temp_path, bytes).map_err(|e| ServerStorageError::IoError(temp_path.clone(), e))?;
    fs::rename(&temp_path, path).map_err(|e| ServerStorageError::IoError(path.to_path_buf(), e))
}
