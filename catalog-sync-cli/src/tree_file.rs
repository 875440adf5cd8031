//! Reading and writing tree files.
//!
//! Trees are stored as pretty-printed JSON `Root` documents.

use catalog_sync_core::Root;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum TreeFileError {
    Read(PathBuf, std::io::Error),
    Parse(PathBuf, serde_json::Error),
    Write(PathBuf, std::io::Error),
    Serialize(serde_json::Error),
}

impl std::fmt::Display for TreeFileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TreeFileError::Read(path, e) => {
                write!(f, "Failed to read tree file '{}': {}", path.display(), e)
            }
            TreeFileError::Parse(path, e) => {
                write!(f, "Failed to parse tree file '{}': {}", path.display(), e)
            }
            TreeFileError::Write(path, e) => {
                write!(f, "Failed to write tree file '{}': {}", path.display(), e)
            }
            TreeFileError::Serialize(e) => write!(f, "Failed to serialize tree: {}", e),
        }
    }
}

impl std::error::Error for TreeFileError {}

pub fn read_tree(path: &Path) -> Result<Root, TreeFileError> {
    let contents =
        fs::read_to_string(path).map_err(|e| TreeFileError::Read(path.to_path_buf(), e))?;
    serde_json::from_str(&contents).map_err(|e| TreeFileError::Parse(path.to_path_buf(), e))
}

/// Writes via a temp file and rename so a crash never leaves half a tree.
pub fn write_tree(path: &Path, root: &Root) -> Result<(), TreeFileError> {
    let json = serde_json::to_string_pretty(root).map_err(TreeFileError::Serialize)?;
    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, json).map_err(|e| TreeFileError::Write(temp_path.clone(), e))?;
    fs::rename(&temp_path, path).map_err(|e| TreeFileError::Write(path.to_path_buf(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_sync_core::{Group, Identity};
    use tempfile::tempdir;

    #[test]
    fn test_write_then_read() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("tree.json");
        let root = Root::new(Identity::existing("P1"))
            .with_group(Group::new(Identity::existing("F1")).with_field("name", "Color"));

        write_tree(&path, &root).unwrap();
        assert_eq!(read_tree(&path).unwrap(), root);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_read_missing_file() {
        let temp_dir = tempdir().unwrap();
        let err = read_tree(&temp_dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, TreeFileError::Read(..)));
    }

    #[test]
    fn test_read_invalid_json() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(read_tree(&path).unwrap_err(), TreeFileError::Parse(..)));
    }
}
