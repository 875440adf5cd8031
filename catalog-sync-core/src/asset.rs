//! Asset slot values.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single element of an asset slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetRef {
    /// Path the server can already resolve
    Hosted(String),
    /// Binary data awaiting upload
    Pending(#[serde(with = "serde_bytes")] Vec<u8>),
}

impl AssetRef {
    pub fn hosted(path: impl Into<String>) -> Self {
        AssetRef::Hosted(path.into())
    }

    pub fn pending(bytes: impl Into<Vec<u8>>) -> Self {
        AssetRef::Pending(bytes.into())
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, AssetRef::Pending(_))
    }

    pub fn as_hosted(&self) -> Option<&str> {
        match self {
            AssetRef::Hosted(path) => Some(path),
            AssetRef::Pending(_) => None,
        }
    }
}

/// Named, ordered asset slots of an entity.
pub type AssetSlots = BTreeMap<String, Vec<AssetRef>>;

/// Counts pending elements across all slots.
pub fn pending_count(slots: &AssetSlots) -> usize {
    slots
        .values()
        .flat_map(|slot| slot.iter())
        .filter(|asset| asset.is_pending())
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_count() {
        let mut slots = AssetSlots::new();
        slots.insert(
            "gallery".to_string(),
            vec![
                AssetRef::hosted("/img/a.png"),
                AssetRef::pending(vec![1, 2]),
                AssetRef::pending(vec![3]),
            ],
        );
        slots.insert("icon".to_string(), vec![AssetRef::hosted("/img/i.png")]);

        assert_eq!(pending_count(&slots), 2);
    }

    #[test]
    fn test_as_hosted() {
        assert_eq!(AssetRef::hosted("/a").as_hosted(), Some("/a"));
        assert_eq!(AssetRef::pending(vec![0]).as_hosted(), None);
    }
}
