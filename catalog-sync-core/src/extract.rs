//! Pending-asset extraction.
//!
//! Walks a [`Changeset`] and replaces every pending binary with a symbolic
//! key, collecting the bytes into a side-channel [`BinaryMap`]. The key is
//! `"{owner}:{slot}_{index}"`, where `owner` is the entity's raw id and
//! `index` is the element's position within the slot. The receiving side
//! uses [`symbolic_key`] to build the same strings.
//!
//! A hosted path that reads exactly like one of the generated keys would be
//! taken for a pending part on the receiving side, so extraction rejects it.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::asset::{AssetRef, AssetSlots};
use crate::diff::{Changeset, ValueDiff};
use crate::identity::Identity;
use crate::model::{Group, Leaf};
use crate::wire::{StructuredDiff, WireGroup, WireLeaf, WireSlots, WireValueDiff};

/// Symbolic key → bytes for one submission.
pub type BinaryMap = BTreeMap<String, Vec<u8>>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    /// Two pending binaries produced the same key, or a hosted path equals
    /// a generated key.
    #[error("Symbolic key collision: {0}")]
    KeyCollision(String),
}

/// Builds the symbolic key for a pending element.
pub fn symbolic_key(owner: &Identity, slot: &str, index: usize) -> String {
    format!("{}:{}_{}", owner.as_str(), slot, index)
}

/// Replaces pending binaries with symbolic keys.
pub fn extract(changeset: &Changeset) -> Result<(StructuredDiff, BinaryMap), ExtractError> {
    let mut extractor = Extractor::default();

    let create_groups = changeset
        .create_groups
        .iter()
        .map(|group| extractor.group(group))
        .collect::<Result<Vec<_>, _>>()?;
    let update_groups = changeset
        .update_groups
        .iter()
        .map(|group| extractor.group(group))
        .collect::<Result<Vec<_>, _>>()?;

    let mut values = BTreeMap::new();
    for (group_id, value_diff) in &changeset.values {
        if value_diff.is_empty() {
            continue;
        }
        values.insert(group_id.clone(), extractor.values(value_diff)?);
    }

    let structured = StructuredDiff {
        create_groups,
        update_groups,
        delete_group_ids: changeset.delete_group_ids.clone(),
        values,
    };

    if let Some(clash) = extractor
        .hosted
        .iter()
        .find(|path| extractor.parts.contains_key(*path))
    {
        return Err(ExtractError::KeyCollision(clash.clone()));
    }

    tracing::debug!(parts = extractor.parts.len(), "extracted pending assets");

    Ok((structured, extractor.parts))
}

#[derive(Default)]
struct Extractor {
    parts: BinaryMap,
    hosted: BTreeSet<String>,
}

impl Extractor {
    fn slots(&mut self, owner: &Identity, slots: &AssetSlots) -> Result<WireSlots, ExtractError> {
        let mut wire = WireSlots::new();
        for (name, assets) in slots {
            let mut out = Vec::with_capacity(assets.len());
            for (index, asset) in assets.iter().enumerate() {
                match asset {
                    AssetRef::Hosted(path) => {
                        self.hosted.insert(path.clone());
                        out.push(path.clone());
                    }
                    AssetRef::Pending(bytes) => {
                        let key = symbolic_key(owner, name, index);
                        if self.parts.insert(key.clone(), bytes.clone()).is_some() {
                            return Err(ExtractError::KeyCollision(key));
                        }
                        out.push(key);
                    }
                }
            }
            wire.insert(name.clone(), out);
        }
        Ok(wire)
    }

    fn leaf(&mut self, leaf: &Leaf) -> Result<WireLeaf, ExtractError> {
        Ok(WireLeaf {
            id: leaf.id.clone(),
            fields: leaf.fields.clone(),
            assets: self.slots(&leaf.id, &leaf.assets)?,
        })
    }

    fn group(&mut self, group: &Group) -> Result<WireGroup, ExtractError> {
        let assets = self.slots(&group.id, &group.assets)?;
        let leaves = group
            .leaves
            .iter()
            .map(|leaf| self.leaf(leaf))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(WireGroup {
            id: group.id.clone(),
            fields: group.fields.clone(),
            assets,
            leaves,
        })
    }

    fn values(&mut self, values: &ValueDiff) -> Result<WireValueDiff, ExtractError> {
        Ok(WireValueDiff {
            create_values: values
                .create_values
                .iter()
                .map(|leaf| self.leaf(leaf))
                .collect::<Result<Vec<_>, _>>()?,
            update_values: values
                .update_values
                .iter()
                .map(|leaf| self.leaf(leaf))
                .collect::<Result<Vec<_>, _>>()?,
            delete_values_id: values.delete_values_id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ServerId;

    fn changeset_with_pending_leaf() -> Changeset {
        let leaf = Leaf::new(Identity::local("V2"))
            .with_field("label", "C")
            .with_assets("icon", vec![AssetRef::pending(vec![0xde, 0xad])]);
        let mut changeset = Changeset::default();
        changeset.values.insert(
            ServerId::new("F1"),
            ValueDiff {
                create_values: vec![leaf],
                ..Default::default()
            },
        );
        changeset
    }

    #[test]
    fn test_symbolic_key_format() {
        assert_eq!(symbolic_key(&Identity::local("V2"), "icon", 0), "V2:icon_0");
        assert_eq!(
            symbolic_key(&Identity::existing("99"), "gallery", 3),
            "99:gallery_3"
        );
    }

    #[test]
    fn test_pending_binary_gets_key() {
        let (structured, parts) = extract(&changeset_with_pending_leaf()).unwrap();

        assert_eq!(parts.len(), 1);
        assert_eq!(parts["V2:icon_0"], vec![0xde, 0xad]);

        let leaf = &structured.values[&ServerId::new("F1")].create_values[0];
        assert_eq!(leaf.assets["icon"], vec!["V2:icon_0".to_string()]);
    }

    #[test]
    fn test_hosted_paths_pass_through_and_keep_positions() {
        let group = Group::new(Identity::existing("F1")).with_assets(
            "gallery",
            vec![
                AssetRef::hosted("/assets/a.png"),
                AssetRef::pending(vec![1]),
                AssetRef::hosted("/assets/b.png"),
                AssetRef::pending(vec![2]),
            ],
        );
        let changeset = Changeset {
            update_groups: vec![group],
            ..Default::default()
        };

        let (structured, parts) = extract(&changeset).unwrap();
        assert_eq!(
            structured.update_groups[0].assets["gallery"],
            vec!["/assets/a.png", "F1:gallery_1", "/assets/b.png", "F1:gallery_3"]
        );
        assert_eq!(parts.keys().collect::<Vec<_>>(), vec!["F1:gallery_1", "F1:gallery_3"]);
    }

    #[test]
    fn test_embedded_leaves_of_new_group_are_extracted() {
        let group = Group::new(Identity::local("G1"))
            .with_assets("banner", vec![AssetRef::pending(vec![9])])
            .with_leaf(
                Leaf::new(Identity::local("L1"))
                    .with_assets("icon", vec![AssetRef::pending(vec![1])]),
            )
            .with_leaf(
                Leaf::new(Identity::local("L2"))
                    .with_assets("icon", vec![AssetRef::pending(vec![2])]),
            );
        let changeset = Changeset {
            create_groups: vec![group],
            ..Default::default()
        };

        let (structured, parts) = extract(&changeset).unwrap();
        assert_eq!(parts.len(), 3);
        assert!(parts.contains_key("G1:banner_0"));
        assert!(parts.contains_key("L1:icon_0"));
        assert!(parts.contains_key("L2:icon_0"));

        // Every key in the structured diff resolves to a part
        for value in structured.asset_strings() {
            assert!(parts.contains_key(value));
        }
    }

    #[test]
    fn test_keys_are_unique_across_a_submission() {
        let mut changeset = changeset_with_pending_leaf();
        changeset.create_groups.push(
            Group::new(Identity::local("G1"))
                .with_assets("icon", vec![AssetRef::pending(vec![1]), AssetRef::pending(vec![2])]),
        );

        let (structured, parts) = extract(&changeset).unwrap();
        let strings = structured.asset_strings();
        let mut deduped = strings.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(strings.len(), deduped.len());
        assert_eq!(parts.len(), 3);
    }

    #[test]
    fn test_duplicate_ids_collide() {
        let leaf = Leaf::new(Identity::local("dup"))
            .with_assets("icon", vec![AssetRef::pending(vec![1])]);
        let mut changeset = Changeset::default();
        changeset.values.insert(
            ServerId::new("F1"),
            ValueDiff {
                create_values: vec![leaf.clone(), leaf],
                ..Default::default()
            },
        );

        assert_eq!(
            extract(&changeset),
            Err(ExtractError::KeyCollision("dup:icon_0".to_string()))
        );
    }

    #[test]
    fn test_hosted_path_matching_a_key_collides() {
        let leaf = Leaf::new(Identity::local("V2")).with_assets(
            "icon",
            vec![AssetRef::pending(vec![1]), AssetRef::hosted("V2:icon_0")],
        );
        let mut changeset = Changeset::default();
        changeset.values.insert(
            ServerId::new("F1"),
            ValueDiff {
                create_values: vec![leaf],
                ..Default::default()
            },
        );

        assert_eq!(
            extract(&changeset),
            Err(ExtractError::KeyCollision("V2:icon_0".to_string()))
        );

        // Without the pending element the same path is just a hosted string
        let hosted_only = Changeset {
            update_groups: vec![Group::new(Identity::existing("F1"))
                .with_assets("icon", vec![AssetRef::hosted("V2:icon_0")])],
            ..Default::default()
        };
        let (_, parts) = extract(&hosted_only).unwrap();
        assert!(parts.is_empty());
    }

    #[test]
    fn test_no_binary_in_structured_json() {
        let (structured, _) = extract(&changeset_with_pending_leaf()).unwrap();
        let json = serde_json::to_value(&structured).unwrap();
        let text = json.to_string();
        assert!(!text.contains("pending"));
        assert!(text.contains("\"V2:icon_0\""));
    }
}
