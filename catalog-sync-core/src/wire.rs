//! Wire types shared by the client and the receiving side.
//!
//! The structured diff mirrors [`Changeset`](crate::diff::Changeset) with every
//! asset slot flattened to strings: hosted paths or symbolic keys of binary
//! parts sent alongside.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::identity::{Identity, LocalId, ServerId};
use crate::model::{Fields, Root};

/// Asset slots as they appear on the wire.
pub type WireSlots = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireLeaf {
    pub id: Identity,
    #[serde(default)]
    pub fields: Fields,
    #[serde(default, skip_serializing_if = "WireSlots::is_empty")]
    pub assets: WireSlots,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireGroup {
    pub id: Identity,
    #[serde(default)]
    pub fields: Fields,
    #[serde(default, skip_serializing_if = "WireSlots::is_empty")]
    pub assets: WireSlots,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub leaves: Vec<WireLeaf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireValueDiff {
    #[serde(default)]
    pub create_values: Vec<WireLeaf>,
    #[serde(default)]
    pub update_values: Vec<WireLeaf>,
    #[serde(default)]
    pub delete_values_id: Vec<ServerId>,
}

/// JSON body of the `changeset` part.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredDiff {
    #[serde(default)]
    pub create_groups: Vec<WireGroup>,
    #[serde(default)]
    pub update_groups: Vec<WireGroup>,
    #[serde(default)]
    pub delete_group_ids: Vec<ServerId>,
    #[serde(default)]
    pub values: BTreeMap<ServerId, WireValueDiff>,
}

impl StructuredDiff {
    /// Every asset string in the diff, in traversal order.
    pub fn asset_strings(&self) -> Vec<&str> {
        fn slots_of<'a>(out: &mut Vec<&'a str>, slot_map: &'a WireSlots) {
            for slot in slot_map.values() {
                out.extend(slot.iter().map(String::as_str));
            }
        }

        let mut out = Vec::new();
        for group in self.create_groups.iter().chain(&self.update_groups) {
            slots_of(&mut out, &group.assets);
            for leaf in &group.leaves {
                slots_of(&mut out, &leaf.assets);
            }
        }
        for values in self.values.values() {
            for leaf in values.create_values.iter().chain(&values.update_values) {
                slots_of(&mut out, &leaf.assets);
            }
        }
        out
    }
}

/// Success payload of a submit: the server's canonical tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalTree {
    pub root: Root,
    /// Server id given to each New placeholder that was created
    #[serde(default)]
    pub assigned_ids: BTreeMap<LocalId, ServerId>,
}

impl CanonicalTree {
    pub fn new(root: Root) -> Self {
        Self {
            root,
            assigned_ids: BTreeMap::new(),
        }
    }

    /// Maps a working-copy identity to the identity it has after the submit.
    pub fn resolve(&self, id: &Identity) -> Identity {
        match id {
            Identity::New(local) => match self.assigned_ids.get(local) {
                Some(server) => Identity::Existing(server.clone()),
                None => id.clone(),
            },
            Identity::Existing(_) => id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_assigned_ids() {
        let mut canonical = CanonicalTree::new(Root::new(Identity::existing("P1")));
        canonical
            .assigned_ids
            .insert(LocalId::new("tmp"), ServerId::new("42"));

        assert_eq!(
            canonical.resolve(&Identity::local("tmp")),
            Identity::existing("42")
        );
        assert_eq!(
            canonical.resolve(&Identity::local("other")),
            Identity::local("other")
        );
        assert_eq!(
            canonical.resolve(&Identity::existing("7")),
            Identity::existing("7")
        );
    }

    #[test]
    fn test_asset_strings_collects_all_slots() {
        let mut assets = WireSlots::new();
        assets.insert("icon".to_string(), vec!["V2:icon_0".to_string()]);
        let mut diff = StructuredDiff::default();
        diff.values.insert(
            ServerId::new("F1"),
            WireValueDiff {
                create_values: vec![WireLeaf {
                    id: Identity::local("V2"),
                    fields: Fields::new(),
                    assets,
                }],
                ..Default::default()
            },
        );

        assert_eq!(diff.asset_strings(), vec!["V2:icon_0"]);
    }

    #[test]
    fn test_canonical_tree_defaults_assigned_ids() {
        let json = r#"{"root":{"id":{"existing":"P1"},"groups":[]}}"#;
        let canonical: CanonicalTree = serde_json::from_str(json).unwrap();
        assert!(canonical.assigned_ids.is_empty());
    }
}
