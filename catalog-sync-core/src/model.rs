//! The two-level entity tree: a [`Root`] owns [`Group`]s, each group owns
//! [`Leaf`]s (e.g. product → feature → value).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::asset::{AssetRef, AssetSlots};
use crate::identity::{Identity, ServerId};

/// Scalar fields of an entity.
pub type Fields = serde_json::Map<String, Value>;

fn is_false(value: &bool) -> bool {
    !*value
}

/// Common surface of groups and leaves.
pub trait Entity {
    fn identity(&self) -> &Identity;

    fn is_dirty(&self) -> bool;

    fn set_dirty(&mut self, dirty: bool);

    fn fields(&self) -> &Fields;

    fn assets(&self) -> &AssetSlots;

    /// Compares fields and asset slots only; children are not part of an
    /// entity's own content.
    fn content_eq(&self, other: &Self) -> bool
    where
        Self: Sized,
    {
        self.fields() == other.fields() && self.assets() == other.assets()
    }
}

/// Terminal entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leaf {
    pub id: Identity,
    #[serde(default, skip_serializing_if = "is_false")]
    pub dirty: bool,
    #[serde(default)]
    pub fields: Fields,
    #[serde(default, skip_serializing_if = "AssetSlots::is_empty")]
    pub assets: AssetSlots,
}

impl Leaf {
    pub fn new(id: Identity) -> Self {
        Self {
            id,
            dirty: false,
            fields: Fields::new(),
            assets: AssetSlots::new(),
        }
    }

    /// A locally created leaf with a generated placeholder id.
    pub fn create() -> Self {
        Self::new(Identity::new_local())
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn with_assets(mut self, slot: impl Into<String>, assets: Vec<AssetRef>) -> Self {
        self.assets.insert(slot.into(), assets);
        self
    }

    pub fn with_dirty(mut self, dirty: bool) -> Self {
        self.dirty = dirty;
        self
    }

    /// Sets a field and marks the leaf dirty.
    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
        self.dirty = true;
    }

    /// Appends to an asset slot and marks the leaf dirty.
    pub fn push_asset(&mut self, slot: impl Into<String>, asset: AssetRef) {
        self.assets.entry(slot.into()).or_default().push(asset);
        self.dirty = true;
    }
}

impl Entity for Leaf {
    fn identity(&self) -> &Identity {
        &self.id
    }

    fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
    }

    fn fields(&self) -> &Fields {
        &self.fields
    }

    fn assets(&self) -> &AssetSlots {
        &self.assets
    }
}

/// Entity owning an ordered collection of leaves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: Identity,
    #[serde(default, skip_serializing_if = "is_false")]
    pub dirty: bool,
    #[serde(default)]
    pub fields: Fields,
    #[serde(default, skip_serializing_if = "AssetSlots::is_empty")]
    pub assets: AssetSlots,
    #[serde(default)]
    pub leaves: Vec<Leaf>,
}

impl Group {
    pub fn new(id: Identity) -> Self {
        Self {
            id,
            dirty: false,
            fields: Fields::new(),
            assets: AssetSlots::new(),
            leaves: Vec::new(),
        }
    }

    /// A locally created group with a generated placeholder id.
    pub fn create() -> Self {
        Self::new(Identity::new_local())
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn with_assets(mut self, slot: impl Into<String>, assets: Vec<AssetRef>) -> Self {
        self.assets.insert(slot.into(), assets);
        self
    }

    pub fn with_leaf(mut self, leaf: Leaf) -> Self {
        self.leaves.push(leaf);
        self
    }

    pub fn with_dirty(mut self, dirty: bool) -> Self {
        self.dirty = dirty;
        self
    }

    /// Sets a field and marks the group dirty.
    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
        self.dirty = true;
    }

    pub fn leaf(&self, id: &Identity) -> Option<&Leaf> {
        self.leaves.iter().find(|leaf| &leaf.id == id)
    }

    pub fn leaf_mut(&mut self, id: &Identity) -> Option<&mut Leaf> {
        self.leaves.iter_mut().find(|leaf| &leaf.id == id)
    }

    /// Removes a leaf, returning it if it was present.
    pub fn remove_leaf(&mut self, id: &Identity) -> Option<Leaf> {
        let index = self.leaves.iter().position(|leaf| &leaf.id == id)?;
        Some(self.leaves.remove(index))
    }

    /// Copy of the group's own content with no leaves.
    pub fn without_leaves(&self) -> Group {
        Group {
            id: self.id.clone(),
            dirty: self.dirty,
            fields: self.fields.clone(),
            assets: self.assets.clone(),
            leaves: Vec::new(),
        }
    }
}

impl Entity for Group {
    fn identity(&self) -> &Identity {
        &self.id
    }

    fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
    }

    fn fields(&self) -> &Fields {
        &self.fields
    }

    fn assets(&self) -> &AssetSlots {
        &self.assets
    }
}

/// Aggregate owning the groups. Only its children are diffed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Root {
    pub id: Identity,
    #[serde(default)]
    pub groups: Vec<Group>,
}

impl Root {
    pub fn new(id: Identity) -> Self {
        Self {
            id,
            groups: Vec::new(),
        }
    }

    pub fn with_group(mut self, group: Group) -> Self {
        self.groups.push(group);
        self
    }

    /// The server id, once the root has been persisted.
    pub fn server_id(&self) -> Option<&ServerId> {
        self.id.server_id()
    }

    pub fn group(&self, id: &Identity) -> Option<&Group> {
        self.groups.iter().find(|group| &group.id == id)
    }

    pub fn group_mut(&mut self, id: &Identity) -> Option<&mut Group> {
        self.groups.iter_mut().find(|group| &group.id == id)
    }

    /// Removes a group, returning it if it was present.
    pub fn remove_group(&mut self, id: &Identity) -> Option<Group> {
        let index = self.groups.iter().position(|group| &group.id == id)?;
        Some(self.groups.remove(index))
    }

    /// Clears every dirty flag in the tree.
    pub fn clear_dirty(&mut self) {
        for group in &mut self.groups {
            group.dirty = false;
            for leaf in &mut group.leaves {
                leaf.dirty = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_root() -> Root {
        Root::new(Identity::existing("P1")).with_group(
            Group::new(Identity::existing("F1"))
                .with_field("name", "Color")
                .with_leaf(Leaf::new(Identity::existing("V1")).with_field("label", "Red")),
        )
    }

    #[test]
    fn test_set_field_marks_dirty() {
        let mut leaf = Leaf::new(Identity::existing("V1")).with_field("label", "A");
        assert!(!leaf.dirty);
        leaf.set_field("label", "B");
        assert!(leaf.dirty);
        assert_eq!(leaf.fields["label"], "B");
    }

    #[test]
    fn test_content_eq_ignores_dirty_and_children() {
        let a = Group::new(Identity::existing("F1"))
            .with_field("name", "Size")
            .with_leaf(Leaf::create());
        let b = Group::new(Identity::existing("F1"))
            .with_field("name", "Size")
            .with_dirty(true);
        assert!(a.content_eq(&b));

        let c = b.clone().with_field("name", "Width");
        assert!(!a.content_eq(&c));
    }

    #[test]
    fn test_group_and_leaf_lookup() {
        let mut root = sample_root();
        let f1 = Identity::existing("F1");
        let v1 = Identity::existing("V1");

        assert!(root.group(&f1).is_some());
        assert_eq!(root.group(&f1).unwrap().leaf(&v1).unwrap().fields["label"], "Red");

        let removed = root.group_mut(&f1).unwrap().remove_leaf(&v1);
        assert!(removed.is_some());
        assert!(root.group(&f1).unwrap().leaves.is_empty());

        assert!(root.remove_group(&f1).is_some());
        assert!(root.groups.is_empty());
    }

    #[test]
    fn test_clear_dirty() {
        let mut root = sample_root();
        root.groups[0].dirty = true;
        root.groups[0].leaves[0].dirty = true;
        root.clear_dirty();
        assert!(!root.groups[0].dirty);
        assert!(!root.groups[0].leaves[0].dirty);
    }

    #[test]
    fn test_tree_json_roundtrip_skips_clean_flags() {
        let root = sample_root();
        let json = serde_json::to_string(&root).unwrap();
        assert!(!json.contains("dirty"));
        let parsed: Root = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, root);
    }
}
