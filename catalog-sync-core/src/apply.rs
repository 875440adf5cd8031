//! Receiving side: applies a decoded [`Changeset`] to a stored tree.
//!
//! The changeset is validated in full before anything is allocated or
//! stored, so a rejected changeset leaves no trace.

use std::collections::{BTreeMap, HashMap, HashSet};

use thiserror::Error;

use crate::asset::{AssetRef, AssetSlots};
use crate::diff::Changeset;
use crate::identity::{Identity, LocalId, ServerId};
use crate::model::{Group, Leaf, Root};
use crate::wire::CanonicalTree;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    #[error("Unknown group: {0}")]
    UnknownGroup(ServerId),

    #[error("Unknown leaf {leaf} in group {group}")]
    UnknownLeaf { group: ServerId, leaf: ServerId },

    #[error("Group {0} is both changed and deleted")]
    ChangeOfDeletedGroup(ServerId),

    #[error("Entity {0} is new and cannot be updated")]
    UpdateOfNewEntity(LocalId),

    #[error("Entity {0} already exists and cannot be created")]
    CreateOfExistingEntity(ServerId),

    #[error("Placeholder {0} is used more than once")]
    DuplicatePlaceholder(LocalId),

    #[error("Failed to store asset: {0}")]
    Asset(String),
}

impl ApplyError {
    /// Name of the offending entity, for per-field error reporting.
    pub fn subject(&self) -> String {
        match self {
            ApplyError::UnknownGroup(id) | ApplyError::ChangeOfDeletedGroup(id) => {
                format!("groups.{}", id)
            }
            ApplyError::UnknownLeaf { group, leaf } => format!("groups.{}.leaves.{}", group, leaf),
            ApplyError::UpdateOfNewEntity(id) | ApplyError::DuplicatePlaceholder(id) => {
                format!("entities.{}", id)
            }
            ApplyError::CreateOfExistingEntity(id) => format!("entities.{}", id),
            ApplyError::Asset(_) => "assets".to_string(),
        }
    }
}

/// Server-side hooks used while applying.
pub trait ApplyContext {
    /// Returns a fresh server id.
    fn allocate_id(&mut self) -> ServerId;

    /// Persists a pending binary and returns its hosted path.
    fn store_asset(&mut self, owner: &ServerId, slot: &str, bytes: &[u8])
        -> Result<String, ApplyError>;
}

/// In-memory context with sequential ids.
#[derive(Debug, Default)]
pub struct MemoryContext {
    next_id: u64,
    /// Hosted path → stored bytes
    pub stored: BTreeMap<String, Vec<u8>>,
}

impl MemoryContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts id allocation after `last`, so ids don't clash with a seeded tree.
    pub fn starting_after(last: u64) -> Self {
        Self {
            next_id: last,
            stored: BTreeMap::new(),
        }
    }
}

impl ApplyContext for MemoryContext {
    fn allocate_id(&mut self) -> ServerId {
        self.next_id += 1;
        ServerId::new(format!("srv-{}", self.next_id))
    }

    fn store_asset(
        &mut self,
        owner: &ServerId,
        slot: &str,
        bytes: &[u8],
    ) -> Result<String, ApplyError> {
        let path = format!("/memory/{}/{}/{}", owner, slot, self.stored.len());
        self.stored.insert(path.clone(), bytes.to_vec());
        Ok(path)
    }
}

/// Applies `changeset` to a copy of `stored` and returns the canonical tree.
pub fn apply_changeset<C: ApplyContext>(
    stored: &Root,
    changeset: Changeset,
    ctx: &mut C,
) -> Result<CanonicalTree, ApplyError> {
    validate(stored, &changeset)?;

    let deleted: HashSet<&ServerId> = changeset.delete_group_ids.iter().collect();
    let mut root = stored.clone();
    root.groups
        .retain(|group| group.id.server_id().map_or(true, |id| !deleted.contains(id)));

    for update in changeset.update_groups {
        let id = existing_id(&update.id)?;
        let assets = resolve_slots(ctx, &id, update.assets)?;
        let group = find_group(&mut root, &id)?;
        group.fields = update.fields;
        group.assets = assets;
    }

    let mut assigned_ids = BTreeMap::new();

    for (group_id, values) in changeset.values {
        let removed: HashSet<ServerId> = values.delete_values_id.into_iter().collect();
        find_group(&mut root, &group_id)?
            .leaves
            .retain(|leaf| leaf.id.server_id().map_or(true, |id| !removed.contains(id)));

        for update in values.update_values {
            let id = existing_id(&update.id)?;
            let assets = resolve_slots(ctx, &id, update.assets)?;
            let group = find_group(&mut root, &group_id)?;
            let leaf = group
                .leaf_mut(&update.id)
                .ok_or_else(|| ApplyError::UnknownLeaf {
                    group: group_id.clone(),
                    leaf: id.clone(),
                })?;
            leaf.fields = update.fields;
            leaf.assets = assets;
        }

        for created in values.create_values {
            let leaf = create_leaf(ctx, created, &mut assigned_ids)?;
            find_group(&mut root, &group_id)?.leaves.push(leaf);
        }
    }

    for created in changeset.create_groups {
        let local = new_id(&created.id)?;
        let id = ctx.allocate_id();
        assigned_ids.insert(local, id.clone());

        let mut group = Group::new(Identity::Existing(id.clone()));
        group.fields = created.fields;
        group.assets = resolve_slots(ctx, &id, created.assets)?;
        for leaf in created.leaves {
            group.leaves.push(create_leaf(ctx, leaf, &mut assigned_ids)?);
        }
        root.groups.push(group);
    }

    root.clear_dirty();

    tracing::debug!(
        root = %root.id,
        created = assigned_ids.len(),
        "applied changeset"
    );

    Ok(CanonicalTree { root, assigned_ids })
}

fn create_leaf<C: ApplyContext>(
    ctx: &mut C,
    created: Leaf,
    assigned_ids: &mut BTreeMap<LocalId, ServerId>,
) -> Result<Leaf, ApplyError> {
    let local = new_id(&created.id)?;
    let id = ctx.allocate_id();
    assigned_ids.insert(local, id.clone());

    let mut leaf = Leaf::new(Identity::Existing(id.clone()));
    leaf.fields = created.fields;
    leaf.assets = resolve_slots(ctx, &id, created.assets)?;
    Ok(leaf)
}

fn resolve_slots<C: ApplyContext>(
    ctx: &mut C,
    owner: &ServerId,
    slots: AssetSlots,
) -> Result<AssetSlots, ApplyError> {
    let mut resolved = AssetSlots::new();
    for (name, assets) in slots {
        let mut out = Vec::with_capacity(assets.len());
        for asset in assets {
            match asset {
                AssetRef::Hosted(path) => out.push(AssetRef::Hosted(path)),
                AssetRef::Pending(bytes) => {
                    out.push(AssetRef::Hosted(ctx.store_asset(owner, &name, &bytes)?))
                }
            }
        }
        resolved.insert(name, out);
    }
    Ok(resolved)
}

fn find_group<'a>(root: &'a mut Root, id: &ServerId) -> Result<&'a mut Group, ApplyError> {
    root.groups
        .iter_mut()
        .find(|group| group.id.server_id() == Some(id))
        .ok_or_else(|| ApplyError::UnknownGroup(id.clone()))
}

fn existing_id(id: &Identity) -> Result<ServerId, ApplyError> {
    match id {
        Identity::Existing(id) => Ok(id.clone()),
        Identity::New(local) => Err(ApplyError::UpdateOfNewEntity(local.clone())),
    }
}

fn new_id(id: &Identity) -> Result<LocalId, ApplyError> {
    match id {
        Identity::New(local) => Ok(local.clone()),
        Identity::Existing(id) => Err(ApplyError::CreateOfExistingEntity(id.clone())),
    }
}

fn validate(stored: &Root, changeset: &Changeset) -> Result<(), ApplyError> {
    let groups: HashMap<&ServerId, &Group> = stored
        .groups
        .iter()
        .filter_map(|group| group.id.server_id().map(|id| (id, group)))
        .collect();
    let deleted: HashSet<&ServerId> = changeset.delete_group_ids.iter().collect();
    let mut seen_placeholders: HashSet<LocalId> = HashSet::new();

    for id in &changeset.delete_group_ids {
        if !groups.contains_key(id) {
            return Err(ApplyError::UnknownGroup(id.clone()));
        }
    }

    for update in &changeset.update_groups {
        let id = existing_id(&update.id)?;
        if !groups.contains_key(&id) {
            return Err(ApplyError::UnknownGroup(id));
        }
        if deleted.contains(&id) {
            return Err(ApplyError::ChangeOfDeletedGroup(id));
        }
    }

    for (group_id, values) in &changeset.values {
        let group = groups
            .get(group_id)
            .ok_or_else(|| ApplyError::UnknownGroup(group_id.clone()))?;
        if deleted.contains(group_id) {
            return Err(ApplyError::ChangeOfDeletedGroup(group_id.clone()));
        }

        let leaf_ids: HashSet<&ServerId> = group
            .leaves
            .iter()
            .filter_map(|leaf| leaf.id.server_id())
            .collect();
        let unknown = |leaf: &ServerId| ApplyError::UnknownLeaf {
            group: group_id.clone(),
            leaf: leaf.clone(),
        };

        for leaf in &values.update_values {
            let id = existing_id(&leaf.id)?;
            if !leaf_ids.contains(&id) {
                return Err(unknown(&id));
            }
        }
        for id in &values.delete_values_id {
            if !leaf_ids.contains(id) {
                return Err(unknown(id));
            }
        }
        for leaf in &values.create_values {
            claim(&new_id(&leaf.id)?, &mut seen_placeholders)?;
        }
    }

    for group in &changeset.create_groups {
        claim(&new_id(&group.id)?, &mut seen_placeholders)?;
        for leaf in &group.leaves {
            claim(&new_id(&leaf.id)?, &mut seen_placeholders)?;
        }
    }

    Ok(())
}

fn claim(local: &LocalId, seen: &mut HashSet<LocalId>) -> Result<(), ApplyError> {
    if seen.insert(local.clone()) {
        Ok(())
    } else {
        Err(ApplyError::DuplicatePlaceholder(local.clone()))
    }
}
