//! Post-success reset of a working copy that was edited during a submit.
//!
//! Three trees are involved: `submitted` (the working copy the diff was
//! computed from), `current` (the working copy now, with in-flight edits) and
//! the server's canonical tree. For each entity in `current`:
//!
//! - New placeholders are rewritten to the server id the canonical tree
//!   assigned them.
//! - Entities untouched since the submit adopt the canonical content.
//! - Entities edited since the submit keep their local content and are
//!   marked dirty if that differs from the canonical content.
//!
//! Canonical entities absent from `current` are adopted unless they were
//! part of the submitted tree, i.e. deleted locally while in flight.
//!
//! An Existing entity in `current` that the canonical tree no longer has
//! (restored by a rollback while its deletion was in flight) gets a fresh
//! placeholder id and is marked dirty, so the next sync re-creates it. A
//! re-identified group takes all of its leaves with it.

use std::collections::{HashMap, HashSet};

use crate::identity::{Identity, ServerId};
use crate::model::{Entity, Group, Leaf, Root};
use crate::wire::CanonicalTree;

pub fn rebase(submitted: &Root, current: &Root, canonical: &CanonicalTree) -> Root {
    let canonical_groups: HashMap<&ServerId, &Group> = by_server_id(&canonical.root.groups);
    let submitted_groups: HashMap<&Identity, &Group> =
        submitted.groups.iter().map(|g| (&g.id, g)).collect();

    let mut present: HashSet<ServerId> = HashSet::new();
    let mut groups = Vec::with_capacity(current.groups.len());

    for group in &current.groups {
        let id = canonical.resolve(&group.id);
        let canon = id.server_id().and_then(|sid| canonical_groups.get(sid).copied());
        let sent = submitted_groups.get(&group.id).copied();
        if let Some(sid) = id.server_id() {
            if canon.is_none() {
                groups.push(reidentify_group(group));
                continue;
            }
            present.insert(sid.clone());
        }

        let mut rebased = merge_entity(group, sent, canon, id.clone(), |g| g.without_leaves());
        rebased.leaves = rebase_leaves(group, sent, canon, canonical);
        groups.push(rebased);
    }

    let sent_ids = resolved_ids(submitted.groups.iter().map(|g| &g.id), canonical);
    for canon in &canonical.root.groups {
        let Some(sid) = canon.id.server_id() else {
            continue;
        };
        if !present.contains(sid) && !sent_ids.contains(sid) {
            groups.push(canon.clone());
        }
    }

    Root {
        id: canonical.root.id.clone(),
        groups,
    }
}

fn rebase_leaves(
    group: &Group,
    sent: Option<&Group>,
    canon: Option<&Group>,
    canonical: &CanonicalTree,
) -> Vec<Leaf> {
    let canonical_leaves: HashMap<&ServerId, &Leaf> =
        canon.map(|g| by_server_id(&g.leaves)).unwrap_or_default();
    let sent_leaves: HashMap<&Identity, &Leaf> = sent
        .map(|g| g.leaves.iter().map(|l| (&l.id, l)).collect())
        .unwrap_or_default();

    let mut present: HashSet<ServerId> = HashSet::new();
    let mut leaves = Vec::with_capacity(group.leaves.len());

    for leaf in &group.leaves {
        let id = canonical.resolve(&leaf.id);
        let canon_leaf = id.server_id().and_then(|sid| canonical_leaves.get(sid).copied());
        if let Some(sid) = id.server_id() {
            if canon_leaf.is_none() {
                leaves.push(reidentify_leaf(leaf));
                continue;
            }
            present.insert(sid.clone());
        }
        let sent_leaf = sent_leaves.get(&leaf.id).copied();
        leaves.push(merge_entity(leaf, sent_leaf, canon_leaf, id, Leaf::clone));
    }

    if let Some(canon) = canon {
        let sent_ids = resolved_ids(
            sent.into_iter().flat_map(|g| g.leaves.iter().map(|l| &l.id)),
            canonical,
        );
        for leaf in &canon.leaves {
            let Some(sid) = leaf.id.server_id() else {
                continue;
            };
            if !present.contains(sid) && !sent_ids.contains(sid) {
                leaves.push(leaf.clone());
            }
        }
    }

    leaves
}

fn reidentify_leaf(leaf: &Leaf) -> Leaf {
    tracing::debug!(leaf = %leaf.id, "entity gone from server, re-creating");
    let mut leaf = leaf.clone();
    leaf.id = Identity::new_local();
    leaf.dirty = true;
    leaf
}

fn reidentify_group(group: &Group) -> Group {
    tracing::debug!(group = %group.id, "entity gone from server, re-creating");
    let mut rebased = group.without_leaves();
    rebased.id = Identity::new_local();
    rebased.dirty = true;
    rebased.leaves = group.leaves.iter().map(reidentify_leaf).collect();
    rebased
}

/// Picks the content for one entity and fixes up its id and dirty flag.
fn merge_entity<E, F>(
    current: &E,
    sent: Option<&E>,
    canon: Option<&E>,
    id: Identity,
    copy: F,
) -> E
where
    E: Entity + Clone + HasId,
    F: Fn(&E) -> E,
{
    let untouched = sent.is_some_and(|sent| sent.content_eq(current));
    let mut merged = match canon {
        Some(canon) if untouched => {
            let mut adopted = copy(canon);
            adopted.set_dirty(false);
            adopted
        }
        Some(canon) => {
            let mut kept = copy(current);
            kept.set_dirty(!canon.content_eq(current));
            kept
        }
        None => copy(current),
    };
    merged.set_id(id);
    merged
}

/// Identity setter shared by groups and leaves.
trait HasId {
    fn set_id(&mut self, id: Identity);
}

impl HasId for Group {
    fn set_id(&mut self, id: Identity) {
        self.id = id;
    }
}

impl HasId for Leaf {
    fn set_id(&mut self, id: Identity) {
        self.id = id;
    }
}

fn by_server_id<E: Entity>(entities: &[E]) -> HashMap<&ServerId, &E> {
    entities
        .iter()
        .filter_map(|e| e.identity().server_id().map(|id| (id, e)))
        .collect()
}

fn resolved_ids<'a>(
    ids: impl Iterator<Item = &'a Identity>,
    canonical: &CanonicalTree,
) -> HashSet<ServerId> {
    ids.filter_map(|id| canonical.resolve(id).server_id().cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::LocalId;

    fn leaf(id: &str, label: &str) -> Leaf {
        Leaf::new(Identity::existing(id)).with_field("label", label)
    }

    fn tree(groups: Vec<Group>) -> Root {
        let mut root = Root::new(Identity::existing("P1"));
        root.groups = groups;
        root
    }

    #[test]
    fn test_untouched_entities_adopt_canonical() {
        let submitted = tree(vec![Group::new(Identity::existing("F1"))
            .with_leaf(leaf("V1", "B").with_dirty(true))
            .with_leaf(
                Leaf::new(Identity::local("tmp"))
                    .with_assets("icon", vec![crate::asset::AssetRef::pending(vec![1])]),
            )]);
        let current = submitted.clone();

        let mut canonical = CanonicalTree::new(tree(vec![Group::new(Identity::existing("F1"))
            .with_leaf(leaf("V1", "B"))
            .with_leaf(
                Leaf::new(Identity::existing("V2"))
                    .with_assets("icon", vec![crate::asset::AssetRef::hosted("/a/1")]),
            )]));
        canonical
            .assigned_ids
            .insert(LocalId::new("tmp"), ServerId::new("V2"));

        let rebased = rebase(&submitted, &current, &canonical);
        assert_eq!(rebased, canonical.root);
    }

    #[test]
    fn test_in_flight_edit_is_kept_and_dirty() {
        let submitted = tree(vec![Group::new(Identity::existing("F1"))
            .with_leaf(leaf("V1", "B"))
            .with_leaf(leaf("V2", "X"))]);
        let mut current = submitted.clone();
        current.groups[0].leaves[1].set_field("label", "Y");

        let canonical = CanonicalTree::new(submitted.clone());
        let rebased = rebase(&submitted, &current, &canonical);

        let v2 = rebased.groups[0].leaf(&Identity::existing("V2")).unwrap();
        assert_eq!(v2.fields["label"], "Y");
        assert!(v2.dirty);
        let v1 = rebased.groups[0].leaf(&Identity::existing("V1")).unwrap();
        assert!(!v1.dirty);
    }

    #[test]
    fn test_in_flight_edit_of_new_entity_gets_server_id() {
        let submitted = tree(vec![Group::new(Identity::existing("F1"))
            .with_leaf(Leaf::new(Identity::local("tmp")).with_field("label", "C"))]);
        let mut current = submitted.clone();
        current.groups[0].leaves[0].set_field("label", "D");

        let mut canonical = CanonicalTree::new(tree(vec![Group::new(Identity::existing("F1"))
            .with_leaf(leaf("V9", "C"))]));
        canonical
            .assigned_ids
            .insert(LocalId::new("tmp"), ServerId::new("V9"));

        let rebased = rebase(&submitted, &current, &canonical);
        let leaves = &rebased.groups[0].leaves;
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].id, Identity::existing("V9"));
        assert_eq!(leaves[0].fields["label"], "D");
        assert!(leaves[0].dirty);
    }

    #[test]
    fn test_deleted_in_flight_stays_deleted() {
        let submitted = tree(vec![
            Group::new(Identity::existing("F1")).with_leaf(leaf("V1", "A")),
            Group::new(Identity::existing("F2")),
        ]);
        let mut current = submitted.clone();
        current.groups[0].leaves.clear();
        current.remove_group(&Identity::existing("F2"));

        let canonical = CanonicalTree::new(submitted.clone());
        let rebased = rebase(&submitted, &current, &canonical);

        assert_eq!(rebased.groups.len(), 1);
        assert!(rebased.groups[0].leaves.is_empty());
    }

    #[test]
    fn test_rollback_during_submit_recreates_deleted_entities() {
        let baseline = tree(vec![
            Group::new(Identity::existing("F1"))
                .with_leaf(leaf("V1", "A"))
                .with_leaf(leaf("V2", "B")),
            Group::new(Identity::existing("F2")).with_leaf(leaf("V3", "C")),
        ]);
        let mut submitted = baseline.clone();
        submitted.groups[0].remove_leaf(&Identity::existing("V1"));
        submitted.remove_group(&Identity::existing("F2"));

        // Rolled back while the deletions were in flight
        let current = baseline.clone();
        let canonical = CanonicalTree::new(submitted.clone());
        let rebased = rebase(&submitted, &current, &canonical);

        let f1 = &rebased.groups[0];
        assert_eq!(f1.id, Identity::existing("F1"));
        assert!(f1.leaves[0].id.is_new());
        assert!(f1.leaves[0].dirty);
        assert_eq!(f1.leaves[0].fields["label"], "A");
        assert_eq!(f1.leaves[1].id, Identity::existing("V2"));

        let f2 = &rebased.groups[1];
        assert!(f2.id.is_new());
        assert!(f2.dirty);
        assert!(f2.leaves.iter().all(|l| l.id.is_new() && l.dirty));

        assert!(crate::diff::check_invariants(&canonical.root, &rebased).is_ok());
        let changeset = crate::diff::diff(&canonical.root, &rebased);
        assert_eq!(changeset.create_groups.len(), 1);
        assert_eq!(changeset.values[&ServerId::new("F1")].create_values.len(), 1);
    }

    #[test]
    fn test_added_in_flight_and_server_side_entities_are_kept() {
        let submitted = tree(vec![Group::new(Identity::existing("F1"))]);
        let mut current = submitted.clone();
        current.groups.push(Group::new(Identity::local("later")));

        let canonical = CanonicalTree::new(tree(vec![
            Group::new(Identity::existing("F1")).with_leaf(leaf("V5", "server")),
            Group::new(Identity::existing("F3")),
        ]));
        let rebased = rebase(&submitted, &current, &canonical);

        assert_eq!(rebased.groups.len(), 3);
        assert_eq!(rebased.groups[0].leaves.len(), 1);
        assert_eq!(rebased.groups[1].id, Identity::local("later"));
        assert_eq!(rebased.groups[2].id, Identity::existing("F3"));
    }
}
