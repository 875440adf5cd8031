//! Two-level collection diff between a baseline and a working copy.
//!
//! Groups are split into create / update / delete sets. Leaves are diffed
//! only for groups that exist in both trees; leaves of a brand-new group
//! travel embedded in `create_groups`.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::{classify, Classification, Identity, LocalId, ServerId};
use crate::model::{Entity, Group, Leaf, Root};

/// How a matched entity is judged to have changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeDetection {
    /// Compare own content against the baseline counterpart
    #[default]
    Structural,
    /// Trust the entity's `dirty` flag
    DirtyFlag,
}

impl ChangeDetection {
    fn is_changed<E: Entity>(self, baseline: &E, working: &E) -> bool {
        match self {
            ChangeDetection::Structural => !baseline.content_eq(working),
            ChangeDetection::DirtyFlag => working.is_dirty(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffOptions {
    pub detection: ChangeDetection,
}

/// Leaf-level diff for one group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValueDiff {
    #[serde(default)]
    pub create_values: Vec<Leaf>,
    #[serde(default)]
    pub update_values: Vec<Leaf>,
    #[serde(default)]
    pub delete_values_id: Vec<ServerId>,
}

impl ValueDiff {
    pub fn is_empty(&self) -> bool {
        self.create_values.is_empty()
            && self.update_values.is_empty()
            && self.delete_values_id.is_empty()
    }
}

/// Minimal description of what changed between two trees.
///
/// Entries in `update_groups` carry the group's own content only; their leaf
/// changes live under `values`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Changeset {
    #[serde(default)]
    pub create_groups: Vec<Group>,
    #[serde(default)]
    pub update_groups: Vec<Group>,
    #[serde(default)]
    pub delete_group_ids: Vec<ServerId>,
    #[serde(default)]
    pub values: BTreeMap<ServerId, ValueDiff>,
}

impl Changeset {
    /// True for the canonical empty changeset; no round-trip is needed.
    pub fn is_empty(&self) -> bool {
        self.create_groups.is_empty()
            && self.update_groups.is_empty()
            && self.delete_group_ids.is_empty()
            && self.values.values().all(ValueDiff::is_empty)
    }

    /// Total number of entity entries across all buckets.
    pub fn entry_count(&self) -> usize {
        self.create_groups.len()
            + self.update_groups.len()
            + self.delete_group_ids.len()
            + self
                .values
                .values()
                .map(|v| v.create_values.len() + v.update_values.len() + v.delete_values_id.len())
                .sum::<usize>()
    }
}

/// An Existing entity that cannot be resolved against the baseline.
///
/// This always indicates a bug in the caller's state management.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("Group {0} is marked existing but is not in the baseline")]
    GroupNotInBaseline(ServerId),

    #[error("Leaf {leaf} is marked existing but is not in baseline group {group}")]
    LeafNotInBaseline { group: ServerId, leaf: ServerId },

    #[error("New group {group} contains existing leaf {leaf}")]
    ExistingLeafInNewGroup { group: LocalId, leaf: ServerId },

    #[error("Entity id {0} appears more than once in the working copy")]
    DuplicateId(String),
}

/// Diffs with the default options.
pub fn diff(baseline: &Root, working: &Root) -> Changeset {
    diff_with(baseline, working, DiffOptions::default())
}

pub fn diff_with(baseline: &Root, working: &Root, options: DiffOptions) -> Changeset {
    let baseline_groups = index_by_server_id(&baseline.groups);
    let mut matched: HashSet<&ServerId> = HashSet::new();
    let mut changeset = Changeset::default();

    for group in &working.groups {
        match classify(group) {
            Classification::New(_) => changeset.create_groups.push(group.clone()),
            Classification::Existing(id) => {
                let Some(base) = baseline_groups.get(id) else {
                    tracing::error!(group = %id, "existing group missing from baseline, skipping");
                    continue;
                };
                if !matched.insert(id) {
                    tracing::error!(group = %id, "duplicate group in working copy, skipping");
                    continue;
                }

                if options.detection.is_changed(*base, group) {
                    changeset.update_groups.push(group.without_leaves());
                }

                let values = diff_leaves(id, base, group, options);
                if !values.is_empty() {
                    changeset.values.insert(id.clone(), values);
                }
            }
        }
    }

    for base in &baseline.groups {
        if let Some(id) = base.id.server_id() {
            if !matched.contains(id) {
                changeset.delete_group_ids.push(id.clone());
            }
        }
    }

    tracing::debug!(
        create = changeset.create_groups.len(),
        update = changeset.update_groups.len(),
        delete = changeset.delete_group_ids.len(),
        value_groups = changeset.values.len(),
        "computed changeset"
    );

    changeset
}

fn diff_leaves(group_id: &ServerId, baseline: &Group, working: &Group, options: DiffOptions) -> ValueDiff {
    let baseline_leaves = index_by_server_id(&baseline.leaves);
    let mut matched: HashSet<&ServerId> = HashSet::new();
    let mut values = ValueDiff::default();

    for leaf in &working.leaves {
        match classify(leaf) {
            Classification::New(_) => values.create_values.push(leaf.clone()),
            Classification::Existing(id) => {
                let Some(base) = baseline_leaves.get(id) else {
                    tracing::error!(
                        group = %group_id,
                        leaf = %id,
                        "existing leaf missing from baseline group, skipping"
                    );
                    continue;
                };
                if !matched.insert(id) {
                    tracing::error!(group = %group_id, leaf = %id, "duplicate leaf, skipping");
                    continue;
                }
                if options.detection.is_changed(*base, leaf) {
                    values.update_values.push(leaf.clone());
                }
            }
        }
    }

    for base in &baseline.leaves {
        if let Some(id) = base.id.server_id() {
            if !matched.contains(id) {
                values.delete_values_id.push(id.clone());
            }
        }
    }

    values
}

fn index_by_server_id<E: Entity>(entities: &[E]) -> HashMap<&ServerId, &E> {
    entities
        .iter()
        .filter_map(|entity| entity.identity().server_id().map(|id| (id, entity)))
        .collect()
}

/// Checks that every Existing entity in `working` resolves against
/// `baseline`, and that no id is used twice among siblings.
///
/// Group ids and leaf ids live in separate namespaces, and each group's
/// leaves are checked on their own.
pub fn check_invariants(baseline: &Root, working: &Root) -> Result<(), InvariantViolation> {
    let baseline_groups = index_by_server_id(&baseline.groups);
    let mut seen_groups: HashSet<&Identity> = HashSet::new();

    for group in &working.groups {
        if !seen_groups.insert(&group.id) {
            return Err(InvariantViolation::DuplicateId(group.id.to_string()));
        }
        let mut seen_leaves: HashSet<&Identity> = HashSet::new();

        match classify(group) {
            Classification::New(local) => {
                for leaf in &group.leaves {
                    if !seen_leaves.insert(&leaf.id) {
                        return Err(InvariantViolation::DuplicateId(leaf.id.to_string()));
                    }
                    if let Some(leaf_id) = leaf.id.server_id() {
                        return Err(InvariantViolation::ExistingLeafInNewGroup {
                            group: local.clone(),
                            leaf: leaf_id.clone(),
                        });
                    }
                }
            }
            Classification::Existing(id) => {
                let base = baseline_groups
                    .get(id)
                    .ok_or_else(|| InvariantViolation::GroupNotInBaseline(id.clone()))?;
                let baseline_leaves = index_by_server_id(&base.leaves);

                for leaf in &group.leaves {
                    if !seen_leaves.insert(&leaf.id) {
                        return Err(InvariantViolation::DuplicateId(leaf.id.to_string()));
                    }
                    if let Some(leaf_id) = leaf.id.server_id() {
                        if !baseline_leaves.contains_key(leaf_id) {
                            return Err(InvariantViolation::LeafNotInBaseline {
                                group: id.clone(),
                                leaf: leaf_id.clone(),
                            });
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(id: &str, label: &str) -> Leaf {
        Leaf::new(Identity::existing(id)).with_field("label", label)
    }

    fn group(id: &str, leaves: Vec<Leaf>) -> Group {
        let mut group = Group::new(Identity::existing(id)).with_field("name", id);
        group.leaves = leaves;
        group
    }

    fn root(groups: Vec<Group>) -> Root {
        let mut root = Root::new(Identity::existing("P1"));
        root.groups = groups;
        root
    }

    fn sample() -> Root {
        root(vec![
            group("F1", vec![leaf("V1", "A"), leaf("V2", "B")]),
            group("F2", vec![leaf("V3", "C")]),
        ])
    }

    #[test]
    fn test_diff_identical_is_empty() {
        let tree = sample();
        let changeset = diff(&tree, &tree);
        assert!(changeset.is_empty());
        assert_eq!(changeset, Changeset::default());
    }

    #[test]
    fn test_diff_is_deterministic() {
        let baseline = sample();
        let mut working = sample();
        working.groups[0].leaves[0].set_field("label", "Z");
        working.groups[1].leaves.clear();
        working.groups.push(Group::new(Identity::local("N1")));

        assert_eq!(diff(&baseline, &working), diff(&baseline, &working));
    }

    #[test]
    fn test_minimal_update() {
        let baseline = sample();
        let mut working = sample();
        working.groups[1].leaves[0].set_field("label", "changed");

        let changeset = diff(&baseline, &working);
        assert!(changeset.create_groups.is_empty());
        assert!(changeset.update_groups.is_empty());
        assert!(changeset.delete_group_ids.is_empty());
        assert_eq!(changeset.values.len(), 1);

        let values = &changeset.values[&ServerId::new("F2")];
        assert_eq!(values.update_values.len(), 1);
        assert_eq!(values.update_values[0].id, Identity::existing("V3"));
        assert!(values.create_values.is_empty());
        assert!(values.delete_values_id.is_empty());
        assert_eq!(changeset.entry_count(), 1);
    }

    #[test]
    fn test_scenario_update_and_create_in_existing_group() {
        let baseline = root(vec![group("F1", vec![leaf("V1", "A")])]);
        let mut working = baseline.clone();
        working.groups[0].leaves[0].set_field("label", "B");
        working.groups[0]
            .leaves
            .push(Leaf::new(Identity::local("V2")).with_field("label", "C"));

        let changeset = diff(&baseline, &working);
        assert!(changeset.create_groups.is_empty());
        assert!(changeset.update_groups.is_empty());
        assert!(changeset.delete_group_ids.is_empty());

        let values = &changeset.values[&ServerId::new("F1")];
        assert_eq!(values.update_values.len(), 1);
        assert_eq!(values.update_values[0].fields["label"], "B");
        assert_eq!(values.create_values.len(), 1);
        assert_eq!(values.create_values[0].id, Identity::local("V2"));
        assert!(values.delete_values_id.is_empty());
    }

    #[test]
    fn test_scenario_dropped_group() {
        let baseline = root(vec![group("F1", vec![leaf("V1", "A")])]);
        let working = root(vec![]);

        let changeset = diff(&baseline, &working);
        assert_eq!(changeset.delete_group_ids, vec![ServerId::new("F1")]);
        assert!(!changeset.values.contains_key(&ServerId::new("F1")));
        assert!(changeset.create_groups.is_empty());
        assert!(changeset.update_groups.is_empty());
    }

    #[test]
    fn test_delete_exclusivity() {
        let baseline = sample();
        let mut working = sample();
        working.groups[0].remove_leaf(&Identity::existing("V2"));

        let changeset = diff(&baseline, &working);
        let values = &changeset.values[&ServerId::new("F1")];
        let v2 = ServerId::new("V2");
        assert_eq!(values.delete_values_id, vec![v2.clone()]);
        assert!(values.update_values.iter().all(|l| l.id.server_id() != Some(&v2)));
        assert!(values.create_values.iter().all(|l| l.id.server_id() != Some(&v2)));
    }

    #[test]
    fn test_new_group_embeds_leaves() {
        let baseline = sample();
        let mut working = sample();
        let new_group = Group::new(Identity::local("G-new"))
            .with_field("name", "Material")
            .with_leaf(Leaf::new(Identity::local("L1")).with_field("label", "Wood"))
            .with_leaf(Leaf::new(Identity::local("L2")).with_field("label", "Steel"));
        working.groups.push(new_group);

        let changeset = diff(&baseline, &working);
        assert_eq!(changeset.create_groups.len(), 1);
        assert_eq!(changeset.create_groups[0].leaves.len(), 2);
        assert!(changeset.values.is_empty());
        assert!(changeset.delete_group_ids.is_empty());
    }

    #[test]
    fn test_update_group_strips_leaves() {
        let baseline = sample();
        let mut working = sample();
        working.groups[0].set_field("name", "Colour");

        let changeset = diff(&baseline, &working);
        assert_eq!(changeset.update_groups.len(), 1);
        assert!(changeset.update_groups[0].leaves.is_empty());
        assert!(changeset.values.is_empty());
    }

    #[test]
    fn test_dirty_flag_detection() {
        let baseline = sample();
        let mut working = sample();
        // Flagged but unchanged content
        working.groups[0].leaves[0].dirty = true;

        let structural = diff(&baseline, &working);
        assert!(structural.is_empty());

        let flagged = diff_with(
            &baseline,
            &working,
            DiffOptions {
                detection: ChangeDetection::DirtyFlag,
            },
        );
        assert_eq!(flagged.values[&ServerId::new("F1")].update_values.len(), 1);
    }

    #[test]
    fn test_dirty_flag_detection_ignores_unflagged_edits() {
        let baseline = sample();
        let mut working = sample();
        working.groups[0].leaves[0]
            .fields
            .insert("label".to_string(), "Q".into());

        let flagged = diff_with(
            &baseline,
            &working,
            DiffOptions {
                detection: ChangeDetection::DirtyFlag,
            },
        );
        assert!(flagged.is_empty());
    }

    #[test]
    fn test_orphan_existing_group_is_skipped() {
        let baseline = sample();
        let mut working = sample();
        working.groups.push(group("F9", vec![]));

        let changeset = diff(&baseline, &working);
        assert!(changeset.is_empty());
        assert_eq!(
            check_invariants(&baseline, &working),
            Err(InvariantViolation::GroupNotInBaseline(ServerId::new("F9")))
        );
    }

    #[test]
    fn test_check_invariants_leaf_errors() {
        let baseline = sample();

        let mut working = sample();
        working.groups[0].leaves.push(leaf("V3", "moved"));
        assert_eq!(
            check_invariants(&baseline, &working),
            Err(InvariantViolation::LeafNotInBaseline {
                group: ServerId::new("F1"),
                leaf: ServerId::new("V3"),
            })
        );

        let mut working = sample();
        working.groups[0].leaves.push(leaf("V1", "again"));
        assert_eq!(
            check_invariants(&baseline, &working),
            Err(InvariantViolation::DuplicateId("V1".into()))
        );

        let mut working = sample();
        working.groups.push(group("F1", vec![]));
        assert_eq!(
            check_invariants(&baseline, &working),
            Err(InvariantViolation::DuplicateId("F1".into()))
        );

        let mut working = sample();
        working
            .groups
            .push(Group::new(Identity::local("N1")).with_leaf(leaf("V7", "A")));
        assert!(matches!(
            check_invariants(&baseline, &working),
            Err(InvariantViolation::ExistingLeafInNewGroup { .. })
        ));

        assert!(check_invariants(&baseline, &sample()).is_ok());
    }

    #[test]
    fn test_group_and_leaf_may_share_an_id() {
        let baseline = root(vec![group("1", vec![leaf("1", "A")])]);
        let mut working = baseline.clone();
        working.groups[0].leaves[0].set_field("label", "B");

        assert!(check_invariants(&baseline, &working).is_ok());
        let changeset = diff(&baseline, &working);
        assert_eq!(changeset.values[&ServerId::new("1")].update_values.len(), 1);
    }

    #[test]
    fn test_new_entities_never_deleted() {
        let mut baseline = sample();
        // A stray placeholder in the baseline must not produce a delete
        baseline.groups.push(Group::new(Identity::local("ghost")));
        let working = sample();

        let changeset = diff(&baseline, &working);
        assert!(changeset.delete_group_ids.is_empty());
    }
}
