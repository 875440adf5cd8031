//! Transport envelope: root id, structured diff JSON and binary parts.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::asset::{AssetRef, AssetSlots};
use crate::diff::{Changeset, ValueDiff};
use crate::extract::{extract, BinaryMap, ExtractError};
use crate::identity::ServerId;
use crate::model::{Group, Leaf};
use crate::wire::{StructuredDiff, WireGroup, WireLeaf, WireSlots};

/// Multipart field carrying the root id.
pub const ROOT_ID_FIELD: &str = "root_id";
/// Multipart field carrying the structured diff.
pub const CHANGESET_FIELD: &str = "changeset";

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("Invalid structured diff: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Binary part {0} is not referenced by the structured diff")]
    OrphanPart(String),

    #[error("Binary part name {0} is reserved")]
    ReservedPartName(String),
}

/// Everything a single submit sends.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportEnvelope {
    pub root_id: ServerId,
    /// JSON-encoded [`StructuredDiff`]
    pub structured_diff: String,
    pub binary_parts: BinaryMap,
}

/// Extracts pending assets and encodes the changeset for `root_id`.
pub fn build_envelope(
    root_id: &ServerId,
    changeset: &Changeset,
) -> Result<TransportEnvelope, EnvelopeError> {
    let (structured, binary_parts) = extract(changeset)?;

    for key in binary_parts.keys() {
        if key == ROOT_ID_FIELD || key == CHANGESET_FIELD {
            return Err(EnvelopeError::ReservedPartName(key.clone()));
        }
    }

    let structured_diff = serde_json::to_string(&structured)?;

    tracing::debug!(
        root = %root_id,
        json_bytes = structured_diff.len(),
        parts = binary_parts.len(),
        "built transport envelope"
    );

    Ok(TransportEnvelope {
        root_id: root_id.clone(),
        structured_diff,
        binary_parts,
    })
}

impl TransportEnvelope {
    /// Parses the structured diff without resolving assets.
    pub fn structured(&self) -> Result<StructuredDiff, EnvelopeError> {
        Ok(serde_json::from_str(&self.structured_diff)?)
    }

    /// Total size of all binary parts.
    pub fn binary_len(&self) -> usize {
        self.binary_parts.values().map(Vec::len).sum()
    }

    /// Reverses [`build_envelope`]: asset strings naming a binary part
    /// become pending data again, all others are hosted paths.
    pub fn decode(&self) -> Result<Changeset, EnvelopeError> {
        let structured = self.structured()?;
        let mut resolver = Resolver {
            parts: &self.binary_parts,
            used: BTreeSet::new(),
        };

        let changeset = Changeset {
            create_groups: structured
                .create_groups
                .into_iter()
                .map(|group| resolver.group(group))
                .collect(),
            update_groups: structured
                .update_groups
                .into_iter()
                .map(|group| resolver.group(group))
                .collect(),
            delete_group_ids: structured.delete_group_ids,
            values: structured
                .values
                .into_iter()
                .map(|(group_id, values)| {
                    let values = ValueDiff {
                        create_values: values
                            .create_values
                            .into_iter()
                            .map(|leaf| resolver.leaf(leaf))
                            .collect(),
                        update_values: values
                            .update_values
                            .into_iter()
                            .map(|leaf| resolver.leaf(leaf))
                            .collect(),
                        delete_values_id: values.delete_values_id,
                    };
                    (group_id, values)
                })
                .collect(),
        };

        if let Some(orphan) = self
            .binary_parts
            .keys()
            .find(|key| !resolver.used.contains(key.as_str()))
        {
            return Err(EnvelopeError::OrphanPart(orphan.clone()));
        }

        Ok(changeset)
    }
}

struct Resolver<'a> {
    parts: &'a BinaryMap,
    used: BTreeSet<&'a str>,
}

impl<'a> Resolver<'a> {
    fn slots(&mut self, slots: WireSlots) -> AssetSlots {
        let parts: &'a BinaryMap = self.parts;
        slots
            .into_iter()
            .map(|(name, values)| {
                let assets = values
                    .into_iter()
                    .map(|value| match parts.get_key_value(value.as_str()) {
                        Some((key, bytes)) => {
                            self.used.insert(key.as_str());
                            AssetRef::Pending(bytes.clone())
                        }
                        None => AssetRef::Hosted(value),
                    })
                    .collect();
                (name, assets)
            })
            .collect()
    }

    fn leaf(&mut self, leaf: WireLeaf) -> Leaf {
        Leaf {
            id: leaf.id,
            dirty: false,
            fields: leaf.fields,
            assets: self.slots(leaf.assets),
        }
    }

    fn group(&mut self, group: WireGroup) -> Group {
        Group {
            id: group.id,
            dirty: false,
            fields: group.fields,
            assets: self.slots(group.assets),
            leaves: group.leaves.into_iter().map(|leaf| self.leaf(leaf)).collect(),
        }
    }
}
