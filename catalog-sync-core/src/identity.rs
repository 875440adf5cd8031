//! Entity identity and the New/Existing classification.
//!
//! Every group and leaf carries an [`Identity`]. Entities created locally get
//! a [`LocalId`] placeholder that means nothing to the server; entities that
//! came from the server carry their [`ServerId`].

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::Entity;

/// Identifier assigned by the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(String);

impl ServerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ServerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Session-local placeholder for an entity the server has not seen yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalId(String);

impl LocalId {
    /// Generate a fresh random placeholder.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LocalId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Identity carried by every entity.
///
/// Serialized as `{"new": "<placeholder>"}` or `{"existing": "<server id>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Identity {
    /// Created locally, no server-side representation yet
    New(LocalId),
    /// Known to the server
    Existing(ServerId),
}

impl Identity {
    /// A new identity with a generated placeholder.
    pub fn new_local() -> Self {
        Identity::New(LocalId::generate())
    }

    pub fn local(id: impl Into<String>) -> Self {
        Identity::New(LocalId::new(id))
    }

    pub fn existing(id: impl Into<String>) -> Self {
        Identity::Existing(ServerId::new(id))
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Identity::New(_))
    }

    /// Returns the server id for Existing identities.
    pub fn server_id(&self) -> Option<&ServerId> {
        match self {
            Identity::Existing(id) => Some(id),
            Identity::New(_) => None,
        }
    }

    /// Returns the placeholder for New identities.
    pub fn local_id(&self) -> Option<&LocalId> {
        match self {
            Identity::New(id) => Some(id),
            Identity::Existing(_) => None,
        }
    }

    /// The raw identifier string, placeholder or server id.
    pub fn as_str(&self) -> &str {
        match self {
            Identity::New(id) => id.as_str(),
            Identity::Existing(id) => id.as_str(),
        }
    }

    pub fn classify(&self) -> Classification<'_> {
        match self {
            Identity::New(id) => Classification::New(id),
            Identity::Existing(id) => Classification::Existing(id),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ServerId> for Identity {
    fn from(id: ServerId) -> Self {
        Identity::Existing(id)
    }
}

impl From<LocalId> for Identity {
    fn from(id: LocalId) -> Self {
        Identity::New(id)
    }
}

/// Result of [`classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification<'a> {
    New(&'a LocalId),
    Existing(&'a ServerId),
}

/// Tags an entity as New or Existing based solely on its identity.
pub fn classify<E: Entity + ?Sized>(entity: &E) -> Classification<'_> {
    entity.identity().classify()
}
