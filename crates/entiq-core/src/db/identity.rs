use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric id of an entity type, assigned by the schema collaborator.
pub type EntityTypeId = u32;

/// Numeric id of a link (relation) name, assigned by the schema collaborator.
pub type LinkId = u32;

///
/// EntityId
///
/// Immutable `(type, local)` identity of one stored entity.
/// Ordering is lexicographic by type id, then local id.
///

#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub struct EntityId {
    type_id: EntityTypeId,
    local_id: u64,
}

impl EntityId {
    #[must_use]
    pub const fn new(type_id: EntityTypeId, local_id: u64) -> Self {
        Self { type_id, local_id }
    }

    #[must_use]
    pub const fn type_id(&self) -> EntityTypeId {
        self.type_id
    }

    #[must_use]
    pub const fn local_id(&self) -> u64 {
        self.local_id
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.type_id, self.local_id)
    }
}

///
/// TESTS
///
