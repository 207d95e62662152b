pub mod store;

pub use store::{MemoryStore, StoreCounters};

use crate::db::identity::EntityId;

/// Shorthand for building ids in tests.
#[must_use]
pub const fn id(type_id: u32, local_id: u64) -> EntityId {
    EntityId::new(type_id, local_id)
}
