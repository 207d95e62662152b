//! Module: db::cache::instance
//! Responsibility: materialized, incrementally patchable query results.
//! Does not own: publication policy or mutation fan-out (see `EntityIterableCache`).
//! Boundary: one lock per instance; readers work on immutable snapshots.

use crate::db::{identity::EntityId, iterate::IterableHandle};
use derive_more::Deref;
use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use std::{collections::BTreeSet, sync::Arc};

///
/// IdSnapshot
///
/// Immutable, strictly ascending id list. Membership is a binary search;
/// length and ordinal access are O(1).
///

#[derive(Clone, Debug, Default, Deref, Eq, PartialEq)]
pub struct IdSnapshot(Vec<EntityId>);

impl IdSnapshot {
    /// Sort and deduplicate arbitrary ids.
    #[must_use]
    pub fn from_unsorted(mut ids: Vec<EntityId>) -> Self {
        ids.sort_unstable();
        ids.dedup();

        Self(ids)
    }

    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.0.binary_search(&id).is_ok()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[EntityId] {
        &self.0
    }
}

impl FromIterator<EntityId> for IdSnapshot {
    fn from_iter<T: IntoIterator<Item = EntityId>>(iter: T) -> Self {
        Self::from_unsorted(iter.into_iter().collect())
    }
}

///
/// CachedInstance
///
/// Ordered, duplicate-free result of one iterable, tagged with its handle.
///
/// `computed_at` is the snapshot the result was materialized from and never
/// changes. `version` is the newest committed mutation patched in since.
///

pub struct CachedInstance {
    handle: IterableHandle,
    computed_at: u64,
    state: RwLock<InstanceState>,
}

///
/// PatchOutcome
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum PatchOutcome {
    Applied,
    /// Already reflected in the materialized result.
    Skipped,
    /// Older than a patch already applied; the content can no longer be trusted.
    OutOfOrder,
}

struct InstanceState {
    ids: BTreeSet<EntityId>,
    version: u64,
    // Rebuilt lazily after the next patch.
    snapshot: Option<Arc<IdSnapshot>>,
}

impl CachedInstance {
    #[must_use]
    pub fn new(
        handle: IterableHandle,
        version: u64,
        ids: impl IntoIterator<Item = EntityId>,
    ) -> Self {
        Self {
            handle,
            computed_at: version,
            state: RwLock::new(InstanceState {
                ids: ids.into_iter().collect(),
                version,
                snapshot: None,
            }),
        }
    }

    #[must_use]
    pub const fn handle(&self) -> &IterableHandle {
        &self.handle
    }

    /// Snapshot the result was materialized from.
    #[must_use]
    pub const fn computed_at(&self) -> u64 {
        self.computed_at
    }

    /// Snapshot version at which this content is current.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.state.read().version
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().ids.len()
    }

    #[must_use]
    pub fn count(&self) -> u64 {
        self.len() as u64
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().ids.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.state.read().ids.contains(&id)
    }

    /// Insert `id`; returns false if it was already present.
    pub fn add_entity(&self, id: EntityId) -> bool {
        let mut state = self.state.write();
        let inserted = state.ids.insert(id);
        if inserted {
            state.snapshot = None;
        }

        inserted
    }

    /// Remove `id`; returns false if it was absent.
    pub fn remove_entity(&self, id: EntityId) -> bool {
        let mut state = self.state.write();
        let removed = state.ids.remove(&id);
        if removed {
            state.snapshot = None;
        }

        removed
    }

    /// Apply one committed mutation and advance the content version.
    ///
    /// Mutations at or before `computed_at` are already in the result. A
    /// mutation newer than `computed_at` but older than the last applied
    /// patch arrived out of order and cannot be merged safely.
    pub(crate) fn patch(&self, id: EntityId, insert: bool, version: u64) -> PatchOutcome {
        if version <= self.computed_at {
            return PatchOutcome::Skipped;
        }

        let mut state = self.state.write();
        if version < state.version {
            return PatchOutcome::OutOfOrder;
        }

        let changed = if insert {
            state.ids.insert(id)
        } else {
            state.ids.remove(&id)
        };
        if changed {
            state.snapshot = None;
        }
        state.version = version;

        PatchOutcome::Applied
    }

    /// Read view for membership tests and iteration.
    #[must_use]
    pub fn to_set(&self) -> Arc<IdSnapshot> {
        let state = self.state.upgradable_read();
        if let Some(snapshot) = &state.snapshot {
            return Arc::clone(snapshot);
        }

        let mut state = RwLockUpgradableReadGuard::upgrade(state);
        let snapshot = Arc::new(IdSnapshot(state.ids.iter().copied().collect()));
        state.snapshot = Some(Arc::clone(&snapshot));

        snapshot
    }
}

impl std::fmt::Debug for CachedInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("CachedInstance")
            .field("handle", &self.handle)
            .field("computed_at", &self.computed_at)
            .field("version", &state.version)
            .field("len", &state.ids.len())
            .finish()
    }
}
