//! Module: db::cache::iterable_cache
//! Responsibility: publish materialized iterables and keep them current under mutation.
//! Does not own: how results are computed or how handles are derived.
//! Boundary: the only writer of cached instances.
//!
//! Snapshot protocol:
//! - `latest_version` is the highest committed version ever notified.
//! - An instance serves a reader at version `v` only if `instance.version <= v`.
//! - A result computed at `v` is published only if `v >= latest_version`,
//!   checked under the partition lock. Notifiers raise `latest_version`
//!   before visiting partitions, so a concurrent publication is either
//!   patched or refused.
//! - Notifications may arrive in any version order. One at or below an
//!   instance's `computed_at` is skipped; one older than the instance's last
//!   applied patch drops the instance.

use crate::{
    config::CacheConfig,
    db::{
        cache::{CachedInstance, ChunkedCache, PatchOutcome},
        identity::{EntityId, EntityTypeId, LinkId},
        iterate::{IterableHandle, PatchAction},
    },
    error::InternalError,
    obs::sink::{self, LookupOutcome, MetricsEvent, PatchKind, PublishOutcome},
};
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use tracing::debug;

///
/// CacheStats
///
/// Point-in-time view of cache occupancy and lookup effectiveness.
///

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CacheStats {
    pub partitions: usize,
    pub resident_partitions: usize,
    pub chunk_size: usize,
    pub entries: usize,
    pub attempts: u64,
    pub hits: u64,
    pub hit_rate: f64,
    pub latest_version: u64,
}

///
/// EntityIterableCache
///
/// Process-wide store of materialized iterable results keyed by handle.
///

pub struct EntityIterableCache {
    config: CacheConfig,
    instances: ChunkedCache<IterableHandle, Arc<CachedInstance>>,
    latest_version: AtomicU64,
}

impl EntityIterableCache {
    pub fn new(config: CacheConfig) -> Result<Self, InternalError> {
        config.validate()?;

        Ok(Self {
            config,
            instances: ChunkedCache::new(config.cache_size),
            latest_version: AtomicU64::new(0),
        })
    }

    #[must_use]
    pub const fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Highest committed version delivered through the notification API.
    #[must_use]
    pub fn latest_version(&self) -> u64 {
        self.latest_version.load(Ordering::SeqCst)
    }

    /// Find an instance valid for a reader at `snapshot_version`.
    pub fn lookup(
        &self,
        handle: &IterableHandle,
        snapshot_version: u64,
    ) -> Option<Arc<CachedInstance>> {
        if !self.config.enabled {
            return None;
        }

        let kind = handle.kind().label();
        let Some(instance) = self.instances.try_key(handle) else {
            sink::record(MetricsEvent::CacheLookup {
                kind,
                outcome: LookupOutcome::Miss,
            });
            return None;
        };

        if instance.version() > snapshot_version {
            sink::record(MetricsEvent::CacheLookup {
                kind,
                outcome: LookupOutcome::Stale,
            });
            debug!(
                handle = %handle,
                instance_version = instance.version(),
                snapshot_version,
                "cached instance is newer than reader snapshot"
            );
            return None;
        }

        sink::record(MetricsEvent::CacheLookup {
            kind,
            outcome: LookupOutcome::Hit,
        });

        Some(instance)
    }

    /// Return a valid cached instance for `handle`, or compute, materialize,
    /// and (when admissible) publish one.
    ///
    /// The returned instance is always correct for `snapshot_version`, even
    /// when it was not published. A failed `compute` publishes nothing.
    pub fn get_or_compute(
        &self,
        handle: &IterableHandle,
        snapshot_version: u64,
        compute: impl FnOnce() -> Result<Vec<EntityId>, InternalError>,
    ) -> Result<Arc<CachedInstance>, InternalError> {
        if let Some(instance) = self.lookup(handle, snapshot_version) {
            return Ok(instance);
        }

        let ids = compute()?;
        let materialized = ids.len();
        let instance = Arc::new(CachedInstance::new(handle.clone(), snapshot_version, ids));
        let outcome = self.publish(handle, snapshot_version, materialized, &instance);

        sink::record(MetricsEvent::Materialize {
            kind: handle.kind().label(),
            ids: materialized as u64,
            outcome,
        });

        Ok(instance)
    }

    fn publish(
        &self,
        handle: &IterableHandle,
        snapshot_version: u64,
        materialized: usize,
        instance: &Arc<CachedInstance>,
    ) -> PublishOutcome {
        if !self.config.enabled {
            return PublishOutcome::Disabled;
        }

        if materialized > self.config.max_cached_instance_size {
            debug!(
                handle = %handle,
                materialized,
                cutoff = self.config.max_cached_instance_size,
                "result exceeds materialization cutoff; serving uncached"
            );
            return PublishOutcome::OverCutoff;
        }

        let latest = &self.latest_version;
        let admitted = self
            .instances
            .cache_if(handle.clone(), Arc::clone(instance), |existing| {
                latest.load(Ordering::SeqCst) <= snapshot_version
                    && existing.is_none_or(|existing| existing.version() <= snapshot_version)
            });

        if admitted {
            PublishOutcome::Published
        } else {
            debug!(
                handle = %handle,
                snapshot_version,
                latest_version = self.latest_version(),
                "result computed at an older snapshot; not published"
            );
            PublishOutcome::StaleSnapshot
        }
    }

    /// An entity committed at `version` was created.
    pub fn notify_entity_added(&self, id: EntityId, version: u64) {
        self.fan_out(version, |handle| handle.added_action(id), id);
    }

    /// An entity committed at `version` was deleted.
    pub fn notify_entity_deleted(&self, id: EntityId, version: u64) {
        self.fan_out(version, |handle| handle.deleted_action(id), id);
    }

    /// Links `link_id` of some entity of `type_id` changed at `version`.
    /// Every instance whose result may depend on them is dropped.
    pub fn notify_link_changed(&self, type_id: EntityTypeId, link_id: LinkId, version: u64) {
        self.latest_version.fetch_max(version, Ordering::SeqCst);

        let removed = self
            .instances
            .retain(|handle, _| handle.link_action(type_id, link_id) != PatchAction::Invalidate);
        for _ in 0..removed {
            sink::record(MetricsEvent::Patch {
                kind: PatchKind::Invalidated,
            });
        }
        if removed > 0 {
            debug!(type_id, link_id, removed, "link change invalidated cached instances");
        }
    }

    fn fan_out(&self, version: u64, action: impl Fn(&IterableHandle) -> PatchAction, id: EntityId) {
        self.latest_version.fetch_max(version, Ordering::SeqCst);

        let mut inserted = 0u64;
        let mut removed = 0u64;
        let mut out_of_order = 0u64;
        let mut apply = |instance: &CachedInstance, insert: bool, applied: &mut u64| {
            match instance.patch(id, insert, version) {
                PatchOutcome::Applied => {
                    *applied += 1;
                    true
                }
                PatchOutcome::Skipped => true,
                PatchOutcome::OutOfOrder => {
                    out_of_order += 1;
                    false
                }
            }
        };
        let invalidated = self.instances.retain(|handle, instance| match action(handle) {
            PatchAction::Ignore => true,
            PatchAction::Insert => apply(instance, true, &mut inserted),
            PatchAction::Remove => apply(instance, false, &mut removed),
            PatchAction::Invalidate => false,
        });

        if out_of_order > 0 {
            debug!(
                entity = %id,
                version,
                out_of_order,
                "mutation arrived after a newer patch; dropping affected instances"
            );
        }
        for _ in 0..inserted {
            sink::record(MetricsEvent::Patch {
                kind: PatchKind::Inserted,
            });
        }
        for _ in 0..removed {
            sink::record(MetricsEvent::Patch {
                kind: PatchKind::Removed,
            });
        }
        for _ in 0..invalidated {
            sink::record(MetricsEvent::Patch {
                kind: PatchKind::Invalidated,
            });
        }
        if invalidated > 0 {
            debug!(entity = %id, version, invalidated, "mutation invalidated cached instances");
        }
    }

    /// Drop the instance cached for `handle`, if any.
    pub fn invalidate(&self, handle: &IterableHandle) -> bool {
        let removed = self.instances.remove(handle).is_some();
        if removed {
            sink::record(MetricsEvent::Patch {
                kind: PatchKind::Invalidated,
            });
        }

        removed
    }

    /// Drop every cached instance and reset lookup counters.
    pub fn invalidate_all(&self) {
        self.instances.clear();
        sink::record(MetricsEvent::CacheClear);
        debug!("iterable cache cleared");
    }

    /// Memory-pressure hook: drop the `count` coldest partitions.
    pub fn reclaim_coldest(&self, count: usize) -> usize {
        let reclaimed = self.instances.reclaim_coldest(count);
        if reclaimed > 0 {
            sink::record(MetricsEvent::PartitionsReclaimed {
                count: reclaimed as u64,
            });
            debug!(reclaimed, "reclaimed cold cache partitions");
        }

        reclaimed
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            partitions: self.instances.partition_count(),
            resident_partitions: self.instances.resident_partitions(),
            chunk_size: self.instances.chunk_size(),
            entries: self.instances.len(),
            attempts: self.instances.attempts(),
            hits: self.instances.hits(),
            hit_rate: self.instances.hit_rate(),
            latest_version: self.latest_version(),
        }
    }
}

impl std::fmt::Debug for EntityIterableCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityIterableCache")
            .field("config", &self.config)
            .field("latest_version", &self.latest_version())
            .finish_non_exhaustive()
    }
}
