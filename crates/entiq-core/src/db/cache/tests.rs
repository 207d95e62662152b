use super::*;
use crate::{
    config::CacheConfig,
    db::{identity::EntityId, iterate::EntityIterable, txn::QueryTxn},
    error::{ErrorClass, ErrorOrigin, InternalError},
    obs::{LookupOutcome, MetricsEvent, MetricsSink, PatchKind, PublishOutcome, with_metrics_sink},
    test_support::{MemoryStore, id},
};
use parking_lot::Mutex;
use proptest::prelude::*;
use std::{
    cell::RefCell,
    collections::{BTreeMap, BTreeSet},
    rc::Rc,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    thread,
};

const USER: u32 = 1;
const POST: u32 = 2;

fn cache() -> EntityIterableCache {
    EntityIterableCache::new(CacheConfig::new().with_cache_size(256)).expect("cache config")
}

#[derive(Default)]
struct CaptureSink {
    events: RefCell<Vec<MetricsEvent>>,
}

impl MetricsSink for CaptureSink {
    fn record(&self, event: MetricsEvent) {
        self.events.borrow_mut().push(event);
    }
}

///
/// CHUNKED CACHE
///

#[test]
fn chunk_count_is_ceiling_prime_of_ceiling_root() {
    assert_eq!(compute_number_of_chunks(1000), 37);
    assert_eq!(compute_number_of_chunks(MIN_SIZE), 5);
    assert_eq!(compute_number_of_chunks(0), 5, "small sizes round up to the minimum");
    assert_eq!(compute_number_of_chunks(10_000), 101);

    let chunked: ChunkedCache<u64, u64> = ChunkedCache::new(1000);
    assert_eq!(chunked.partition_count(), 37);
    assert_eq!(chunked.chunk_size(), 1000 / 37);
    assert_eq!(chunked.resident_partitions(), 0, "partitions are created lazily");
}

#[test]
fn chunk_count_of_the_largest_size_does_not_overflow() {
    let chunks = compute_number_of_chunks(usize::MAX);

    assert!(entiq_utils::is_prime(chunks));
    assert!((chunks as u128) * (chunks as u128) >= usize::MAX as u128);
}

#[test]
fn cached_value_round_trips_until_clear() {
    let chunked: ChunkedCache<&'static str, u32> = ChunkedCache::new(64);

    assert_eq!(chunked.cache("a", 1), None);
    assert_eq!(chunked.cache("a", 2), Some(1));
    assert_eq!(chunked.try_key(&"a"), Some(2));
    assert_eq!(chunked.try_key(&"b"), None);
    assert_eq!(chunked.attempts(), 2);
    assert_eq!(chunked.hits(), 1);
    assert!((chunked.hit_rate() - 0.5).abs() < f64::EPSILON);

    chunked.clear();

    assert_eq!(chunked.get(&"a"), None);
    assert_eq!(chunked.attempts(), 0);
    assert_eq!(chunked.hits(), 0);
    assert_eq!(chunked.resident_partitions(), 0);
}

#[test]
fn cache_if_consults_the_resident_value() {
    let chunked: ChunkedCache<u64, u64> = ChunkedCache::new(64);

    assert!(chunked.cache_if(1, 10, |existing| existing.is_none()));
    assert!(!chunked.cache_if(1, 20, |existing| existing.is_none()));
    assert_eq!(chunked.get(&1), Some(10));
    assert!(chunked.cache_if(1, 30, |existing| existing == Some(&10)));
    assert_eq!(chunked.get(&1), Some(30));
}

#[test]
fn retain_drops_rejected_entries_across_partitions() {
    let chunked: ChunkedCache<u64, u64> = ChunkedCache::new(1024);
    for key in 0..40 {
        chunked.cache(key, key * 2);
    }

    let removed = chunked.retain(|key, _| key % 2 == 0);

    assert_eq!(removed, 20);
    assert_eq!(chunked.len(), 20);
    assert_eq!(chunked.get(&3), None);
    assert_eq!(chunked.get(&4), Some(8));

    let mut seen = 0;
    chunked.for_each(|key, value| {
        assert_eq!(*value, key * 2);
        seen += 1;
    });
    assert_eq!(seen, 20);
}

#[test]
fn reclaimed_partitions_read_as_misses() {
    let chunked: ChunkedCache<u64, u64> = ChunkedCache::new(1024);
    for key in 0..50 {
        chunked.cache(key, key);
    }
    let resident = chunked.resident_partitions();
    assert!(resident > 1);

    assert_eq!(chunked.reclaim_coldest(usize::MAX), resident);
    assert_eq!(chunked.resident_partitions(), 0);
    assert!((0..50).all(|key| chunked.get(&key).is_none()));
    assert_eq!(chunked.reclaim_coldest(1), 0);
}

#[test]
fn reclaim_prefers_the_least_recently_touched_partition() {
    let chunked: ChunkedCache<u64, u64> = ChunkedCache::new(256);
    chunked.cache(0, 0);

    // Find a key routed to a different partition than key 0.
    let other = (1..1000)
        .find(|key| {
            chunked.cache(*key, *key);
            if chunked.resident_partitions() == 2 {
                return true;
            }
            chunked.remove(key);
            false
        })
        .expect("some key lands in another partition");

    assert_eq!(chunked.get(&0), Some(0), "touch key 0 last");
    assert_eq!(chunked.reclaim_coldest(1), 1);

    assert_eq!(chunked.get(&0), Some(0));
    assert_eq!(chunked.get(&other), None);
}

proptest! {
    #[test]
    fn last_write_wins_for_every_key(
        writes in prop::collection::vec((0u64..32, any::<u64>()), 0..32)
    ) {
        let chunked: ChunkedCache<u64, u64> = ChunkedCache::new(4096);
        let mut expected = BTreeMap::new();
        for (key, value) in writes {
            chunked.cache(key, value);
            expected.insert(key, value);
        }

        for (key, value) in &expected {
            prop_assert_eq!(chunked.get(key), Some(*value));
        }
        prop_assert_eq!(chunked.len(), expected.len());
    }
}

///
/// CACHED INSTANCE
///

#[test]
fn instance_add_and_remove_are_idempotent() {
    let handle = EntityIterable::entities_of_type(USER).handle().clone();
    let instance = CachedInstance::new(handle, 1, [id(USER, 3), id(USER, 1)]);

    assert!(instance.add_entity(id(USER, 2)));
    assert!(!instance.add_entity(id(USER, 2)));
    assert!(instance.contains(id(USER, 2)));
    assert_eq!(instance.count(), 3);

    assert!(instance.remove_entity(id(USER, 1)));
    assert!(!instance.remove_entity(id(USER, 1)));
    assert!(!instance.contains(id(USER, 1)));
    assert_eq!(instance.to_set().as_slice(), &[id(USER, 2), id(USER, 3)]);
}

#[test]
fn instance_snapshot_is_shared_until_patched() {
    let handle = EntityIterable::entities_of_type(USER).handle().clone();
    let instance = CachedInstance::new(handle, 1, [id(USER, 1)]);

    let first = instance.to_set();
    let again = instance.to_set();
    assert!(Arc::ptr_eq(&first, &again));

    instance.add_entity(id(USER, 2));
    let patched = instance.to_set();

    assert!(!Arc::ptr_eq(&first, &patched));
    assert_eq!(first.len(), 1, "earlier snapshots stay immutable");
    assert!(patched.contains(id(USER, 2)));
}

#[test]
fn instance_skips_mutations_already_in_its_result() {
    let handle = EntityIterable::entities_of_type(USER).handle().clone();
    let instance = CachedInstance::new(handle, 5, Vec::new());

    assert_eq!(instance.patch(id(USER, 1), true, 4), PatchOutcome::Skipped);
    assert_eq!(instance.patch(id(USER, 1), true, 5), PatchOutcome::Skipped);
    assert!(instance.is_empty());

    assert_eq!(instance.patch(id(USER, 1), true, 7), PatchOutcome::Applied);
    assert_eq!(instance.patch(id(USER, 2), true, 7), PatchOutcome::Applied, "same commit");
    assert_eq!(instance.version(), 7);
    assert_eq!(instance.computed_at(), 5);
}

#[test]
fn instance_rejects_a_mutation_older_than_its_last_patch() {
    let handle = EntityIterable::entities_of_type(USER).handle().clone();
    let instance = CachedInstance::new(handle, 5, [id(USER, 1)]);

    assert_eq!(instance.patch(id(USER, 3), true, 7), PatchOutcome::Applied);
    assert_eq!(instance.patch(id(USER, 2), true, 6), PatchOutcome::OutOfOrder);
    assert!(!instance.contains(id(USER, 2)));
    assert_eq!(instance.version(), 7);
}

#[test]
fn concurrent_readers_always_see_sorted_snapshots() {
    let handle = EntityIterable::entities_of_type(USER).handle().clone();
    let instance = CachedInstance::new(handle, 0, Vec::new());

    thread::scope(|scope| {
        scope.spawn(|| {
            for local in (0..500).rev() {
                instance.patch(id(USER, local), true, 1);
            }
        });
        for _ in 0..3 {
            scope.spawn(|| {
                for _ in 0..200 {
                    let snapshot = instance.to_set();
                    assert!(snapshot.windows(2).all(|pair| pair[0] < pair[1]));
                }
            });
        }
    });

    assert_eq!(instance.len(), 500);
}

#[test]
fn id_snapshot_sorts_and_dedups() {
    let snapshot: IdSnapshot = [id(2, 1), id(1, 9), id(2, 1)].into_iter().collect();

    assert_eq!(snapshot.as_slice(), &[id(1, 9), id(2, 1)]);
    assert!(snapshot.contains(id(1, 9)));
    assert!(!snapshot.contains(id(1, 8)));
}

///
/// ITERABLE CACHE
///

#[test]
fn zero_sized_cache_is_rejected() {
    let err = EntityIterableCache::new(CacheConfig::new().with_cache_size(0)).expect_err("invalid");

    assert_eq!(err.class, ErrorClass::Unsupported);
    assert_eq!(err.origin, ErrorOrigin::Config);
}

#[test]
fn cached_result_is_patched_without_requery() {
    let cache = cache();
    let mut store = MemoryStore::new().with_entities(USER, [1, 2]);
    store.set_version(1);
    let users = EntityIterable::entities_of_type(USER);

    let ids = users
        .materialize(QueryTxn::with_cache(&store, &cache))
        .expect("materialize");
    assert_eq!(ids, vec![id(USER, 1), id(USER, 2)]);
    assert_eq!(cache.stats().entries, 1);

    store.add_entity(id(USER, 3));
    cache.notify_entity_added(id(USER, 3), 2);
    store.remove_entity(id(USER, 1));
    cache.notify_entity_deleted(id(USER, 1), 3);
    store.set_version(3);
    store.set_fail_on_access(true);

    let txn = QueryTxn::with_cache(&store, &cache);
    assert_eq!(
        users.materialize(txn).expect("served from cache"),
        vec![id(USER, 2), id(USER, 3)]
    );
    assert_eq!(users.count(txn).expect("count"), 2);
    assert!(!users.is_empty(txn).expect("cached emptiness"));
    assert_eq!(store.counters.cursors_opened.get(), 1);
}

#[test]
fn out_of_order_notifications_drop_the_instance() {
    let cache = cache();
    let mut store = MemoryStore::new().with_entities(USER, [1]);
    store.set_version(5);
    let users = EntityIterable::entities_of_type(USER);
    users
        .materialize(QueryTxn::with_cache(&store, &cache))
        .expect("materialize");

    store.add_entity(id(USER, 3));
    cache.notify_entity_added(id(USER, 3), 7);
    store.add_entity(id(USER, 2));
    cache.notify_entity_added(id(USER, 2), 6);
    store.set_version(7);

    assert!(
        cache.lookup(users.handle(), 7).is_none(),
        "an instance that missed a mutation must not be served"
    );

    let expected = vec![id(USER, 1), id(USER, 2), id(USER, 3)];
    assert_eq!(
        users
            .materialize(QueryTxn::with_cache(&store, &cache))
            .expect("recomputed"),
        expected
    );
    assert_eq!(store.counters.cursors_opened.get(), 2);

    store.set_fail_on_access(true);
    assert_eq!(
        users
            .materialize(QueryTxn::with_cache(&store, &cache))
            .expect("served from cache"),
        expected
    );
}

#[test]
fn concurrent_out_of_order_notifications_never_lose_a_patch() {
    const LAST: u64 = 240;

    let cache = cache();
    let handle = EntityIterable::entities_of_type(USER).handle().clone();
    let truth = |version: u64| -> Result<Vec<EntityId>, InternalError> {
        Ok((1..=version).map(|local| id(USER, local)).collect())
    };

    // Highest `v` with every notification up to `v` delivered; readers
    // never observe a version before its notifications.
    let committed = AtomicU64::new(0);
    let delivered = Mutex::new(BTreeSet::new());
    let deliver = |version: u64| {
        cache.notify_entity_added(id(USER, version), version);

        let mut delivered = delivered.lock();
        delivered.insert(version);
        let mut visible = committed.load(Ordering::SeqCst);
        while delivered.contains(&(visible + 1)) {
            visible += 1;
        }
        committed.store(visible, Ordering::SeqCst);
    };

    thread::scope(|scope| {
        // Two committers interleave, so delivery order is arbitrary.
        scope.spawn(|| {
            for version in (2..=LAST).step_by(2) {
                deliver(version);
            }
        });
        scope.spawn(|| {
            for version in (1..=LAST).step_by(2) {
                deliver(version);
            }
        });

        for _ in 0..3 {
            scope.spawn(|| {
                loop {
                    let version = committed.load(Ordering::SeqCst);
                    let ids = cache
                        .get_or_compute(&handle, version, || truth(version))
                        .expect("compute")
                        .to_set();

                    assert!(
                        (1..=version).all(|local| ids.contains(id(USER, local))),
                        "reader at {version} missed an entity: {:?}",
                        ids.as_slice()
                    );
                    if version == LAST {
                        break;
                    }
                }
            });
        }
    });

    let settled = cache
        .get_or_compute(&handle, LAST, || truth(LAST))
        .expect("compute")
        .to_set();
    assert_eq!(settled.as_slice(), truth(LAST).expect("truth").as_slice());
}

#[test]
fn count_consults_the_cache_once_per_call() {
    let cache = cache();
    let mut store = MemoryStore::new()
        .with_entities(POST, [1, 2])
        .with_link(id(POST, 1), "author", id(USER, 1));
    store.set_version(1);
    let authored = EntityIterable::entities_with_link(POST, store.resolve_link("author"));
    let txn = QueryTxn::with_cache(&store, &cache);

    assert_eq!(authored.count(txn).expect("count"), 1);
    let stats = cache.stats();
    assert_eq!((stats.attempts, stats.hits), (1, 0));

    assert_eq!(authored.count(txn).expect("count"), 1);
    let stats = cache.stats();
    assert_eq!((stats.attempts, stats.hits), (2, 1));
    assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
}

#[test]
fn unrelated_mutations_leave_instances_untouched() {
    let cache = cache();
    let mut store = MemoryStore::new().with_entities(USER, [1]);
    store.set_version(1);
    let users = EntityIterable::entities_of_type(USER);
    users
        .materialize(QueryTxn::with_cache(&store, &cache))
        .expect("materialize");

    cache.notify_entity_added(id(POST, 9), 2);
    store.set_version(2);

    let instance = cache.lookup(users.handle(), 2).expect("still cached");
    assert_eq!(instance.version(), 1, "content version unchanged");
    assert_eq!(instance.to_set().as_slice(), &[id(USER, 1)]);
}

#[test]
fn union_instance_takes_inserts_from_either_side() {
    let cache = cache();
    let mut store = MemoryStore::new()
        .with_entities(USER, [1])
        .with_entities(POST, [7]);
    store.set_version(1);
    let everything = EntityIterable::entities_of_type(USER).union(&EntityIterable::entities_of_type(POST));
    everything
        .materialize(QueryTxn::with_cache(&store, &cache))
        .expect("materialize");

    store.add_entity(id(POST, 8));
    cache.notify_entity_added(id(POST, 8), 2);
    store.set_version(2);
    store.set_fail_on_access(true);

    assert_eq!(
        everything
            .materialize(QueryTxn::with_cache(&store, &cache))
            .expect("served from cache"),
        vec![id(USER, 1), id(POST, 7), id(POST, 8)]
    );
}

#[test]
fn oversized_results_are_served_but_not_published() {
    let cache = EntityIterableCache::new(CacheConfig::new().with_max_cached_instance_size(2))
        .expect("cache config");
    let store = MemoryStore::new().with_entities(USER, [1, 2, 3]);
    let users = EntityIterable::entities_of_type(USER);
    let capture = Rc::new(CaptureSink::default());

    with_metrics_sink(capture.clone(), || {
        for _ in 0..2 {
            let ids = users
                .materialize(QueryTxn::with_cache(&store, &cache))
                .expect("materialize");
            assert_eq!(ids.len(), 3);
        }
    });

    assert_eq!(cache.stats().entries, 0);
    assert_eq!(store.counters.cursors_opened.get(), 2, "each call recomputes");
    assert!(capture.events.borrow().contains(&MetricsEvent::Materialize {
        kind: "all_entities",
        ids: 3,
        outcome: PublishOutcome::OverCutoff,
    }));
}

#[test]
fn results_from_an_older_snapshot_are_not_published() {
    let cache = cache();
    let mut store = MemoryStore::new().with_entities(USER, [1]);
    cache.notify_entity_added(id(POST, 1), 5);
    store.set_version(3);

    let users = EntityIterable::entities_of_type(USER);
    users
        .materialize(QueryTxn::with_cache(&store, &cache))
        .expect("materialize");

    assert_eq!(cache.stats().entries, 0);
    assert_eq!(cache.latest_version(), 5);
}

#[test]
fn readers_behind_a_cached_instance_recompute() {
    let cache = cache();
    let mut store = MemoryStore::new().with_entities(USER, [1, 2]);
    store.set_version(5);
    let users = EntityIterable::entities_of_type(USER);
    users
        .materialize(QueryTxn::with_cache(&store, &cache))
        .expect("materialize");

    store.set_version(4);
    let capture = Rc::new(CaptureSink::default());
    with_metrics_sink(capture.clone(), || {
        users
            .materialize(QueryTxn::with_cache(&store, &cache))
            .expect("materialize");
    });

    assert_eq!(store.counters.cursors_opened.get(), 2);
    let events = capture.events.borrow();
    assert!(events.contains(&MetricsEvent::CacheLookup {
        kind: "all_entities",
        outcome: LookupOutcome::Stale,
    }));
    assert!(events.contains(&MetricsEvent::Materialize {
        kind: "all_entities",
        ids: 2,
        outcome: PublishOutcome::StaleSnapshot,
    }));
    assert_eq!(
        cache.lookup(users.handle(), 5).expect("newer instance kept").version(),
        5
    );
}

#[test]
fn link_changes_invalidate_dependent_instances() {
    let cache = cache();
    let mut store = MemoryStore::new()
        .with_entities(POST, [1, 2])
        .with_link(id(POST, 1), "author", id(USER, 1));
    store.set_version(1);
    let author = store.resolve_link("author");
    let with_author = EntityIterable::entities_with_link(POST, author);
    let all_posts = EntityIterable::entities_of_type(POST);

    for iterable in [&with_author, &all_posts] {
        iterable
            .materialize(QueryTxn::with_cache(&store, &cache))
            .expect("materialize");
    }
    assert_eq!(cache.stats().entries, 2);

    store.add_link(id(POST, 2), "author", id(USER, 1));
    cache.notify_link_changed(POST, author, 2);
    store.set_version(2);

    assert_eq!(cache.stats().entries, 1, "only the link scan is dropped");
    assert_eq!(
        with_author
            .materialize(QueryTxn::with_cache(&store, &cache))
            .expect("materialize"),
        vec![id(POST, 1), id(POST, 2)]
    );
}

#[test]
fn link_join_reuses_the_cached_target_set() {
    let cache = cache();
    let store = MemoryStore::new()
        .with_entities(USER, [1])
        .with_entities(POST, [1, 2])
        .with_link(id(POST, 2), "author", id(USER, 1));
    let users = EntityIterable::entities_of_type(USER);

    let txn = QueryTxn::with_cache(&store, &cache);
    let posts = EntityIterable::entities_of_type(POST)
        .find_links(txn, &users, "author")
        .expect("find_links");
    for _ in 0..2 {
        assert_eq!(posts.materialize(txn).expect("materialize"), vec![id(POST, 2)]);
    }

    // One user scan, then one link scan per run.
    assert_eq!(store.counters.cursors_opened.get(), 3);
    assert_eq!(cache.stats().entries, 1);
}

#[test]
fn disabled_cache_always_computes() {
    let cache = EntityIterableCache::new(CacheConfig::new().disabled()).expect("cache config");
    let store = MemoryStore::new().with_entities(USER, [1]);
    let users = EntityIterable::entities_of_type(USER);

    for _ in 0..2 {
        users
            .materialize(QueryTxn::with_cache(&store, &cache))
            .expect("materialize");
    }

    assert_eq!(store.counters.cursors_opened.get(), 2);
    assert_eq!(cache.stats().entries, 0);
    assert_eq!(cache.stats().attempts, 0);
}

#[test]
fn failed_computation_publishes_nothing() {
    let cache = cache();
    let handle = EntityIterable::entities_of_type(USER).handle().clone();

    let err = cache
        .get_or_compute(&handle, 1, || Err(InternalError::store_io("disk gone")))
        .expect_err("compute failed");

    assert_eq!(err.origin, ErrorOrigin::Store);
    assert_eq!(cache.stats().entries, 0);
    assert!(cache.lookup(&handle, 1).is_none());
}

#[test]
fn reclaim_and_clear_turn_hits_into_misses() {
    let cache = cache();
    let handle = EntityIterable::entities_of_type(USER).handle().clone();
    let compute = || Ok(vec![id(USER, 1)]);
    cache.get_or_compute(&handle, 1, compute).expect("compute");
    assert!(cache.lookup(&handle, 1).is_some());

    let capture = Rc::new(CaptureSink::default());
    with_metrics_sink(capture.clone(), || {
        assert_eq!(cache.reclaim_coldest(usize::MAX), 1);
    });
    assert!(cache.lookup(&handle, 1).is_none());
    assert_eq!(
        capture.events.borrow().as_slice(),
        &[MetricsEvent::PartitionsReclaimed { count: 1 }]
    );

    cache.get_or_compute(&handle, 1, compute).expect("compute");
    cache.invalidate_all();
    let stats = cache.stats();
    assert_eq!(stats.entries, 0);
    assert_eq!(stats.attempts, 0);
    assert_eq!(stats.resident_partitions, 0);
}

#[test]
fn explicit_invalidation_removes_one_handle() {
    let cache = cache();
    let users = EntityIterable::entities_of_type(USER).handle().clone();
    let posts = EntityIterable::entities_of_type(POST).handle().clone();
    cache.get_or_compute(&users, 1, || Ok(Vec::new())).expect("compute");
    cache.get_or_compute(&posts, 1, || Ok(Vec::new())).expect("compute");

    assert!(cache.invalidate(&users));
    assert!(!cache.invalidate(&users));
    assert!(cache.lookup(&posts, 1).is_some());
}

#[test]
fn metrics_sink_sees_lookup_publish_and_patch_events() {
    let cache = cache();
    let handle = EntityIterable::entities_of_type(USER).handle().clone();
    let capture = Rc::new(CaptureSink::default());

    with_metrics_sink(capture.clone(), || {
        cache
            .get_or_compute(&handle, 1, || Ok(vec![id(USER, 1)]))
            .expect("compute");
        cache
            .get_or_compute(&handle, 1, || unreachable!("served from cache"))
            .expect("hit");
        cache.notify_entity_added(id(USER, 2), 2);
        cache.notify_entity_deleted(id(USER, 1), 3);
    });

    assert_eq!(
        capture.events.borrow().as_slice(),
        &[
            MetricsEvent::CacheLookup {
                kind: "all_entities",
                outcome: LookupOutcome::Miss,
            },
            MetricsEvent::Materialize {
                kind: "all_entities",
                ids: 1,
                outcome: PublishOutcome::Published,
            },
            MetricsEvent::CacheLookup {
                kind: "all_entities",
                outcome: LookupOutcome::Hit,
            },
            MetricsEvent::Patch {
                kind: PatchKind::Inserted,
            },
            MetricsEvent::Patch {
                kind: PatchKind::Removed,
            },
        ]
    );
    assert_eq!(
        cache.lookup(&handle, 3).expect("cached").to_set().as_slice(),
        &[id(USER, 2)]
    );
}
