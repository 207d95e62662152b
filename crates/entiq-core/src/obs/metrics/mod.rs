use parking_lot::Mutex;
use serde::Serialize;
use std::{
    collections::BTreeMap,
    sync::LazyLock,
    time::{SystemTime, UNIX_EPOCH},
};

///
/// EventState
/// Ephemeral, in-memory counters for cache and iteration activity.
/// Shared by every thread in the process.
///

#[derive(Clone, Debug, Serialize)]
pub struct EventState {
    pub ops: EventOps,
    pub handles: BTreeMap<String, HandleCounters>,
    pub since_ms: u64,
}

impl Default for EventState {
    fn default() -> Self {
        Self {
            ops: EventOps::default(),
            handles: BTreeMap::new(),
            since_ms: now_millis(),
        }
    }
}

///
/// EventOps
///

#[derive(Clone, Debug, Default, Serialize)]
pub struct EventOps {
    // Cache lookups
    pub cache_lookups: u64,
    pub cache_hits: u64,
    pub cache_stale: u64,

    // Materialization
    pub materializations: u64,
    pub materialized_ids: u64,
    pub published: u64,
    pub skipped_over_cutoff: u64,
    pub skipped_stale_snapshot: u64,
    pub skipped_disabled: u64,

    // Index access
    pub entity_scans: u64,
    pub link_scans: u64,
    pub fast_counts: u64,

    // Mutation fan-out
    pub patches_inserted: u64,
    pub patches_removed: u64,
    pub invalidations: u64,

    // Cache lifecycle
    pub cache_clears: u64,
    pub partitions_reclaimed: u64,
}

///
/// HandleCounters
/// Per handle-kind counters keyed by the kind label.
///

#[derive(Clone, Debug, Default, Serialize)]
pub struct HandleCounters {
    pub lookups: u64,
    pub hits: u64,
    pub materializations: u64,
    pub materialized_ids: u64,
}

static EVENT_STATE: LazyLock<Mutex<EventState>> =
    LazyLock::new(|| Mutex::new(EventState::default()));

/// Borrow metrics immutably.
pub(crate) fn with_state<R>(f: impl FnOnce(&EventState) -> R) -> R {
    f(&EVENT_STATE.lock())
}

/// Borrow metrics mutably.
pub(crate) fn with_state_mut<R>(f: impl FnOnce(&mut EventState) -> R) -> R {
    f(&mut EVENT_STATE.lock())
}

/// Reset all counters (useful in tests).
pub(crate) fn reset_all() {
    with_state_mut(|m| *m = EventState::default());
}

#[expect(clippy::cast_possible_truncation)]
fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as u64)
}

///
/// EventReport
/// Event/counter report with derived per-kind ratios.
///

#[derive(Clone, Debug, Default, Serialize)]
pub struct EventReport {
    /// Ephemeral runtime counters since `since_ms`.
    pub counters: Option<EventState>,
    /// Per handle-kind counters and ratios.
    pub handle_summaries: Vec<HandleSummary>,
}

///
/// HandleSummary
///

#[derive(Clone, Debug, Default, Serialize)]
pub struct HandleSummary {
    pub kind: String,
    pub lookups: u64,
    pub hits: u64,
    pub materializations: u64,
    pub hit_ratio: f64,
    pub avg_ids_per_materialization: f64,
}

#[expect(clippy::cast_precision_loss)]
fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Build a report, optionally only if the counters window started at or after
/// `window_start_ms`.
#[must_use]
pub(crate) fn report_window_start(window_start_ms: Option<u64>) -> EventReport {
    with_state(|state| {
        if window_start_ms.is_some_and(|start| state.since_ms < start) {
            return EventReport::default();
        }

        let mut handle_summaries: Vec<HandleSummary> = state
            .handles
            .iter()
            .map(|(kind, counters)| HandleSummary {
                kind: kind.clone(),
                lookups: counters.lookups,
                hits: counters.hits,
                materializations: counters.materializations,
                hit_ratio: ratio(counters.hits, counters.lookups),
                avg_ids_per_materialization: ratio(
                    counters.materialized_ids,
                    counters.materializations,
                ),
            })
            .collect();

        // Busiest kinds first; ties fall back to label order.
        handle_summaries.sort_by(|left, right| {
            right
                .lookups
                .cmp(&left.lookups)
                .then_with(|| left.kind.cmp(&right.kind))
        });

        EventReport {
            counters: Some(state.clone()),
            handle_summaries,
        }
    })
}
