//! Metrics sink boundary.
//!
//! Cache and iterable code MUST NOT depend on obs::metrics directly.
//! All instrumentation flows through MetricsEvent and MetricsSink.
//!
//! This module is the only allowed bridge between execution logic
//! and the global metrics state.
use crate::obs::metrics::{self, EventReport};
use std::{cell::RefCell, rc::Rc};

thread_local! {
    static SINK_OVERRIDE: RefCell<Option<Rc<dyn MetricsSink>>> = const { RefCell::new(None) };
}

///
/// LookupOutcome
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LookupOutcome {
    Hit,
    Miss,
    /// Resident, but built after the reader's snapshot.
    Stale,
}

///
/// PublishOutcome
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PublishOutcome {
    Published,
    OverCutoff,
    StaleSnapshot,
    Disabled,
}

///
/// ScanKind
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScanKind {
    Entities,
    Links,
}

///
/// PatchKind
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PatchKind {
    Inserted,
    Removed,
    Invalidated,
}

///
/// MetricsEvent
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MetricsEvent {
    CacheLookup {
        kind: &'static str,
        outcome: LookupOutcome,
    },
    Materialize {
        kind: &'static str,
        ids: u64,
        outcome: PublishOutcome,
    },
    IndexScan {
        kind: ScanKind,
    },
    FastCount,
    Patch {
        kind: PatchKind,
    },
    CacheClear,
    PartitionsReclaimed {
        count: u64,
    },
}

///
/// MetricsSink
///

pub trait MetricsSink {
    fn record(&self, event: MetricsEvent);
}

/// GlobalMetricsSink
/// Default process-wide sink that writes into global metrics state.
/// Acts as the concrete sink when no scoped override is installed.

pub(crate) struct GlobalMetricsSink;

impl MetricsSink for GlobalMetricsSink {
    fn record(&self, event: MetricsEvent) {
        match event {
            MetricsEvent::CacheLookup { kind, outcome } => {
                metrics::with_state_mut(|m| {
                    m.ops.cache_lookups = m.ops.cache_lookups.saturating_add(1);
                    match outcome {
                        LookupOutcome::Hit => m.ops.cache_hits = m.ops.cache_hits.saturating_add(1),
                        LookupOutcome::Stale => {
                            m.ops.cache_stale = m.ops.cache_stale.saturating_add(1);
                        }
                        LookupOutcome::Miss => {}
                    }

                    let entry = m.handles.entry(kind.to_string()).or_default();
                    entry.lookups = entry.lookups.saturating_add(1);
                    if outcome == LookupOutcome::Hit {
                        entry.hits = entry.hits.saturating_add(1);
                    }
                });
            }

            MetricsEvent::Materialize { kind, ids, outcome } => {
                metrics::with_state_mut(|m| {
                    m.ops.materializations = m.ops.materializations.saturating_add(1);
                    m.ops.materialized_ids = m.ops.materialized_ids.saturating_add(ids);
                    match outcome {
                        PublishOutcome::Published => {
                            m.ops.published = m.ops.published.saturating_add(1);
                        }
                        PublishOutcome::OverCutoff => {
                            m.ops.skipped_over_cutoff = m.ops.skipped_over_cutoff.saturating_add(1);
                        }
                        PublishOutcome::StaleSnapshot => {
                            m.ops.skipped_stale_snapshot =
                                m.ops.skipped_stale_snapshot.saturating_add(1);
                        }
                        PublishOutcome::Disabled => {
                            m.ops.skipped_disabled = m.ops.skipped_disabled.saturating_add(1);
                        }
                    }

                    let entry = m.handles.entry(kind.to_string()).or_default();
                    entry.materializations = entry.materializations.saturating_add(1);
                    entry.materialized_ids = entry.materialized_ids.saturating_add(ids);
                });
            }

            MetricsEvent::IndexScan { kind } => {
                metrics::with_state_mut(|m| match kind {
                    ScanKind::Entities => m.ops.entity_scans = m.ops.entity_scans.saturating_add(1),
                    ScanKind::Links => m.ops.link_scans = m.ops.link_scans.saturating_add(1),
                });
            }

            MetricsEvent::FastCount => {
                metrics::with_state_mut(|m| {
                    m.ops.fast_counts = m.ops.fast_counts.saturating_add(1);
                });
            }

            MetricsEvent::Patch { kind } => {
                metrics::with_state_mut(|m| match kind {
                    PatchKind::Inserted => {
                        m.ops.patches_inserted = m.ops.patches_inserted.saturating_add(1);
                    }
                    PatchKind::Removed => {
                        m.ops.patches_removed = m.ops.patches_removed.saturating_add(1);
                    }
                    PatchKind::Invalidated => {
                        m.ops.invalidations = m.ops.invalidations.saturating_add(1);
                    }
                });
            }

            MetricsEvent::CacheClear => {
                metrics::with_state_mut(|m| {
                    m.ops.cache_clears = m.ops.cache_clears.saturating_add(1);
                });
            }

            MetricsEvent::PartitionsReclaimed { count } => {
                metrics::with_state_mut(|m| {
                    m.ops.partitions_reclaimed = m.ops.partitions_reclaimed.saturating_add(count);
                });
            }
        }
    }
}

pub(crate) const GLOBAL_METRICS_SINK: GlobalMetricsSink = GlobalMetricsSink;

pub(crate) fn record(event: MetricsEvent) {
    let override_sink = SINK_OVERRIDE.with(|cell| cell.borrow().clone());
    match override_sink {
        Some(sink) => sink.record(event),
        None => GLOBAL_METRICS_SINK.record(event),
    }
}

/// Snapshot the current metrics state.
///
/// `window_start_ms` filters by window start (`EventState::since_ms`),
/// not by per-event timestamps.
#[must_use]
pub fn metrics_report(window_start_ms: Option<u64>) -> EventReport {
    metrics::report_window_start(window_start_ms)
}

/// Reset all metrics state.
pub fn metrics_reset_all() {
    metrics::reset_all();
}

/// Run a closure with a temporary metrics sink override on this thread.
pub fn with_metrics_sink<T>(sink: Rc<dyn MetricsSink>, f: impl FnOnce() -> T) -> T {
    struct Guard(Option<Rc<dyn MetricsSink>>);

    impl Drop for Guard {
        fn drop(&mut self) {
            SINK_OVERRIDE.with(|cell| {
                *cell.borrow_mut() = self.0.take();
            });
        }
    }

    let prev = SINK_OVERRIDE.with(|cell| cell.borrow_mut().replace(sink));
    let _guard = Guard(prev);

    f()
}

///
/// TESTS
///
