//! Observability: runtime telemetry (metrics) and sink abstractions.
//!
//! This module does not access cache or iterable internals directly.
//! Instrumented code emits `MetricsEvent`s through `sink::record`.

pub(crate) mod metrics;
pub(crate) mod sink;

// re-exports
pub use metrics::{EventOps, EventReport, EventState, HandleCounters, HandleSummary};
pub use sink::{
    LookupOutcome, MetricsEvent, MetricsSink, PatchKind, PublishOutcome, ScanKind,
    metrics_report, metrics_reset_all, with_metrics_sink,
};
