//! Metrics sink boundary.
//!
//! Controller logic MUST NOT depend on obs::metrics directly.
//! All instrumentation flows through MetricsEvent and MetricsSink.
//!
//! This module is the only allowed bridge between lifecycle logic
//! and the thread-local metrics state.
use crate::obs::metrics;
use std::cell::RefCell;

thread_local! {
    static SINK_OVERRIDE: RefCell<Option<*const dyn MetricsSink>> = RefCell::new(None);
}

///
/// MetricsEvent
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MetricsEvent {
    Initialized {
        groups: u64,
    },
    UpdateFinish {
        iteration: i64,
        evaluated: u64,
        failed: u64,
    },
    TestFinish {
        iteration: i64,
        evaluated: u64,
        converged: u64,
    },
    Finalized {
        finished: u64,
        failed: u64,
        dropped: u64,
    },
    ConsistencyViolation,
}

///
/// MetricsSink
///

pub trait MetricsSink {
    fn record(&self, event: MetricsEvent);
}

/// GlobalMetricsSink
/// Default sink that writes into the thread-local metrics state.
/// Acts as the concrete sink when no scoped override is installed.

pub(crate) struct GlobalMetricsSink;

impl MetricsSink for GlobalMetricsSink {
    fn record(&self, event: MetricsEvent) {
        metrics::with_state_mut(|m| {
            let ops = &mut m.ops;
            match event {
                MetricsEvent::Initialized { groups } => {
                    ops.runs_initialized = ops.runs_initialized.saturating_add(1);
                    ops.groups_discovered = ops.groups_discovered.saturating_add(groups);
                }
                MetricsEvent::UpdateFinish {
                    evaluated, failed, ..
                } => {
                    ops.update_calls = ops.update_calls.saturating_add(1);
                    ops.groups_evaluated = ops.groups_evaluated.saturating_add(evaluated);
                    ops.groups_failed = ops.groups_failed.saturating_add(failed);
                }
                MetricsEvent::TestFinish { converged, .. } => {
                    ops.test_calls = ops.test_calls.saturating_add(1);
                    ops.groups_converged = ops.groups_converged.saturating_add(converged);
                }
                MetricsEvent::Finalized {
                    finished,
                    failed,
                    dropped,
                } => {
                    ops.finalize_calls = ops.finalize_calls.saturating_add(1);
                    ops.records_persisted = ops
                        .records_persisted
                        .saturating_add(finished.saturating_add(failed));
                    ops.groups_dropped = ops.groups_dropped.saturating_add(dropped);
                }
                MetricsEvent::ConsistencyViolation => {
                    ops.consistency_violations = ops.consistency_violations.saturating_add(1);
                }
            }
        });
    }
}

pub(crate) const GLOBAL_METRICS_SINK: GlobalMetricsSink = GlobalMetricsSink;

pub(crate) fn record(event: MetricsEvent) {
    let override_ptr = SINK_OVERRIDE.with(|cell| *cell.borrow());
    if let Some(ptr) = override_ptr {
        // SAFETY:
        // Preconditions:
        // - `ptr` was produced from a valid `&dyn MetricsSink` in `with_metrics_sink`.
        // - `with_metrics_sink` always restores the previous pointer before returning,
        //   including unwind paths via `Guard::drop`.
        // - `record` is synchronous and never stores `ptr` beyond this call.
        //
        // Aliasing:
        // - Only a shared reference is materialized, matching the shared borrow
        //   used to install the override.
        unsafe { (&*ptr).record(event) };
    } else {
        GLOBAL_METRICS_SINK.record(event);
    }
}

/// Snapshot the current metrics state.
#[must_use]
pub fn metrics_report() -> metrics::EventReport {
    metrics::report()
}

/// Reset all metrics state.
pub fn metrics_reset_all() {
    metrics::reset_all();
}

/// Run a closure with a temporary metrics sink override.
#[cfg(test)]
pub(crate) fn with_metrics_sink<T>(sink: &dyn MetricsSink, f: impl FnOnce() -> T) -> T {
    struct Guard(Option<*const dyn MetricsSink>);

    impl Drop for Guard {
        fn drop(&mut self) {
            SINK_OVERRIDE.with(|cell| {
                *cell.borrow_mut() = self.0;
            });
        }
    }

    // SAFETY:
    // Preconditions:
    // - `sink_ptr` is installed only for this dynamic scope.
    // - `Guard` always restores the previous slot on all exits, including panic.
    // - `record` only dereferences synchronously and never persists `sink_ptr`.
    //
    // What would break this:
    // - Any async/deferred use of `sink_ptr` beyond this scope.
    // - Any path that bypasses Guard restoration.
    let sink_ptr = unsafe { std::mem::transmute::<&dyn MetricsSink, *const dyn MetricsSink>(sink) };
    let prev = SINK_OVERRIDE.with(|cell| {
        let mut slot = cell.borrow_mut();
        slot.replace(sink_ptr)
    });
    let _guard = Guard(prev);

    f()
}
