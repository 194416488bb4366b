//! Timing helpers attached to scheduling contexts.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::context::SchedulingContext;

/// Context key of the scheduler's end-to-end and pipeline stopwatches.
pub const SCHEDULING_STOPWATCHES_KEY: &str = "polaris-internal.stopwatches.scheduling";
/// Context key of [`BindingPipelineStopwatches`].
pub const BINDING_STOPWATCHES_KEY: &str = "polaris-internal.stopwatches.binding";

#[derive(Debug, Default, Clone, Copy)]
struct Times {
    start: Option<Instant>,
    stop: Option<Instant>,
}

/// A start/stop timer that can be shared between tasks.
#[derive(Debug, Default)]
pub struct Stopwatch {
    times: Mutex<Times>,
}

impl Stopwatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self) {
        self.start_at(Instant::now());
    }

    pub fn start_at(&self, start: Instant) {
        let mut times = self.times.lock().unwrap_or_else(PoisonError::into_inner);
        times.start = Some(start);
        times.stop = None;
    }

    pub fn stop(&self) {
        self.times.lock().unwrap_or_else(PoisonError::into_inner).stop = Some(Instant::now());
    }

    pub fn is_started(&self) -> bool {
        self.times.lock().unwrap_or_else(PoisonError::into_inner).start.is_some()
    }

    pub fn is_stopped(&self) -> bool {
        self.times.lock().unwrap_or_else(PoisonError::into_inner).stop.is_some()
    }

    /// Elapsed time between start and stop. A running stopwatch reports the
    /// time elapsed so far; one that was never started reports zero.
    pub fn duration(&self) -> Duration {
        let times = *self.times.lock().unwrap_or_else(PoisonError::into_inner);
        match (times.start, times.stop) {
            (Some(start), Some(stop)) => stop.saturating_duration_since(start),
            (Some(start), None) => start.elapsed(),
            _ => Duration::ZERO,
        }
    }

    pub fn duration_ms(&self) -> i64 {
        i64::try_from(self.duration().as_millis()).unwrap_or(i64::MAX)
    }
}

/// Stopwatches of the scheduler for a single pod.
#[derive(Debug, Default)]
pub struct SchedulingStopwatches {
    /// From arrival in the scheduling queue until the decision is committed.
    pub end_to_end: Stopwatch,
    /// Time spent waiting in the scheduling queue.
    pub queue_time: Stopwatch,
    /// Time spent in the sampling and decision pipelines.
    pub pipeline: Stopwatch,
    /// Time spent committing the decision to the target cluster.
    pub commit: Stopwatch,
}

/// Timing breakdown of one binding decision.
#[derive(Debug, Default)]
pub struct BindingPipelineStopwatches {
    pub queue_time: Stopwatch,
    pub node_lock_time: Stopwatch,
    pub fetch_node_info: Stopwatch,
    pub binding_pipeline: Stopwatch,
    pub commit_decision: Stopwatch,
}

impl BindingPipelineStopwatches {
    /// Fetch the stopwatches stored in `ctx`, creating and storing them if
    /// absent.
    pub fn of(ctx: &SchedulingContext) -> Arc<Self> {
        if let Some(stopwatches) = ctx.read::<Self>(BINDING_STOPWATCHES_KEY) {
            return stopwatches;
        }
        let stopwatches = Arc::new(Self::default());
        ctx.write_arc(BINDING_STOPWATCHES_KEY, stopwatches.clone());
        stopwatches
    }
}

impl SchedulingStopwatches {
    pub fn of(ctx: &SchedulingContext) -> Arc<Self> {
        if let Some(stopwatches) = ctx.read::<Self>(SCHEDULING_STOPWATCHES_KEY) {
            return stopwatches;
        }
        let stopwatches = Arc::new(Self::default());
        ctx.write_arc(SCHEDULING_STOPWATCHES_KEY, stopwatches.clone());
        stopwatches
    }
}
