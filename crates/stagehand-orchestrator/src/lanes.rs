//! Dual-lane scheduler.
//!
//! Each lane is an admission channel drained by one loop that takes a
//! semaphore permit before starting a task, so events start in submission
//! order as slots free up. Lanes share nothing but the retry manager.

use crate::classifier::classify;
use crate::config::LaneConfig;
use crate::retry::{RetryManager, RetryOutcome};
use crate::types::Lane;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use stagehand_core::{Event, StagehandError, StagehandResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

/// Executes one attempt of an event. Errors are handed to the retry manager.
#[async_trait]
pub trait EventProcessor: Send + Sync {
    /// Run one attempt of `event` on `lane`.
    async fn process(&self, event: &Event, lane: Lane) -> StagehandResult<()>;

    /// Called after a failed attempt was queued for retry.
    async fn on_retry_scheduled(&self, _event: &Event, _attempt: u32, _error: &StagehandError) {}

    /// Called once the retry bound is reached.
    async fn on_exhausted(&self, _event: &Event, _error: &StagehandError) {}
}

/// Counters for one lane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LaneStats {
    /// Current concurrency limit.
    pub limit: usize,
    /// Admitted and waiting for a permit.
    pub queued: usize,
    /// Holding a permit right now.
    pub in_flight: usize,
    /// Highest `in_flight` seen since the lane was started.
    pub peak_in_flight: usize,
    /// Attempts that succeeded.
    pub completed: usize,
    /// Attempts that failed, whether retried or not.
    pub failed: usize,
}

/// Counters for both lanes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    /// Standard lane.
    pub standard: LaneStats,
    /// Latency-sensitive lane.
    pub latency_sensitive: LaneStats,
}

#[derive(Default)]
struct LaneCounters {
    queued: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

/// Decrements `in_flight` when the task ends, however it ends.
struct InFlight(Arc<LaneCounters>);

impl InFlight {
    fn enter(counters: Arc<LaneCounters>) -> Self {
        let now = counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        counters.peak.fetch_max(now, Ordering::SeqCst);
        Self(counters)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

struct LaneContext {
    processor: Arc<dyn EventProcessor>,
    retry: Arc<RetryManager>,
}

impl LaneContext {
    async fn run(&self, event: Event, lane: Lane, counters: &LaneCounters) {
        match self.processor.process(&event, lane).await {
            Ok(()) => {
                counters.completed.fetch_add(1, Ordering::SeqCst);
            }
            Err(err) => {
                counters.failed.fetch_add(1, Ordering::SeqCst);
                match self.retry.add(&event, &err) {
                    RetryOutcome::Scheduled { attempt } => {
                        self.processor.on_retry_scheduled(&event, attempt, &err).await;
                    }
                    RetryOutcome::Exhausted { .. } => {
                        self.processor.on_exhausted(&event, &err).await;
                    }
                }
            }
        }
    }
}

struct LaneQueue {
    limit: usize,
    tx: mpsc::UnboundedSender<Event>,
    counters: Arc<LaneCounters>,
}

impl LaneQueue {
    fn start(lane: Lane, limit: usize, context: Arc<LaneContext>, counters: Arc<LaneCounters>) -> Self {
        let limit = limit.max(1);
        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
        let semaphore = Arc::new(Semaphore::new(limit));
        counters.peak.store(0, Ordering::SeqCst);

        let loop_counters = counters.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Ok(permit) = semaphore.clone().acquire_owned().await else {
                    break;
                };
                let guard = InFlight::enter(loop_counters.clone());
                loop_counters.queued.fetch_sub(1, Ordering::SeqCst);
                let context = context.clone();
                let counters = loop_counters.clone();
                debug!(event_id = %event.id, lane = %lane, attempt = event.attempt, "Task started");
                tokio::spawn(async move {
                    let _permit = permit;
                    let _guard = guard;
                    context.run(event, lane, &counters).await;
                });
            }
            debug!(lane = %lane, "Lane queue closed");
        });

        Self { limit, tx, counters }
    }

    fn stats(&self) -> LaneStats {
        LaneStats {
            limit: self.limit,
            queued: self.counters.queued.load(Ordering::SeqCst),
            in_flight: self.counters.in_flight.load(Ordering::SeqCst),
            peak_in_flight: self.counters.peak.load(Ordering::SeqCst),
            completed: self.counters.completed.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
        }
    }
}

/// Two independent bounded-concurrency queues.
///
/// Must be created inside a tokio runtime.
pub struct DualLaneScheduler {
    context: Arc<LaneContext>,
    standard: RwLock<Arc<LaneQueue>>,
    latency_sensitive: RwLock<Arc<LaneQueue>>,
}

impl DualLaneScheduler {
    /// Start both lanes with the limits in `lanes`.
    pub fn new(lanes: &LaneConfig, processor: Arc<dyn EventProcessor>, retry: Arc<RetryManager>) -> Self {
        let context = Arc::new(LaneContext { processor, retry });
        let standard = LaneQueue::start(
            Lane::Standard,
            lanes.standard_concurrency,
            context.clone(),
            Arc::default(),
        );
        let latency_sensitive = LaneQueue::start(
            Lane::LatencySensitive,
            lanes.latency_sensitive_concurrency,
            context.clone(),
            Arc::default(),
        );
        Self {
            context,
            standard: RwLock::new(Arc::new(standard)),
            latency_sensitive: RwLock::new(Arc::new(latency_sensitive)),
        }
    }

    fn slot(&self, lane: Lane) -> &RwLock<Arc<LaneQueue>> {
        match lane {
            Lane::Standard => &self.standard,
            Lane::LatencySensitive => &self.latency_sensitive,
        }
    }

    /// Classify `event` and admit it to its lane.
    pub fn enqueue(&self, event: Event) -> Lane {
        let lane = classify(&event).lane;
        self.submit(event, lane);
        lane
    }

    /// Admit `event` to an explicit lane.
    pub fn submit(&self, event: Event, lane: Lane) {
        let queue = self.slot(lane).read().clone();
        queue.counters.queued.fetch_add(1, Ordering::SeqCst);
        if let Err(mpsc::error::SendError(event)) = queue.tx.send(event) {
            queue.counters.queued.fetch_sub(1, Ordering::SeqCst);
            warn!(event_id = %event.id, lane = %lane, "Lane closed, event dropped");
        }
    }

    /// Apply new concurrency limits. A lane whose limit changed gets a fresh
    /// queue; work already admitted to the old one runs to completion there.
    pub fn reconfigure(&self, lanes: &LaneConfig) {
        for (lane, limit) in [
            (Lane::Standard, lanes.standard_concurrency),
            (Lane::LatencySensitive, lanes.latency_sensitive_concurrency),
        ] {
            let mut slot = self.slot(lane).write();
            if slot.limit == limit.max(1) {
                continue;
            }
            let counters = slot.counters.clone();
            let previous = slot.limit;
            *slot = Arc::new(LaneQueue::start(lane, limit, self.context.clone(), counters));
            info!(lane = %lane, previous, limit, "Lane reconfigured");
        }
    }

    /// Counters for one lane.
    pub fn lane_stats(&self, lane: Lane) -> LaneStats {
        self.slot(lane).read().stats()
    }

    /// Counters for both lanes.
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            standard: self.lane_stats(Lane::Standard),
            latency_sensitive: self.lane_stats(Lane::LatencySensitive),
        }
    }

    /// Wait until both lanes have nothing queued or in flight.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let stats = self.stats();
            let busy = stats.standard.queued
                + stats.standard.in_flight
                + stats.latency_sensitive.queued
                + stats.latency_sensitive.in_flight;
            if busy == 0 {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
