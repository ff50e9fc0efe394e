//! Item Processing Coordinator
//!
//! Accepts one item at a time from the scan loop and processes it with a
//! bounded level of concurrency. `submit` applies backpressure: it waits for
//! a free slot, so the scan never runs ahead of the workers by more than the
//! configured concurrency.
//!
//! Completion order across items is not guaranteed; only submission order is.

use super::query::ObjectRecord;
use super::registry::ItemProcessor;
use super::types::*;
use crate::error::ItemError;

use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;

/// One scanned object bound to the shared processor.
pub struct ItemRequest {
    pub sequence: u64,
    pub item: ObjectRecord,
    pub context: Arc<ItemContext>,
    pub processor: Arc<dyn ItemProcessor>,
}

#[async_trait]
pub trait ItemProcessingCoordinator: Send + Sync {
    /// Hands one item over. Returns `false` when the scan should stop submitting.
    async fn submit(&self, request: ItemRequest) -> bool;

    /// Live counters of completed items.
    fn progress(&self) -> ProgressSnapshot;

    /// Waits for every in-flight item and returns the final counters.
    async fn finish(&self) -> ProgressSnapshot;

    /// Recorded item failures, ordered by submission sequence.
    async fn failures(&self) -> Vec<ItemFailure>;

    /// Whether the failure strategy asked the scan to stop.
    fn stop_requested(&self) -> bool;
}

/// Outcome counters shared with the worker tasks. `processed` is derived
/// from the other two so a snapshot is always self-consistent.
struct Outcomes {
    succeeded: AtomicU64,
    failed: AtomicU64,
    stop: AtomicBool,
    strategy: FailureStrategy,
    max_recorded_failures: usize,
    failures: Mutex<Vec<ItemFailure>>,
}

impl Outcomes {
    async fn process(&self, request: ItemRequest) {
        let ItemRequest {
            sequence,
            item,
            context,
            processor,
        } = request;

        let result = match AssertUnwindSafe(processor.process(&item, &context))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(_) => Err(ItemError::new("item processor panicked")),
        };

        match result {
            Ok(()) => {
                tracing::trace!("Item {} ({}) processed", sequence, item.id);
                self.succeeded.fetch_add(1, Ordering::SeqCst);
            }
            Err(error) => {
                tracing::debug!("Item {} ({}) failed: {}", sequence, item.id, error);
                self.failed.fetch_add(1, Ordering::SeqCst);

                let mut failures = self.failures.lock().await;
                if failures.len() < self.max_recorded_failures {
                    failures.push(ItemFailure {
                        item_id: item.id.clone(),
                        sequence,
                        error,
                    });
                }
                drop(failures);

                if self.strategy == FailureStrategy::Stop {
                    self.stop.store(true, Ordering::SeqCst);
                }
            }
        }
    }

    fn snapshot(&self) -> ProgressSnapshot {
        let succeeded = self.succeeded.load(Ordering::SeqCst);
        let failed = self.failed.load(Ordering::SeqCst);
        ProgressSnapshot {
            processed: succeeded + failed,
            succeeded,
            failed,
        }
    }
}

/// Semaphore-bounded coordinator. With a concurrency of one, items are
/// processed inline on the scan task.
pub struct BoundedCoordinator {
    concurrency: usize,
    permits: Arc<Semaphore>,
    in_flight: Mutex<JoinSet<()>>,
    outcomes: Arc<Outcomes>,
}

impl BoundedCoordinator {
    pub fn new(
        concurrency: usize,
        strategy: FailureStrategy,
        max_recorded_failures: usize,
    ) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            concurrency,
            permits: Arc::new(Semaphore::new(concurrency)),
            in_flight: Mutex::new(JoinSet::new()),
            outcomes: Arc::new(Outcomes {
                succeeded: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                stop: AtomicBool::new(false),
                strategy,
                max_recorded_failures,
                failures: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }
}

#[async_trait]
impl ItemProcessingCoordinator for BoundedCoordinator {
    async fn submit(&self, request: ItemRequest) -> bool {
        if self.outcomes.stop.load(Ordering::SeqCst) {
            return false;
        }

        if self.concurrency == 1 {
            self.outcomes.process(request).await;
            return !self.outcomes.stop.load(Ordering::SeqCst);
        }

        let permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return false,
        };

        let outcomes = self.outcomes.clone();
        let mut in_flight = self.in_flight.lock().await;
        // Reap finished workers so the set stays small on long scans.
        while in_flight.try_join_next().is_some() {}
        in_flight.spawn(async move {
            outcomes.process(request).await;
            drop(permit);
        });

        !self.outcomes.stop.load(Ordering::SeqCst)
    }

    fn progress(&self) -> ProgressSnapshot {
        self.outcomes.snapshot()
    }

    async fn finish(&self) -> ProgressSnapshot {
        let mut in_flight = self.in_flight.lock().await;
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                tracing::warn!("Item worker did not complete: {}", e);
            }
        }
        self.outcomes.snapshot()
    }

    async fn failures(&self) -> Vec<ItemFailure> {
        let mut failures = self.outcomes.failures.lock().await.clone();
        failures.sort_by_key(|f| f.sequence);
        failures
    }

    fn stop_requested(&self) -> bool {
        self.outcomes.stop.load(Ordering::SeqCst)
    }
}
