//! Iterative Task Part Execution
//!
//! Runs one part of a scan task: the whole object collection or a single
//! bucket of it.
//!
//! ## Phases
//! 1. **Setup**: object type, filter (narrowed by the bucket), search options
//!    and access mode are resolved. Every configuration problem surfaces here,
//!    before any item is touched.
//! 2. **Counting** (optional): only for whole-collection runs that report an
//!    expected total. A source without a counter leaves the total unset.
//! 3. **Iteration**: matches are streamed and submitted one by one to the
//!    item coordinator. Cancellation is checked between items and progress is
//!    flushed to the task store as it accumulates.

use super::bucket::{BucketNarrowing, Narrowing, StandardBucketNarrowing};
use super::coordinator::{BoundedCoordinator, ItemProcessingCoordinator, ItemRequest};
use super::query::{Filter, ObjectType, SearchOptions};
use super::registry::{ItemProcessor, ScanHandlerRegistry};
use super::source::{AccessAuthorizer, ObjectSource, OwnerAllowList};
use super::store::TaskStore;
use super::types::*;
use crate::config::ExecutionConfig;
use crate::error::ScanError;
use crate::scheduler::LocalScheduler;

use chrono::Utc;
use futures::StreamExt;
use std::sync::Arc;

/// The two ways of reading objects.
#[derive(Clone)]
pub struct ObjectSources {
    /// Policy-aware model layer (default).
    pub model: Arc<dyn ObjectSource>,
    /// Raw repository access.
    pub repository: Arc<dyn ObjectSource>,
}

/// Per-run state created at setup. The filter has no setter: once narrowed
/// by the bucket it stays that way for the whole run.
pub struct TaskPartExecutionState {
    task_id: TaskId,
    object_type: ObjectType,
    filter: Filter,
    options: SearchOptions,
    access_mode: AccessMode,
    bucket: Option<u32>,
    bucket_limited: bool,
    strategy: FailureStrategy,
    processor: Arc<dyn ItemProcessor>,
    expected_total: Option<u64>,
}

impl TaskPartExecutionState {
    pub fn object_type(&self) -> ObjectType {
        self.object_type
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    pub fn options(&self) -> &SearchOptions {
        &self.options
    }

    pub fn access_mode(&self) -> AccessMode {
        self.access_mode
    }

    /// Whether the bucket actually restricts the collection.
    pub fn is_bucket_limited(&self) -> bool {
        self.bucket_limited
    }

    pub fn failure_strategy(&self) -> FailureStrategy {
        self.strategy
    }

    pub fn expected_total(&self) -> Option<u64> {
        self.expected_total
    }
}

/// Outcome of the iteration phase.
struct Iteration {
    status: RunStatus,
    progress: ProgressSnapshot,
    failures: Vec<ItemFailure>,
}

pub struct IterativePartExecution {
    handlers: Arc<ScanHandlerRegistry>,
    sources: ObjectSources,
    store: Arc<dyn TaskStore>,
    scheduler: Arc<LocalScheduler>,
    narrowing: Arc<dyn BucketNarrowing>,
    authorizer: Arc<dyn AccessAuthorizer>,
    config: ExecutionConfig,
}

impl IterativePartExecution {
    /// Raw access is denied to everyone until an authorizer is configured.
    pub fn new(
        handlers: Arc<ScanHandlerRegistry>,
        sources: ObjectSources,
        store: Arc<dyn TaskStore>,
        scheduler: Arc<LocalScheduler>,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            handlers,
            sources,
            store,
            scheduler,
            narrowing: Arc::new(StandardBucketNarrowing),
            authorizer: Arc::new(OwnerAllowList::default()),
            config,
        }
    }

    pub fn with_narrowing(mut self, narrowing: Arc<dyn BucketNarrowing>) -> Self {
        self.narrowing = narrowing;
        self
    }

    pub fn with_authorizer(mut self, authorizer: Arc<dyn AccessAuthorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    /// Runs one task part to completion and records the result on the task.
    ///
    /// Never returns an error: every outcome, setup failures included, ends
    /// up in the returned (and recorded) `PartRunResult`.
    pub async fn run(&self, request: RunRequest) -> PartRunResult {
        let bucket = request.bucket.as_ref().map(|b| b.sequential_number);
        let mut result = PartRunResult::started(request.task_id.clone(), bucket);

        if !self.scheduler.is_accepting() {
            tracing::warn!(
                "Local scheduler is not accepting work, task {} not started",
                request.task_id
            );
            return self.finalize(result).await;
        }

        let task = match self.store.get(&request.task_id).await {
            Ok(task) => task,
            Err(e) => {
                tracing::error!("Cannot load task {}: {}", request.task_id, e);
                result.status = RunStatus::Failed {
                    reason: e.to_string(),
                };
                return self.finalize(result).await;
            }
        };

        let mut state = match self.prepare(&task, &request).await {
            Ok(state) => state,
            Err(e) => {
                tracing::error!("Setup of task '{}' failed: {}", task.name, e);
                result.status = RunStatus::Failed {
                    reason: e.to_string(),
                };
                return self.finalize(result).await;
            }
        };

        if state.filter.is_none() {
            tracing::info!(
                "Task '{}' bucket {:?} matches nothing, completing immediately",
                task.name,
                bucket
            );
            result.status = RunStatus::Success;
            return self.finalize(result).await;
        }

        if task.report_expected_total && !state.bucket_limited {
            self.count_expected_total(&mut state).await;
        }
        result.expected_total = state.expected_total;

        tracing::info!(
            "Scanning {} for task '{}' (bucket {:?}, {:?} access)",
            state.object_type,
            task.name,
            bucket,
            state.access_mode
        );

        let iteration = self.iterate(&state, &request).await;
        result.status = iteration.status;
        result.progress = iteration.progress;
        result.failures = iteration.failures;

        tracing::info!(
            "Task '{}' bucket {:?} finished: {:?} ({} processed, {} failed)",
            task.name,
            bucket,
            result.status,
            result.progress.processed,
            result.progress.failed
        );

        self.finalize(result).await
    }

    /// Builds the per-run state. Fails fast on any configuration problem.
    pub async fn prepare(
        &self,
        task: &TaskRecord,
        request: &RunRequest,
    ) -> Result<TaskPartExecutionState, ScanError> {
        let handler = self.handlers.get(&task.handler)?;

        let object_type = Self::resolve_object_type(task, request, handler.default_object_type())?;

        let mut filter = handler.base_filter(task)?;
        if let Some(selection_filter) = task.selection.as_ref().and_then(|s| s.filter.clone()) {
            filter = filter.and(selection_filter);
        }

        let narrowing = self.narrowing.narrow(
            &filter,
            object_type,
            handler.attribute_resolver(),
            request.bucket.as_ref(),
        )?;
        let (filter, bucket_limited) = match narrowing {
            Narrowing::NoNarrowing => (filter, false),
            Narrowing::Narrowed(narrowed) => (narrowed, true),
        };

        let options = handler.search_options(task);

        let access_mode = if handler.requires_direct_access() {
            AccessMode::Direct
        } else if task.raw_access {
            self.authorizer.authorize_raw_access(task).await?;
            AccessMode::Direct
        } else {
            AccessMode::PolicyAware
        };

        Ok(TaskPartExecutionState {
            task_id: task.id.clone(),
            object_type,
            filter,
            options,
            access_mode,
            bucket: request.bucket.as_ref().map(|b| b.sequential_number),
            bucket_limited,
            strategy: handler.failure_strategy(),
            processor: handler.item_processor(),
            expected_total: None,
        })
    }

    /// Run override, then the task (its own type, then its selection), then
    /// the handler default.
    fn resolve_object_type(
        task: &TaskRecord,
        request: &RunRequest,
        handler_default: Option<ObjectType>,
    ) -> Result<ObjectType, ScanError> {
        let declared = request
            .object_type_override
            .as_deref()
            .or(task.object_type.as_deref())
            .or(task
                .selection
                .as_ref()
                .and_then(|s| s.object_type.as_deref()));

        match (declared, handler_default) {
            (Some(name), _) => name.parse(),
            (None, Some(object_type)) => Ok(object_type),
            (None, None) => Err(ScanError::Configuration(format!(
                "no object type for task '{}'",
                task.name
            ))),
        }
    }

    fn source_for(&self, mode: AccessMode) -> &Arc<dyn ObjectSource> {
        match mode {
            AccessMode::PolicyAware => &self.sources.model,
            AccessMode::Direct => &self.sources.repository,
        }
    }

    async fn count_expected_total(&self, state: &mut TaskPartExecutionState) {
        let source = self.source_for(state.access_mode);
        match source
            .count(state.object_type, &state.filter, &state.options)
            .await
        {
            Ok(Some(total)) => {
                state.expected_total = Some(total);
                if let Err(e) = self.store.set_expected_total(&state.task_id, total).await {
                    tracing::warn!("Failed to store expected total: {}", e);
                }
            }
            Ok(None) => {
                tracing::debug!(
                    "Source cannot count {}, expected total left unset",
                    state.object_type
                );
            }
            Err(e) => {
                tracing::warn!(
                    "Counting {} failed, expected total left unset: {}",
                    state.object_type,
                    e
                );
            }
        }
    }

    async fn iterate(&self, state: &TaskPartExecutionState, request: &RunRequest) -> Iteration {
        let coordinator = BoundedCoordinator::new(
            self.config.worker_threads,
            state.strategy,
            self.config.max_recorded_failures,
        );
        let run_token = self.scheduler.run_token();
        let source = self.source_for(state.access_mode);

        let mut stream = match source
            .search(state.object_type, &state.filter, &state.options)
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!("Search over {} could not start: {}", state.object_type, e);
                return Iteration {
                    status: RunStatus::Failed {
                        reason: e.to_string(),
                    },
                    progress: ProgressSnapshot::default(),
                    failures: Vec::new(),
                };
            }
        };

        let context = Arc::new(ItemContext {
            task_id: state.task_id.clone(),
            object_type: state.object_type,
            access_mode: state.access_mode,
            bucket: state.bucket,
        });

        let mut flushed = ProgressSnapshot::default();
        let mut sequence: u64 = 0;
        let mut halted: Option<RunStatus> = None;

        loop {
            if run_token.is_cancelled() || request.suspend.is_cancelled() {
                halted = Some(RunStatus::Interrupted);
                break;
            }

            let next = tokio::select! {
                biased;
                _ = run_token.cancelled() => None,
                _ = request.suspend.cancelled() => None,
                next = stream.next() => Some(next),
            };

            let item = match next {
                None => {
                    halted = Some(RunStatus::Interrupted);
                    break;
                }
                Some(None) => break,
                Some(Some(Ok(item))) => item,
                Some(Some(Err(e))) => {
                    tracing::error!("Object stream failed after {} items: {}", sequence, e);
                    halted = Some(RunStatus::Aborted {
                        reason: e.to_string(),
                    });
                    break;
                }
            };

            sequence += 1;
            let keep_going = coordinator
                .submit(ItemRequest {
                    sequence,
                    item,
                    context: context.clone(),
                    processor: state.processor.clone(),
                })
                .await;

            let progress = coordinator.progress();
            if progress.processed - flushed.processed >= self.config.progress_flush_every {
                self.flush_progress(&state.task_id, &progress, &mut flushed).await;
            }

            if !keep_going {
                break;
            }
        }

        // In-flight items always complete; progress never counts a half-submitted one.
        let progress = coordinator.finish().await;
        self.flush_progress(&state.task_id, &progress, &mut flushed).await;

        let status = match halted {
            Some(status) => status,
            None if coordinator.stop_requested() => RunStatus::Aborted {
                reason: "item failed under STOP failure strategy".to_string(),
            },
            None if progress.failed > 0 => RunStatus::PartialError,
            None => RunStatus::Success,
        };

        Iteration {
            status,
            progress,
            failures: coordinator.failures().await,
        }
    }

    /// Writes what completed since the last flush. On failure the delta is
    /// kept and goes out with the next flush.
    async fn flush_progress(
        &self,
        task_id: &TaskId,
        current: &ProgressSnapshot,
        flushed: &mut ProgressSnapshot,
    ) {
        let delta = current.delta(flushed);
        if delta.is_empty() {
            return;
        }
        match self.store.add_progress(task_id, delta).await {
            Ok(()) => *flushed = *current,
            Err(e) => tracing::warn!("Progress flush for task {} failed: {}", task_id, e),
        }
    }

    async fn finalize(&self, mut result: PartRunResult) -> PartRunResult {
        result.finished_at = Utc::now();
        if let Err(e) = self.store.record_result(&result).await {
            tracing::warn!("Failed to record result of task {}: {}", result.task_id, e);
        }
        result
    }
}
