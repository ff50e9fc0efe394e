use super::bucket::WorkBucket;
use super::query::{Filter, ObjectType, SearchOptions};
use crate::error::ItemError;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio_util::sync::CancellationToken;

/// Unique identifier of a task's durable record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TaskId(pub String);

impl TaskId {
    /// Generates a new random UUID v4-based TaskId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference-with-filter target carried by some tasks.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ObjectSelection {
    pub object_type: Option<String>,
    pub filter: Option<Filter>,
}

/// Counters of completed items.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl ProgressSnapshot {
    pub fn is_empty(&self) -> bool {
        self.processed == 0 && self.succeeded == 0 && self.failed == 0
    }

    /// What happened since `earlier`.
    pub fn delta(&self, earlier: &ProgressSnapshot) -> ProgressSnapshot {
        ProgressSnapshot {
            processed: self.processed.saturating_sub(earlier.processed),
            succeeded: self.succeeded.saturating_sub(earlier.succeeded),
            failed: self.failed.saturating_sub(earlier.failed),
        }
    }

    pub fn add(&mut self, delta: &ProgressSnapshot) {
        self.processed += delta.processed;
        self.succeeded += delta.succeeded;
        self.failed += delta.failed;
    }
}

/// The durable task record as seen by one part execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub name: String,
    pub owner: String,
    /// Name of the registered scan handler.
    pub handler: String,
    pub object_type: Option<String>,
    pub filter: Option<Filter>,
    pub selection: Option<ObjectSelection>,
    pub search_options: Option<SearchOptions>,
    /// Ask for direct store access instead of the policy-aware path.
    #[serde(default)]
    pub raw_access: bool,
    #[serde(default)]
    pub report_expected_total: bool,
    #[serde(default)]
    pub progress: ProgressSnapshot,
    pub expected_total: Option<u64>,
    pub last_result: Option<PartRunResult>,
}

impl TaskRecord {
    pub fn new(name: &str, handler: &str) -> Self {
        Self {
            id: TaskId::new(),
            name: name.to_string(),
            owner: String::new(),
            handler: handler.to_string(),
            object_type: None,
            filter: None,
            selection: None,
            search_options: None,
            raw_access: false,
            report_expected_total: false,
            progress: ProgressSnapshot::default(),
            expected_total: None,
            last_result: None,
        }
    }

    pub fn with_owner(mut self, owner: &str) -> Self {
        self.owner = owner.to_string();
        self
    }

    pub fn with_object_type(mut self, object_type: &str) -> Self {
        self.object_type = Some(object_type.to_string());
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_selection(mut self, selection: ObjectSelection) -> Self {
        self.selection = Some(selection);
        self
    }

    pub fn with_raw_access(mut self) -> Self {
        self.raw_access = true;
        self
    }

    pub fn reporting_expected_total(mut self) -> Self {
        self.report_expected_total = true;
        self
    }
}

/// How an item failure affects the rest of the run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum FailureStrategy {
    /// Record the failure and keep scanning.
    #[default]
    Continue,
    /// Stop submitting items after the first failure.
    Stop,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccessMode {
    /// Default path that applies access policies.
    PolicyAware,
    /// Raw access to the underlying store.
    Direct,
}

/// Read-only context shared by every item request of one run.
#[derive(Debug, Clone)]
pub struct ItemContext {
    pub task_id: TaskId,
    pub object_type: ObjectType,
    pub access_mode: AccessMode,
    pub bucket: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemFailure {
    pub item_id: String,
    pub sequence: u64,
    pub error: ItemError,
}

/// Final status of one part run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    /// Finished, but some items failed.
    PartialError,
    /// Stopped mid-scan: STOP strategy tripped or the source broke down.
    Aborted { reason: String },
    /// Setup-time failure; no item was touched.
    Failed { reason: String },
    /// Cancelled, suspended or refused by the local scheduler.
    Interrupted,
}

impl RunStatus {
    /// Success with or without item errors.
    pub fn is_completed(&self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::PartialError)
    }
}

/// Result record attached to the task after each run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PartRunResult {
    pub task_id: TaskId,
    pub bucket: Option<u32>,
    pub status: RunStatus,
    pub progress: ProgressSnapshot,
    pub expected_total: Option<u64>,
    pub failures: Vec<ItemFailure>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl PartRunResult {
    pub fn started(task_id: TaskId, bucket: Option<u32>) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            bucket,
            status: RunStatus::Interrupted,
            progress: ProgressSnapshot::default(),
            expected_total: None,
            failures: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }
}

/// One request to run a task part.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub task_id: TaskId,
    pub bucket: Option<WorkBucket>,
    pub object_type_override: Option<String>,
    /// Cancelled by the owner to suspend or cancel the run between items.
    pub suspend: CancellationToken,
}

impl RunRequest {
    pub fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            bucket: None,
            object_type_override: None,
            suspend: CancellationToken::new(),
        }
    }

    pub fn with_bucket(mut self, bucket: WorkBucket) -> Self {
        self.bucket = Some(bucket);
        self
    }

    pub fn with_object_type(mut self, object_type: &str) -> Self {
        self.object_type_override = Some(object_type.to_string());
        self
    }

    pub fn with_suspend(mut self, token: CancellationToken) -> Self {
        self.suspend = token;
        self
    }
}
