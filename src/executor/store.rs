//! Task Store
//!
//! Durable home of task records. Part runs flush progress into it as deltas
//! while they run, so several buckets of one task running at the same time
//! add up to a single task-level counter.

use super::types::*;
use crate::error::ScanError;

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn get(&self, task_id: &TaskId) -> Result<TaskRecord, ScanError>;

    /// Adds completed-item counters to the task's progress.
    async fn add_progress(&self, task_id: &TaskId, delta: ProgressSnapshot)
    -> Result<(), ScanError>;

    async fn set_expected_total(&self, task_id: &TaskId, total: u64) -> Result<(), ScanError>;

    async fn record_result(&self, result: &PartRunResult) -> Result<(), ScanError>;
}

/// `DashMap`-backed task store.
pub struct InMemoryTaskStore {
    tasks: DashMap<TaskId, TaskRecord>,
    results: DashMap<TaskId, Vec<PartRunResult>>,
    progress_flushes: AtomicUsize,
    writable: AtomicBool,
}

impl InMemoryTaskStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Stores a task record, returning its id.
    pub fn put(&self, task: TaskRecord) -> TaskId {
        let id = task.id.clone();
        self.tasks.insert(id.clone(), task);
        id
    }

    pub fn snapshot(&self, task_id: &TaskId) -> Option<TaskRecord> {
        self.tasks.get(task_id).map(|entry| entry.value().clone())
    }

    /// Every result recorded for the task, in recording order.
    pub fn results(&self, task_id: &TaskId) -> Vec<PartRunResult> {
        self.results
            .get(task_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    pub fn progress_flushes(&self) -> usize {
        self.progress_flushes.load(Ordering::SeqCst)
    }

    /// Simulates write failures of the backing store.
    pub fn set_writable(&self, writable: bool) {
        self.writable.store(writable, Ordering::SeqCst);
    }

    fn ensure_writable(&self) -> Result<(), ScanError> {
        if self.writable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ScanError::Store("task store is read-only".to_string()))
        }
    }

    fn not_found(task_id: &TaskId) -> ScanError {
        ScanError::Configuration(format!("task {} not found", task_id))
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self {
            tasks: DashMap::new(),
            results: DashMap::new(),
            progress_flushes: AtomicUsize::new(0),
            writable: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn get(&self, task_id: &TaskId) -> Result<TaskRecord, ScanError> {
        self.snapshot(task_id)
            .ok_or_else(|| Self::not_found(task_id))
    }

    async fn add_progress(
        &self,
        task_id: &TaskId,
        delta: ProgressSnapshot,
    ) -> Result<(), ScanError> {
        self.ensure_writable()?;
        let mut task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| Self::not_found(task_id))?;
        task.progress.add(&delta);
        self.progress_flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn set_expected_total(&self, task_id: &TaskId, total: u64) -> Result<(), ScanError> {
        self.ensure_writable()?;
        let mut task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| Self::not_found(task_id))?;
        task.expected_total = Some(total);
        Ok(())
    }

    async fn record_result(&self, result: &PartRunResult) -> Result<(), ScanError> {
        self.ensure_writable()?;
        let mut task = self
            .tasks
            .get_mut(&result.task_id)
            .ok_or_else(|| Self::not_found(&result.task_id))?;
        task.last_result = Some(result.clone());
        drop(task);

        self.results
            .entry(result.task_id.clone())
            .or_default()
            .push(result.clone());
        Ok(())
    }
}
