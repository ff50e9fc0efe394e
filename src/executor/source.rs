//! Object sources
//!
//! A scan reads objects either through the policy-aware model layer or
//! directly from the repository. Both sit behind `ObjectSource`; which one a
//! run uses is decided at setup and never changes mid-run.

use super::query::{Filter, ObjectRecord, ObjectType, SearchOptions};
use super::types::TaskRecord;
use crate::error::ScanError;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{self, BoxStream};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

pub type ObjectStream = BoxStream<'static, Result<ObjectRecord, ScanError>>;

#[async_trait]
pub trait ObjectSource: Send + Sync {
    /// Number of matching objects, or `None` when the source cannot count.
    async fn count(
        &self,
        object_type: ObjectType,
        filter: &Filter,
        options: &SearchOptions,
    ) -> Result<Option<u64>, ScanError>;

    /// Streams matching objects. Errors inside the stream abort the run.
    async fn search(
        &self,
        object_type: ObjectType,
        filter: &Filter,
        options: &SearchOptions,
    ) -> Result<ObjectStream, ScanError>;
}

/// `DashMap`-backed object source.
///
/// Results are ordered by object id. Fault switches let callers simulate a
/// source without a counter or one that breaks down mid-stream.
pub struct InMemoryObjectSource {
    objects: DashMap<(ObjectType, String), ObjectRecord>,
    supports_count: AtomicBool,
    /// Number of objects yielded before the stream errors; `usize::MAX` disables.
    fail_after: AtomicUsize,
    searches: AtomicUsize,
    counts: AtomicUsize,
}

impl InMemoryObjectSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, object: ObjectRecord) {
        self.objects
            .insert((object.object_type, object.id.clone()), object);
    }

    pub fn extend(&self, objects: impl IntoIterator<Item = ObjectRecord>) {
        for object in objects {
            self.insert(object);
        }
    }

    pub fn set_supports_count(&self, supported: bool) {
        self.supports_count.store(supported, Ordering::SeqCst);
    }

    pub fn fail_after(&self, yielded: usize) {
        self.fail_after.store(yielded, Ordering::SeqCst);
    }

    pub fn search_count(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    pub fn count_calls(&self) -> usize {
        self.counts.load(Ordering::SeqCst)
    }

    fn matching(&self, object_type: ObjectType, filter: &Filter) -> Vec<ObjectRecord> {
        let mut found: Vec<ObjectRecord> = self
            .objects
            .iter()
            .filter(|entry| entry.key().0 == object_type && filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }
}

impl Default for InMemoryObjectSource {
    fn default() -> Self {
        Self {
            objects: DashMap::new(),
            supports_count: AtomicBool::new(true),
            fail_after: AtomicUsize::new(usize::MAX),
            searches: AtomicUsize::new(0),
            counts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ObjectSource for InMemoryObjectSource {
    async fn count(
        &self,
        object_type: ObjectType,
        filter: &Filter,
        _options: &SearchOptions,
    ) -> Result<Option<u64>, ScanError> {
        self.counts.fetch_add(1, Ordering::SeqCst);
        if !self.supports_count.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(Some(self.matching(object_type, filter).len() as u64))
    }

    async fn search(
        &self,
        object_type: ObjectType,
        filter: &Filter,
        options: &SearchOptions,
    ) -> Result<ObjectStream, ScanError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        let found = self.matching(object_type, filter);
        tracing::trace!(
            "In-memory search for {} matched {} objects ({:?})",
            object_type,
            found.len(),
            options.iteration_method
        );

        let fail_after = self.fail_after.load(Ordering::SeqCst);
        let items: Vec<Result<ObjectRecord, ScanError>> = if fail_after < found.len() {
            found
                .into_iter()
                .take(fail_after)
                .map(Ok)
                .chain(std::iter::once(Err(ScanError::Source(format!(
                    "stream broke after {} objects",
                    fail_after
                )))))
                .collect()
        } else {
            found.into_iter().map(Ok).collect()
        };

        Ok(Box::pin(stream::iter(items)))
    }
}

/// Gatekeeper for switching a run to direct store access.
#[async_trait]
pub trait AccessAuthorizer: Send + Sync {
    async fn authorize_raw_access(&self, task: &TaskRecord) -> Result<(), ScanError>;
}

/// Grants raw access to tasks owned by one of the listed principals.
#[derive(Debug, Default)]
pub struct OwnerAllowList {
    owners: HashSet<String>,
}

impl OwnerAllowList {
    pub fn new<I, S>(owners: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            owners: owners.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl AccessAuthorizer for OwnerAllowList {
    async fn authorize_raw_access(&self, task: &TaskRecord) -> Result<(), ScanError> {
        if self.owners.contains(&task.owner) {
            Ok(())
        } else {
            Err(ScanError::AccessDenied(format!(
                "owner '{}' of task '{}' may not use raw store access",
                task.owner, task.name
            )))
        }
    }
}
