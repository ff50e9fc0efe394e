//! Scan Handler Registry
//!
//! Maps handler names stored on task records to the code that drives a scan:
//! default object type, base filter, search options, access requirements,
//! failure strategy and the per-item processor.

use super::bucket::AttributeResolver;
use super::query::{Filter, ObjectRecord, ObjectType, SearchOptions};
use super::types::*;
use crate::error::{ItemError, ScanError};

use async_trait::async_trait;
use dashmap::DashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Processes one scanned object.
#[async_trait]
pub trait ItemProcessor: Send + Sync {
    async fn process(&self, item: &ObjectRecord, context: &ItemContext) -> Result<(), ItemError>;
}

/// Type alias for a thread-safe, asynchronous item processing function.
pub type ItemProcessorFn = Arc<
    dyn Fn(ObjectRecord, ItemContext) -> Pin<Box<dyn Future<Output = Result<(), ItemError>> + Send>>
        + Send
        + Sync,
>;

/// Item processor backed by a closure.
pub struct FnItemProcessor {
    f: ItemProcessorFn,
}

impl FnItemProcessor {
    pub fn new<F, Fut>(f: F) -> Arc<Self>
    where
        F: Fn(ObjectRecord, ItemContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ItemError>> + Send + 'static,
    {
        // Box::pin erases the concrete future type so any async closure fits.
        let f: ItemProcessorFn = Arc::new(move |item, context| {
            Box::pin(f(item, context))
                as Pin<Box<dyn Future<Output = Result<(), ItemError>> + Send>>
        });
        Arc::new(Self { f })
    }
}

#[async_trait]
impl ItemProcessor for FnItemProcessor {
    async fn process(&self, item: &ObjectRecord, context: &ItemContext) -> Result<(), ItemError> {
        (self.f)(item.clone(), context.clone()).await
    }
}

/// Everything a task family contributes to an iterative scan.
pub trait ScanHandler: Send + Sync {
    fn name(&self) -> &str;

    /// Used when neither the run nor the task names an object type.
    fn default_object_type(&self) -> Option<ObjectType> {
        None
    }

    fn base_filter(&self, task: &TaskRecord) -> Result<Filter, ScanError> {
        Ok(task.filter.clone().unwrap_or(Filter::All))
    }

    fn search_options(&self, task: &TaskRecord) -> SearchOptions {
        task.search_options.clone().unwrap_or_default()
    }

    /// Direct store access is structurally required (no authorization check).
    fn requires_direct_access(&self) -> bool {
        false
    }

    fn failure_strategy(&self) -> FailureStrategy {
        FailureStrategy::Continue
    }

    fn attribute_resolver(&self) -> Option<&dyn AttributeResolver> {
        None
    }

    fn item_processor(&self) -> Arc<dyn ItemProcessor>;
}

/// Configurable handler covering the common cases.
pub struct BasicScanHandler {
    name: String,
    default_type: Option<ObjectType>,
    options: Option<SearchOptions>,
    direct: bool,
    strategy: FailureStrategy,
    resolver: Option<Arc<dyn AttributeResolver>>,
    processor: Arc<dyn ItemProcessor>,
}

impl BasicScanHandler {
    pub fn new(name: &str, processor: Arc<dyn ItemProcessor>) -> Self {
        Self {
            name: name.to_string(),
            default_type: None,
            options: None,
            direct: false,
            strategy: FailureStrategy::Continue,
            resolver: None,
            processor,
        }
    }

    pub fn with_default_type(mut self, object_type: ObjectType) -> Self {
        self.default_type = Some(object_type);
        self
    }

    /// Options used when the task carries none.
    pub fn with_search_options(mut self, options: SearchOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub fn requiring_direct_access(mut self) -> Self {
        self.direct = true;
        self
    }

    pub fn with_failure_strategy(mut self, strategy: FailureStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_attribute_resolver(mut self, resolver: Arc<dyn AttributeResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }
}

impl ScanHandler for BasicScanHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_object_type(&self) -> Option<ObjectType> {
        self.default_type
    }

    fn search_options(&self, task: &TaskRecord) -> SearchOptions {
        task.search_options
            .clone()
            .or_else(|| self.options.clone())
            .unwrap_or_default()
    }

    fn requires_direct_access(&self) -> bool {
        self.direct
    }

    fn failure_strategy(&self) -> FailureStrategy {
        self.strategy
    }

    fn attribute_resolver(&self) -> Option<&dyn AttributeResolver> {
        self.resolver.as_deref()
    }

    fn item_processor(&self) -> Arc<dyn ItemProcessor> {
        self.processor.clone()
    }
}

/// Registry holding the mapping between handler names and their implementation.
pub struct ScanHandlerRegistry {
    handlers: DashMap<String, Arc<dyn ScanHandler>>,
}

impl ScanHandlerRegistry {
    /// Creates a new, empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a handler under its own name, replacing any previous one.
    pub fn register(&self, handler: Arc<dyn ScanHandler>) {
        let name = handler.name().to_string();
        self.handlers.insert(name.clone(), handler);

        tracing::info!("Registered scan handler: {}", name);
    }

    /// Unknown names are a configuration error of the task.
    pub fn get(&self, handler_name: &str) -> Result<Arc<dyn ScanHandler>, ScanError> {
        self.handlers
            .get(handler_name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                ScanError::Configuration(format!("unknown scan handler '{}'", handler_name))
            })
    }

    /// Returns all registered handler names, sorted.
    pub fn list_handlers(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .handlers
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    pub fn has_handler(&self, handler_name: &str) -> bool {
        self.handlers.contains_key(handler_name)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

impl Default for ScanHandlerRegistry {
    fn default() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }
}
