//! Iterative Scan Execution Module
//!
//! Scans potentially huge object collections, whole or one bucket at a time,
//! feeding every match through a shared item processor.
//!
//! ## Core Mechanisms
//! - **Buckets**: a `WorkBucket` is narrowed into a filter restriction; buckets
//!   of one task may run concurrently here or on other nodes.
//! - **Bounded concurrency**: the item coordinator processes at most
//!   `worker_threads` items at a time and applies backpressure to the scan.
//! - **Failure strategy**: item errors are recorded and the scan continues,
//!   unless the handler asks to stop on the first failure.
//! - **Live progress**: counters are flushed to the task store as deltas while
//!   the run is in progress.
//! - **Cancellation**: checked between items, driven by the local scheduler
//!   and the run's own suspend token.

pub mod bucket;
pub mod coordinator;
pub mod part;
pub mod query;
pub mod registry;
pub mod source;
pub mod store;
pub mod types;
