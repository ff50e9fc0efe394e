//! Cluster Coordination Library
//!
//! Core of a clustered identity-governance deployment: node membership and
//! liveness, plus partitioned iterative scans of large object collections.
//!
//! ## Architecture Modules
//!
//! - **`cluster`**: Node lifecycle. Registers this process in the shared node
//!   registry, heartbeats, detects duplicate identities and forbidden topologies,
//!   and exposes the administrative HTTP surface.
//! - **`executor`**: Iterative task part execution. Resolves and narrows the scan
//!   query, streams matches through a bounded item coordinator and keeps durable
//!   progress.
//! - **`scheduler`**: The local gate both modules share. Node faults close it;
//!   closing it halts running scans.
//! - **`config`** / **`error`**: Process settings and the error taxonomy.

pub mod cluster;
pub mod config;
pub mod error;
pub mod executor;
pub mod scheduler;
