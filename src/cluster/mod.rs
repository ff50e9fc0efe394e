//! Cluster Node Lifecycle Module
//!
//! Owns this process's registration in the shared node registry and keeps it
//! honest for the lifetime of the process.
//!
//! ## Core Mechanisms
//! - **Registration**: stale records with the same identifier are removed, then a
//!   fresh record stamped with a random internal token is inserted.
//! - **Heartbeat**: a narrow field update of `address` and `lastCheckIn` on a fixed timer.
//! - **Integrity**: the stored internal token must match the one held in memory;
//!   anything else means another process claimed our identity.
//! - **Topology**: a live non-clustered node must be alone.
//! - **Sticky errors**: every fatal finding degrades the node for good and stops
//!   the local scheduler.

pub mod handlers;
pub mod protocol;
pub mod registry;
pub mod service;
pub mod types;

#[cfg(test)]
mod tests;
