//! Process configuration
//!
//! Built once by the bootstrap (CLI / environment) and handed to the
//! collaborators by value or reference.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ClusterError;

/// Default heartbeat interval in seconds
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 10;

/// Default liveness window in seconds
pub const DEFAULT_LIVENESS_WINDOW_SECS: u64 = 30;

/// Local node settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Operator-chosen node name, unique among live nodes.
    pub identifier: String,
    /// Address other nodes and operators use to reach this node.
    pub address: String,
    /// Port of the administrative HTTP surface.
    pub management_port: u16,
    /// Whether this node is allowed to share the cluster with others.
    pub clustered: bool,
    /// A node whose last check-in is older than this is presumed dead.
    pub liveness_window: Duration,
    /// Period of the heartbeat / verify / topology timer.
    pub heartbeat_interval: Duration,
    /// Upper bound for one timer cycle; the timer never waits longer on the registry.
    pub check_timeout: Duration,
    /// How long dead node records are kept before cleanup removes them.
    pub dead_node_retention: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            identifier: "node-1".into(),
            address: "127.0.0.1".into(),
            management_port: 6000,
            clustered: false,
            liveness_window: Duration::from_secs(DEFAULT_LIVENESS_WINDOW_SECS),
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS),
            check_timeout: Duration::from_secs(5),
            dead_node_retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl NodeConfig {
    /// Rejects settings that would make liveness or identity checks meaningless.
    pub fn validate(&self) -> Result<(), ClusterError> {
        if self.identifier.trim().is_empty() {
            return Err(ClusterError::Configuration(
                "node identifier must not be empty".into(),
            ));
        }
        if self.heartbeat_interval.is_zero() || self.check_timeout.is_zero() {
            return Err(ClusterError::Configuration(
                "heartbeat interval and check timeout must be positive".into(),
            ));
        }
        if self.liveness_window <= self.heartbeat_interval {
            return Err(ClusterError::Configuration(format!(
                "liveness window ({:?}) must exceed heartbeat interval ({:?})",
                self.liveness_window, self.heartbeat_interval
            )));
        }
        Ok(())
    }
}

/// Settings for iterative task part runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Concurrency level of the item processing coordinator. `1` processes
    /// items inline on the scanning task.
    pub worker_threads: usize,
    /// Completed items between two progress flushes to the task store.
    pub progress_flush_every: u64,
    /// Item failures kept in the run result; further failures are only counted.
    pub max_recorded_failures: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            worker_threads: 4,
            progress_flush_every: 100,
            max_recorded_failures: 50,
        }
    }
}
