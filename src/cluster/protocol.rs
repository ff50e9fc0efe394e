//! Administrative API Definitions
//!
//! Endpoints and DTOs of the node administration surface. Responses report
//! node health through `NodeErrorStatus`; internal tokens never leave the process.

use super::types::{NodeErrorStatus, NodeOid, NodeRecord, NodeState, OperationalState};
use crate::scheduler::SchedulerState;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const ENDPOINT_NODES: &str = "/nodes";
pub const ENDPOINT_NODE: &str = "/nodes/:identifier";
pub const ENDPOINT_NODE_STATUS: &str = "/node/status";
pub const ENDPOINT_FORCE_HEARTBEAT: &str = "/nodes/heartbeat";
pub const ENDPOINT_CLEANUP: &str = "/nodes/cleanup";

/// Public view of a node record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeSummary {
    pub identifier: String,
    pub address: String,
    pub management_port: u16,
    pub clustered: bool,
    pub running: bool,
    pub live: bool,
    pub operational_state: OperationalState,
    pub last_check_in: DateTime<Utc>,
    pub error_status: Option<NodeErrorStatus>,
}

impl NodeSummary {
    pub fn from_record(record: &NodeRecord, now: DateTime<Utc>, window: Duration) -> Self {
        Self {
            identifier: record.identifier.clone(),
            address: record.address.clone(),
            management_port: record.management_port,
            clustered: record.clustered,
            running: record.running,
            live: record.is_live(now, window),
            operational_state: record.operational_state,
            last_check_in: record.last_check_in,
            error_status: record.error_status,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocalNodeStatus {
    pub identifier: String,
    pub oid: NodeOid,
    pub state: NodeState,
    pub error_status: NodeErrorStatus,
    pub scheduler: SchedulerState,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ListNodesQuery {
    #[serde(default)]
    pub live: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListNodesResponse {
    pub nodes: Vec<NodeSummary>,
    pub error_status: NodeErrorStatus,
}

/// Outcome of an administrative command.
#[derive(Debug, Serialize, Deserialize)]
pub struct AdminResponse {
    pub success: bool,
    pub error_status: NodeErrorStatus,
    pub message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CleanupResponse {
    pub removed: Vec<String>,
    pub error_status: NodeErrorStatus,
}
