use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Storage id of a node record. Distinct from the operator-chosen identifier:
/// every registration creates a record with a fresh id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct NodeOid(pub String);

impl NodeOid {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for NodeOid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeOid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Length of the per-process internal token.
const INTERNAL_TOKEN_LEN: usize = 32;

/// Generates the random token a process stamps on its own record at startup.
pub fn generate_internal_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(INTERNAL_TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// Sticky fault flag of a node process.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeErrorStatus {
    Ok,
    NodeRegistrationFailed,
    DuplicateNodeIdOrName,
    NonClusteredNodeWithOthers,
    LocalConfigurationError,
}

impl NodeErrorStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, NodeErrorStatus::Ok)
    }

    /// Whether the node's own registry record can still be trusted to be ours.
    pub fn identity_intact(&self) -> bool {
        !matches!(self, NodeErrorStatus::DuplicateNodeIdOrName)
    }
}

impl fmt::Display for NodeErrorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeErrorStatus::Ok => "OK",
            NodeErrorStatus::NodeRegistrationFailed => "NODE_REGISTRATION_FAILED",
            NodeErrorStatus::DuplicateNodeIdOrName => "DUPLICATE_NODE_ID_OR_NAME",
            NodeErrorStatus::NonClusteredNodeWithOthers => "NON_CLUSTERED_NODE_WITH_OTHERS",
            NodeErrorStatus::LocalConfigurationError => "LOCAL_CONFIGURATION_ERROR",
        };
        f.write_str(name)
    }
}

/// Operational state persisted on the node record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OperationalState {
    Starting,
    Up,
    Down,
}

/// Persisted registry entry for one cluster participant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeRecord {
    pub oid: NodeOid,
    pub identifier: String,
    pub internal_token: String,
    pub address: String,
    pub management_port: u16,
    pub clustered: bool,
    pub running: bool,
    pub operational_state: OperationalState,
    pub last_check_in: DateTime<Utc>,
    pub error_status: Option<NodeErrorStatus>,
}

impl NodeRecord {
    /// Running and checked in within the liveness window.
    pub fn is_live(&self, now: DateTime<Utc>, liveness_window: Duration) -> bool {
        if !self.running {
            return false;
        }
        match (now - self.last_check_in).to_std() {
            Ok(elapsed) => elapsed <= liveness_window,
            // Check-in stamped in the future (clock skew): treat as fresh.
            Err(_) => true,
        }
    }
}

/// One narrow field assignment on a node record.
///
/// `identifier`, `internal_token` and `clustered` are deliberately absent:
/// no update path can touch them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeFieldUpdate {
    Address(String),
    ManagementPort(u16),
    LastCheckIn(DateTime<Utc>),
    Running(bool),
    OperationalState(OperationalState),
    ErrorStatus(Option<NodeErrorStatus>),
}

impl NodeFieldUpdate {
    pub fn apply(&self, record: &mut NodeRecord) {
        match self {
            NodeFieldUpdate::Address(address) => record.address = address.clone(),
            NodeFieldUpdate::ManagementPort(port) => record.management_port = *port,
            NodeFieldUpdate::LastCheckIn(at) => record.last_check_in = *at,
            NodeFieldUpdate::Running(running) => record.running = *running,
            NodeFieldUpdate::OperationalState(state) => record.operational_state = *state,
            NodeFieldUpdate::ErrorStatus(status) => record.error_status = *status,
        }
    }
}

/// Lifecycle of the local node process.
///
/// `Registering -> Running -> Degraded(reason) -> Stopped`. Degradation is
/// one-way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    Registering,
    Running,
    Degraded(NodeErrorStatus),
    Stopped,
}

/// Result of evaluating the live node set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyVerdict {
    Consistent {
        live_nodes: usize,
    },
    NonClusteredWithOthers {
        non_clustered: Vec<String>,
        live_nodes: usize,
    },
}

/// Pure topology rule: a live non-clustered node must be the only live node.
pub fn evaluate_topology(
    nodes: &[NodeRecord],
    now: DateTime<Utc>,
    liveness_window: Duration,
) -> TopologyVerdict {
    let (clustered, non_clustered): (Vec<&NodeRecord>, Vec<&NodeRecord>) = nodes
        .iter()
        .filter(|node| node.is_live(now, liveness_window))
        .partition(|node| node.clustered);

    let live_nodes = clustered.len() + non_clustered.len();

    if !non_clustered.is_empty() && live_nodes > 1 {
        TopologyVerdict::NonClusteredWithOthers {
            non_clustered: non_clustered
                .iter()
                .map(|node| node.identifier.clone())
                .collect(),
            live_nodes,
        }
    } else {
        TopologyVerdict::Consistent { live_nodes }
    }
}
