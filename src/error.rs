//! Error types for the coordination core
//!
//! Node-level faults are converted into a sticky `NodeErrorStatus` by the
//! lifecycle manager; scan faults end up in the run result. The enums below
//! are what flows between the components before that conversion happens.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cluster::types::{NodeErrorStatus, NodeOid};

/// Coarse classification shared by every error in the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Malformed task or node setup. Fatal, never retried.
    ConfigurationError,
    /// A concurrent writer raced one of this node's registry operations.
    RegistryConflict,
    /// Duplicate node identity or inconsistent cluster topology.
    IntegrityViolation,
    /// Failure scoped to a single scanned item.
    ItemProcessingError,
    /// The registry (or another collaborator) was temporarily unreachable.
    TransientCommunicationError,
}

// ========== Node Registry Store ==========

/// Errors reported by a `NodeRegistry` implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("node record {oid} not found")]
    NotFound { oid: NodeOid },

    /// Insert collided with an existing record id or node identifier.
    #[error("node record already exists: {detail}")]
    AlreadyExists { detail: String },

    #[error("node registry unavailable: {message}")]
    Unavailable { message: String },
}

impl RegistryError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            RegistryError::NotFound { .. } | RegistryError::AlreadyExists { .. } => {
                ErrorCategory::RegistryConflict
            }
            RegistryError::Unavailable { .. } => ErrorCategory::TransientCommunicationError,
        }
    }
}

// ========== Node Lifecycle ==========

/// Errors surfaced by the node lifecycle manager.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClusterError {
    #[error("invalid node configuration: {0}")]
    Configuration(String),

    #[error("registry conflict: {message}")]
    RegistryConflict { message: String },

    #[error("integrity violation ({status}): {message}")]
    IntegrityViolation {
        status: NodeErrorStatus,
        message: String,
    },

    #[error("registry communication failed: {message}")]
    TransientCommunication { message: String },

    #[error("node '{identifier}' not found")]
    NodeNotFound { identifier: String },

    #[error("node '{identifier}' is still live and cannot be deleted")]
    NodeIsLive { identifier: String },

    /// The local node already carries a sticky error status.
    #[error("local node is degraded ({0})")]
    Degraded(NodeErrorStatus),
}

impl ClusterError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ClusterError::Configuration(_) => ErrorCategory::ConfigurationError,
            ClusterError::RegistryConflict { .. }
            | ClusterError::NodeNotFound { .. }
            | ClusterError::NodeIsLive { .. } => ErrorCategory::RegistryConflict,
            ClusterError::IntegrityViolation { .. } | ClusterError::Degraded(_) => {
                ErrorCategory::IntegrityViolation
            }
            ClusterError::TransientCommunication { .. } => {
                ErrorCategory::TransientCommunicationError
            }
        }
    }
}

impl From<RegistryError> for ClusterError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Unavailable { message } => {
                ClusterError::TransientCommunication { message }
            }
            other => ClusterError::RegistryConflict {
                message: other.to_string(),
            },
        }
    }
}

// ========== Iterative Scans ==========

/// Errors that abort a task part run (setup or source failures).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScanError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("raw store access denied: {0}")]
    AccessDenied(String),

    #[error("object source failed: {0}")]
    Source(String),

    #[error("task store failed: {0}")]
    Store(String),
}

impl ScanError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ScanError::Configuration(_) | ScanError::AccessDenied(_) => {
                ErrorCategory::ConfigurationError
            }
            ScanError::Source(_) | ScanError::Store(_) => {
                ErrorCategory::TransientCommunicationError
            }
        }
    }
}

/// Failure of a single scanned item. Recorded against the item, never thrown
/// out of the run under the default failure strategy.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message}")]
pub struct ItemError {
    pub message: String,
}

impl ItemError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::ItemProcessingError
    }
}
