use super::protocol::{LocalNodeStatus, NodeSummary};
use super::registry::NodeRegistry;
use super::types::{
    NodeErrorStatus, NodeFieldUpdate, NodeOid, NodeRecord, NodeState, OperationalState,
    TopologyVerdict, evaluate_topology, generate_internal_token,
};
use crate::config::NodeConfig;
use crate::error::{ClusterError, RegistryError};
use crate::scheduler::LocalScheduler;

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Identity and lifecycle of this process. Guarded by a single mutex so the
/// timer and the administrative surface never interleave a check with an update.
struct LocalNode {
    oid: NodeOid,
    internal_token: String,
    state: NodeState,
    error_status: NodeErrorStatus,
    registered: bool,
}

/// One step of the periodic check cycle.
#[derive(Debug, Clone, Copy)]
enum CheckStep {
    VerifyIntegrity,
    Heartbeat,
    Topology,
}

/// A fatal finding: the sticky status to enter plus the error to report.
struct Fault {
    status: NodeErrorStatus,
    error: ClusterError,
}

impl Fault {
    fn duplicate(message: String) -> Self {
        Self {
            status: NodeErrorStatus::DuplicateNodeIdOrName,
            error: ClusterError::IntegrityViolation {
                status: NodeErrorStatus::DuplicateNodeIdOrName,
                message,
            },
        }
    }

    fn registration(error: ClusterError) -> Self {
        Self {
            status: NodeErrorStatus::NodeRegistrationFailed,
            error,
        }
    }
}

pub struct NodeLifecycleManager {
    config: NodeConfig,
    registry: Arc<dyn NodeRegistry>,
    scheduler: Arc<LocalScheduler>,
    local: Mutex<LocalNode>,
}

impl NodeLifecycleManager {
    pub fn new(
        config: NodeConfig,
        registry: Arc<dyn NodeRegistry>,
        scheduler: Arc<LocalScheduler>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry,
            scheduler,
            local: Mutex::new(LocalNode {
                oid: NodeOid::new(),
                internal_token: generate_internal_token(),
                state: NodeState::Registering,
                error_status: NodeErrorStatus::Ok,
                registered: false,
            }),
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Arc<LocalScheduler> {
        &self.scheduler
    }

    /// Registers this process under its configured identifier.
    ///
    /// Stale records sharing the identifier are removed first; a record that
    /// disappears under us during that cleanup is tolerated. A failed insert is
    /// fatal: the node degrades with `NODE_REGISTRATION_FAILED` and the local
    /// scheduler never starts.
    pub async fn register_at_startup(&self) -> Result<NodeRecord, ClusterError> {
        let mut local = self.local.lock().await;

        match local.state {
            NodeState::Registering => {}
            NodeState::Degraded(status) => return Err(ClusterError::Degraded(status)),
            NodeState::Running | NodeState::Stopped => {
                return Err(ClusterError::Configuration(
                    "node registration already completed".into(),
                ));
            }
        }

        if let Err(e) = self.config.validate() {
            self.degrade(&mut local, NodeErrorStatus::LocalConfigurationError)
                .await;
            return Err(e);
        }

        if let Err(fault) = self.remove_stale_records().await {
            self.degrade(&mut local, fault.status).await;
            return Err(fault.error);
        }

        let record = NodeRecord {
            oid: local.oid.clone(),
            identifier: self.config.identifier.clone(),
            internal_token: local.internal_token.clone(),
            address: self.config.address.clone(),
            management_port: self.config.management_port,
            clustered: self.config.clustered,
            running: true,
            operational_state: OperationalState::Up,
            last_check_in: Utc::now(),
            error_status: None,
        };

        if let Err(e) = self.registry.insert(record.clone()).await {
            error!(
                "Registration of node '{}' failed: {}",
                self.config.identifier, e
            );
            self.degrade(&mut local, NodeErrorStatus::NodeRegistrationFailed)
                .await;
            return Err(e.into());
        }

        local.registered = true;
        local.state = NodeState::Running;
        self.scheduler.start();

        info!(
            "Node '{}' registered as {} (clustered={})",
            record.identifier, record.oid, record.clustered
        );

        Ok(record)
    }

    async fn remove_stale_records(&self) -> Result<(), Fault> {
        let stale = self
            .registry
            .search_by_name(&self.config.identifier)
            .await
            .map_err(|e| Fault::registration(e.into()))?;

        for record in stale {
            match self.registry.delete(&record.oid).await {
                Ok(()) => info!(
                    "Removed stale record {} for node '{}'",
                    record.oid, record.identifier
                ),
                Err(RegistryError::NotFound { .. }) => warn!(
                    "Stale record {} for node '{}' vanished during cleanup",
                    record.oid, record.identifier
                ),
                Err(e) => return Err(Fault::registration(e.into())),
            }
        }

        Ok(())
    }

    /// Refreshes `address` and `lastCheckIn` of this node's record. The
    /// stored token is checked first; a foreign row is never written.
    pub async fn heartbeat(&self) -> Result<(), ClusterError> {
        self.run_steps(&[CheckStep::VerifyIntegrity, CheckStep::Heartbeat])
            .await
    }

    /// Compares the stored internal token with the one held in memory.
    pub async fn verify_integrity(&self) -> Result<(), ClusterError> {
        self.run_steps(&[CheckStep::VerifyIntegrity]).await
    }

    /// Fails if a live non-clustered node coexists with any other live node.
    pub async fn check_topology(&self) -> Result<(), ClusterError> {
        self.run_steps(&[CheckStep::Topology]).await
    }

    /// One timer cycle: verify, then heartbeat, then topology, atomically with
    /// respect to every other lifecycle operation. Verification runs first so
    /// that a stolen identity is detected before the next registry write.
    pub async fn run_check_cycle(&self) -> Result<(), ClusterError> {
        self.run_steps(&[
            CheckStep::VerifyIntegrity,
            CheckStep::Heartbeat,
            CheckStep::Topology,
        ])
        .await
    }

    async fn run_steps(&self, steps: &[CheckStep]) -> Result<(), ClusterError> {
        let mut local = self.local.lock().await;

        match local.state {
            NodeState::Running => {}
            NodeState::Degraded(status) => return Err(ClusterError::Degraded(status)),
            NodeState::Registering => {
                return Err(ClusterError::Configuration(
                    "node is not registered yet".into(),
                ));
            }
            NodeState::Stopped => return Ok(()),
        }

        let outcome = match tokio::time::timeout(
            self.config.check_timeout,
            self.execute_steps(&local, steps),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(Fault::registration(ClusterError::TransientCommunication {
                message: format!(
                    "node check did not complete within {:?}",
                    self.config.check_timeout
                ),
            })),
        };

        match outcome {
            Ok(()) => Ok(()),
            Err(fault) => {
                self.degrade(&mut local, fault.status).await;
                Err(fault.error)
            }
        }
    }

    async fn execute_steps(&self, local: &LocalNode, steps: &[CheckStep]) -> Result<(), Fault> {
        for step in steps {
            match step {
                CheckStep::VerifyIntegrity => self.verify_step(local).await?,
                CheckStep::Heartbeat => self.heartbeat_step(local).await?,
                CheckStep::Topology => self.topology_step().await?,
            }
        }
        Ok(())
    }

    async fn verify_step(&self, local: &LocalNode) -> Result<(), Fault> {
        match self.registry.get_by_id(&local.oid).await {
            Ok(stored) if stored.internal_token == local.internal_token => {
                debug!("Node record {} verified", local.oid);
                Ok(())
            }
            Ok(stored) => Err(Fault::duplicate(format!(
                "record {} carries a foreign internal token; another process registered as '{}'",
                local.oid, stored.identifier
            ))),
            Err(RegistryError::NotFound { .. }) => Err(self.classify_missing(local).await),
            Err(e) => Err(Fault::registration(e.into())),
        }
    }

    async fn heartbeat_step(&self, local: &LocalNode) -> Result<(), Fault> {
        let updates = [
            NodeFieldUpdate::Address(self.config.address.clone()),
            NodeFieldUpdate::LastCheckIn(Utc::now()),
        ];

        match self.registry.update_fields(&local.oid, &updates).await {
            Ok(()) => {
                debug!("Heartbeat recorded for {}", local.oid);
                Ok(())
            }
            Err(RegistryError::NotFound { .. }) => Err(self.classify_missing(local).await),
            Err(e) => Err(Fault::registration(e.into())),
        }
    }

    async fn topology_step(&self) -> Result<(), Fault> {
        let nodes = self
            .registry
            .list()
            .await
            .map_err(|e| Fault::registration(e.into()))?;

        match evaluate_topology(&nodes, Utc::now(), self.config.liveness_window) {
            TopologyVerdict::Consistent { live_nodes } => {
                debug!("Topology consistent ({} live nodes)", live_nodes);
                Ok(())
            }
            TopologyVerdict::NonClusteredWithOthers {
                non_clustered,
                live_nodes,
            } => Err(Fault {
                status: NodeErrorStatus::NonClusteredNodeWithOthers,
                error: ClusterError::IntegrityViolation {
                    status: NodeErrorStatus::NonClusteredNodeWithOthers,
                    message: format!(
                        "non-clustered node(s) {:?} live together with {} other node(s)",
                        non_clustered,
                        live_nodes - 1
                    ),
                },
            }),
        }
    }

    /// Our record is gone. If another record now holds our identifier the
    /// identity was taken over; otherwise the registration was lost.
    async fn classify_missing(&self, local: &LocalNode) -> Fault {
        match self.registry.search_by_name(&self.config.identifier).await {
            Ok(holders) if holders.iter().any(|r| r.oid != local.oid) => {
                Fault::duplicate(format!(
                    "record {} vanished and node '{}' is now registered by another process",
                    local.oid, self.config.identifier
                ))
            }
            Ok(_) => Fault::registration(ClusterError::RegistryConflict {
                message: format!("record {} vanished from the registry", local.oid),
            }),
            Err(e) => Fault::registration(e.into()),
        }
    }

    /// One-way transition into the sticky error state.
    async fn degrade(&self, local: &mut LocalNode, status: NodeErrorStatus) {
        if matches!(local.state, NodeState::Degraded(_)) {
            return;
        }

        error!(
            "Node '{}' entering error state {}, stopping local scheduling",
            self.config.identifier, status
        );

        local.state = NodeState::Degraded(status);
        local.error_status = status;
        self.scheduler.shutdown();

        if local.registered && status.identity_intact() {
            self.publish_error_status(local, status).await;
        }
    }

    async fn publish_error_status(&self, local: &LocalNode, status: NodeErrorStatus) {
        let update = [NodeFieldUpdate::ErrorStatus(Some(status))];
        match tokio::time::timeout(
            self.config.check_timeout,
            self.registry.update_fields(&local.oid, &update),
        )
        .await
        {
            Ok(Ok(())) => debug!("Published error status {} on {}", status, local.oid),
            Ok(Err(e)) => warn!("Could not publish error status {}: {}", status, e),
            Err(_) => warn!("Publishing error status {} timed out", status),
        }
    }

    /// Marks the record as no longer running. Best effort: the process is
    /// exiting anyway, so failures are only logged.
    pub async fn record_shutdown(&self) {
        let mut local = self.local.lock().await;

        if matches!(local.state, NodeState::Stopped) {
            return;
        }

        self.scheduler.shutdown();

        if local.registered && local.error_status.identity_intact() {
            let verified =
                tokio::time::timeout(self.config.check_timeout, self.verify_step(&local)).await;
            match verified {
                Ok(Ok(())) => self.write_shutdown(&local).await,
                Ok(Err(fault)) => {
                    warn!("Not recording shutdown of {}: {}", local.oid, fault.error);
                    if !fault.status.identity_intact() {
                        local.error_status = fault.status;
                    }
                }
                Err(_) => warn!("Verifying {} before shutdown timed out", local.oid),
            }
        }

        local.state = NodeState::Stopped;
    }

    async fn write_shutdown(&self, local: &LocalNode) {
        let updates = [
            NodeFieldUpdate::Running(false),
            NodeFieldUpdate::LastCheckIn(Utc::now()),
            NodeFieldUpdate::OperationalState(OperationalState::Down),
        ];
        match self.registry.update_fields(&local.oid, &updates).await {
            Ok(()) => info!("Node '{}' recorded shutdown", self.config.identifier),
            Err(RegistryError::NotFound { .. }) => warn!(
                "Node record {} not found while recording shutdown",
                local.oid
            ),
            Err(e) => warn!("Failed to record shutdown of {}: {}", local.oid, e),
        }
    }

    /// Removes every record of a node that is not live.
    pub async fn delete_node(&self, identifier: &str) -> Result<usize, ClusterError> {
        let records = self.registry.search_by_name(identifier).await?;
        if records.is_empty() {
            return Err(ClusterError::NodeNotFound {
                identifier: identifier.to_string(),
            });
        }

        let now = Utc::now();
        if records
            .iter()
            .any(|r| r.is_live(now, self.config.liveness_window))
        {
            warn!("Refusing to delete live node '{}'", identifier);
            return Err(ClusterError::NodeIsLive {
                identifier: identifier.to_string(),
            });
        }

        let mut deleted = 0;
        for record in records {
            match self.registry.delete(&record.oid).await {
                Ok(()) => deleted += 1,
                Err(RegistryError::NotFound { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }

        info!("Deleted {} record(s) of node '{}'", deleted, identifier);
        Ok(deleted)
    }

    /// Deletes records of dead nodes whose last check-in is older than `retention`.
    pub async fn cleanup_dead_nodes(
        &self,
        retention: std::time::Duration,
    ) -> Result<Vec<String>, ClusterError> {
        let own_oid = self.local.lock().await.oid.clone();
        let now = Utc::now();
        let mut removed = Vec::new();

        for record in self.registry.list().await? {
            if record.oid == own_oid || record.is_live(now, self.config.liveness_window) {
                continue;
            }
            let expired = (now - record.last_check_in)
                .to_std()
                .map(|age| age > retention)
                .unwrap_or(false);
            if !expired {
                continue;
            }
            match self.registry.delete(&record.oid).await {
                Ok(()) | Err(RegistryError::NotFound { .. }) => {
                    info!("Cleaned up dead node '{}' ({})", record.identifier, record.oid);
                    removed.push(record.identifier);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(removed)
    }

    pub async fn list_nodes(&self, live_only: bool) -> Result<Vec<NodeSummary>, ClusterError> {
        let now = Utc::now();
        let window = self.config.liveness_window;
        Ok(self
            .registry
            .list()
            .await?
            .into_iter()
            .map(|record| NodeSummary::from_record(&record, now, window))
            .filter(|summary| !live_only || summary.live)
            .collect())
    }

    pub async fn status(&self) -> LocalNodeStatus {
        let local = self.local.lock().await;
        LocalNodeStatus {
            identifier: self.config.identifier.clone(),
            oid: local.oid.clone(),
            state: local.state,
            error_status: local.error_status,
            scheduler: self.scheduler.state(),
        }
    }

    pub async fn error_status(&self) -> NodeErrorStatus {
        self.local.lock().await.error_status
    }

    pub async fn state(&self) -> NodeState {
        self.local.lock().await.state
    }

    /// Spawns the periodic heartbeat / verify / topology timer.
    ///
    /// Failures never escape the loop: they are turned into the sticky error
    /// status and the timer keeps ticking so the condition stays reportable.
    pub fn start(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.heartbeat_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick fires immediately; registration just stamped the record.
            interval.tick().await;

            info!(
                "Node check timer started (every {:?})",
                self.config.heartbeat_interval
            );

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                }

                match self.run_check_cycle().await {
                    Ok(()) => {}
                    Err(ClusterError::Degraded(status)) => {
                        debug!("Skipping node check, node is degraded ({})", status);
                    }
                    Err(e) => error!("Node check failed: {}", e),
                }

                if matches!(self.state().await, NodeState::Stopped) {
                    break;
                }
            }

            info!("Node check timer stopped");
        })
    }
}
