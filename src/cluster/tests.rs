//! Cluster Module Tests
//!
//! Validates node registration, identity verification and topology rules.
//!
//! ## Test Scopes
//! - **Data Structures**: liveness evaluation, narrow field updates, topology verdicts.
//! - **Lifecycle**: registration, heartbeat, integrity and shutdown against the in-memory registry.
//! - **Fault Injection**: concurrent registrations, stolen identities, an unreachable registry.
//! - **Admin Surface**: delete / cleanup / status handlers.

#[cfg(test)]
mod tests {
    use crate::cluster::handlers::{handle_delete_node, handle_node_status};
    use crate::cluster::registry::{InMemoryNodeRegistry, NodeRegistry};
    use crate::cluster::service::NodeLifecycleManager;
    use crate::cluster::types::{
        NodeErrorStatus, NodeFieldUpdate, NodeOid, NodeRecord, NodeState, OperationalState,
        TopologyVerdict, evaluate_topology,
    };
    use crate::config::NodeConfig;
    use crate::error::{ClusterError, RegistryError};
    use crate::scheduler::{LocalScheduler, SchedulerState};

    use async_trait::async_trait;
    use axum::extract::{Extension, Path};
    use axum::http::StatusCode;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn node_config(identifier: &str, clustered: bool) -> NodeConfig {
        NodeConfig {
            identifier: identifier.to_string(),
            clustered,
            ..Default::default()
        }
    }

    fn manager_for(
        identifier: &str,
        clustered: bool,
        registry: Arc<dyn NodeRegistry>,
    ) -> Arc<NodeLifecycleManager> {
        NodeLifecycleManager::new(
            node_config(identifier, clustered),
            registry,
            Arc::new(LocalScheduler::new()),
        )
    }

    fn record(identifier: &str, clustered: bool, age_secs: i64, running: bool) -> NodeRecord {
        NodeRecord {
            oid: NodeOid::new(),
            identifier: identifier.to_string(),
            internal_token: "token".to_string(),
            address: "10.0.0.1".to_string(),
            management_port: 6000,
            clustered,
            running,
            operational_state: OperationalState::Up,
            last_check_in: Utc::now() - ChronoDuration::seconds(age_secs),
            error_status: None,
        }
    }

    /// Delegating registry that counts writes.
    struct CountingRegistry {
        inner: Arc<InMemoryNodeRegistry>,
        writes: AtomicUsize,
    }

    impl CountingRegistry {
        fn new(inner: Arc<InMemoryNodeRegistry>) -> Arc<Self> {
            Arc::new(Self {
                inner,
                writes: AtomicUsize::new(0),
            })
        }

        fn writes(&self) -> usize {
            self.writes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl NodeRegistry for CountingRegistry {
        async fn get_by_id(&self, oid: &NodeOid) -> Result<NodeRecord, RegistryError> {
            self.inner.get_by_id(oid).await
        }

        async fn search_by_name(&self, identifier: &str) -> Result<Vec<NodeRecord>, RegistryError> {
            self.inner.search_by_name(identifier).await
        }

        async fn list(&self) -> Result<Vec<NodeRecord>, RegistryError> {
            self.inner.list().await
        }

        async fn insert(&self, record: NodeRecord) -> Result<(), RegistryError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.insert(record).await
        }

        async fn update_fields(
            &self,
            oid: &NodeOid,
            updates: &[NodeFieldUpdate],
        ) -> Result<(), RegistryError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.update_fields(oid, updates).await
        }

        async fn delete(&self, oid: &NodeOid) -> Result<(), RegistryError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.delete(oid).await
        }
    }

    /// Registry where a competing process inserts the same identifier right
    /// before our insert lands.
    struct RacingRegistry {
        inner: Arc<InMemoryNodeRegistry>,
    }

    #[async_trait]
    impl NodeRegistry for RacingRegistry {
        async fn get_by_id(&self, oid: &NodeOid) -> Result<NodeRecord, RegistryError> {
            self.inner.get_by_id(oid).await
        }

        async fn search_by_name(&self, identifier: &str) -> Result<Vec<NodeRecord>, RegistryError> {
            self.inner.search_by_name(identifier).await
        }

        async fn list(&self) -> Result<Vec<NodeRecord>, RegistryError> {
            self.inner.list().await
        }

        async fn insert(&self, record: NodeRecord) -> Result<(), RegistryError> {
            let competitor = NodeRecord {
                oid: NodeOid::new(),
                internal_token: "competitor".to_string(),
                ..record.clone()
            };
            self.inner.insert(competitor).await?;
            self.inner.insert(record).await
        }

        async fn update_fields(
            &self,
            oid: &NodeOid,
            updates: &[NodeFieldUpdate],
        ) -> Result<(), RegistryError> {
            self.inner.update_fields(oid, updates).await
        }

        async fn delete(&self, oid: &NodeOid) -> Result<(), RegistryError> {
            self.inner.delete(oid).await
        }
    }

    // ============================================================
    // DATA STRUCTURE TESTS
    // ============================================================

    #[test]
    fn test_liveness_window() {
        let window = Duration::from_secs(30);
        let now = Utc::now();

        assert!(record("a", true, 5, true).is_live(now, window));
        assert!(!record("a", true, 60, true).is_live(now, window));
        assert!(
            !record("a", true, 5, false).is_live(now, window),
            "a node that is not running is never live"
        );
    }

    #[test]
    fn test_field_updates_never_touch_identity() {
        let mut node = record("n1", true, 10, true);
        let before = node.clone();

        for update in [
            NodeFieldUpdate::Address("10.9.9.9".into()),
            NodeFieldUpdate::LastCheckIn(Utc::now()),
            NodeFieldUpdate::Running(false),
            NodeFieldUpdate::ErrorStatus(Some(NodeErrorStatus::NonClusteredNodeWithOthers)),
        ] {
            update.apply(&mut node);
        }

        assert_eq!(node.identifier, before.identifier);
        assert_eq!(node.internal_token, before.internal_token);
        assert_eq!(node.clustered, before.clustered);
        assert_eq!(node.address, "10.9.9.9");
        assert!(!node.running);
    }

    #[test]
    fn test_topology_flags_iff_two_live_and_one_non_clustered() {
        let window = Duration::from_secs(30);
        let now = Utc::now();

        let cases = vec![
            (vec![record("a", false, 1, true)], false),
            (vec![record("a", true, 1, true), record("b", true, 1, true)], false),
            (vec![record("a", false, 1, true), record("b", true, 1, true)], true),
            (vec![record("a", false, 1, true), record("b", false, 1, true)], true),
            // Second node is dead: only one live node.
            (vec![record("a", false, 1, true), record("b", true, 120, true)], false),
            // Second node stopped.
            (vec![record("a", false, 1, true), record("b", true, 1, false)], false),
            (vec![], false),
        ];

        for (nodes, expect_violation) in cases {
            let verdict = evaluate_topology(&nodes, now, window);
            let violated = matches!(verdict, TopologyVerdict::NonClusteredWithOthers { .. });
            assert_eq!(violated, expect_violation, "nodes: {:?}", nodes);
        }
    }

    #[test]
    fn test_error_status_serializes_screaming_case() {
        let json = serde_json::to_string(&NodeErrorStatus::DuplicateNodeIdOrName).unwrap();
        assert_eq!(json, "\"DUPLICATE_NODE_ID_OR_NAME\"");
    }

    // ============================================================
    // REGISTRY TESTS
    // ============================================================

    #[tokio::test]
    async fn test_registry_rejects_duplicate_identifier() {
        let registry = InMemoryNodeRegistry::new();
        registry.insert(record("n1", true, 0, true)).await.unwrap();

        let result = registry.insert(record("n1", true, 0, true)).await;

        assert!(matches!(result, Err(RegistryError::AlreadyExists { .. })));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_registry_update_and_delete_missing_record() {
        let registry = InMemoryNodeRegistry::new();
        let oid = NodeOid::new();

        let update = registry
            .update_fields(&oid, &[NodeFieldUpdate::Running(false)])
            .await;
        let delete = registry.delete(&oid).await;

        assert!(matches!(update, Err(RegistryError::NotFound { .. })));
        assert!(matches!(delete, Err(RegistryError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_registry_name_freed_after_delete() {
        let registry = InMemoryNodeRegistry::new();
        let first = record("n1", true, 0, true);
        registry.insert(first.clone()).await.unwrap();

        registry.delete(&first.oid).await.unwrap();

        assert!(registry.insert(record("n1", true, 0, true)).await.is_ok());
    }

    #[tokio::test]
    async fn test_registry_overwrite_with_new_identifier_frees_old_name() {
        let registry = InMemoryNodeRegistry::new();
        let first = record("n1", true, 0, true);
        registry.insert(first.clone()).await.unwrap();

        registry.overwrite(NodeRecord {
            identifier: "renamed".into(),
            ..first.clone()
        });
        let reinsert = registry.insert(record("n1", true, 0, true)).await;

        assert!(reinsert.is_ok());
        assert_eq!(registry.search_by_name("renamed").await.unwrap().len(), 1);
        let holders = registry.search_by_name("n1").await.unwrap();
        assert_eq!(holders.len(), 1);
        assert_ne!(holders[0].oid, first.oid);
    }

    // ============================================================
    // REGISTRATION TESTS
    // ============================================================

    #[tokio::test]
    async fn test_scenario_a_single_non_clustered_node() {
        // ARRANGE
        let registry = InMemoryNodeRegistry::new();
        let n1 = manager_for("n1", false, registry.clone());

        // ACT
        let registered = n1.register_at_startup().await;
        let topology = n1.check_topology().await;

        // ASSERT
        assert!(registered.is_ok());
        assert!(topology.is_ok());
        assert_eq!(n1.state().await, NodeState::Running);
        assert_eq!(n1.scheduler().state(), SchedulerState::Accepting);
    }

    #[tokio::test]
    async fn test_scenario_b_two_non_clustered_nodes() {
        // ARRANGE
        let registry = InMemoryNodeRegistry::new();
        let n1 = manager_for("n1", false, registry.clone());
        let n2 = manager_for("n2", false, registry.clone());
        n1.register_at_startup().await.unwrap();

        // ACT
        n2.register_at_startup().await.unwrap();
        let from_n1 = n1.check_topology().await;
        let from_n2 = n2.run_check_cycle().await;

        // ASSERT
        for result in [from_n1, from_n2] {
            match result {
                Err(ClusterError::IntegrityViolation { status, .. }) => {
                    assert_eq!(status, NodeErrorStatus::NonClusteredNodeWithOthers)
                }
                other => panic!("expected topology violation, got {:?}", other),
            }
        }
        assert_eq!(n1.scheduler().state(), SchedulerState::Stopped);
        assert_eq!(n2.scheduler().state(), SchedulerState::Stopped);
    }

    #[tokio::test]
    async fn test_topology_violation_published_on_own_record() {
        let registry = InMemoryNodeRegistry::new();
        let n1 = manager_for("n1", false, registry.clone());
        let n2 = manager_for("n2", true, registry.clone());
        n1.register_at_startup().await.unwrap();
        n2.register_at_startup().await.unwrap();

        let _ = n1.check_topology().await;

        let stored = registry.search_by_name("n1").await.unwrap();
        assert_eq!(
            stored[0].error_status,
            Some(NodeErrorStatus::NonClusteredNodeWithOthers)
        );
    }

    #[tokio::test]
    async fn test_clustered_nodes_coexist() {
        let registry = InMemoryNodeRegistry::new();
        let n1 = manager_for("n1", true, registry.clone());
        let n2 = manager_for("n2", true, registry.clone());

        n1.register_at_startup().await.unwrap();
        n2.register_at_startup().await.unwrap();

        assert!(n1.run_check_cycle().await.is_ok());
        assert!(n2.run_check_cycle().await.is_ok());
        assert_eq!(n1.list_nodes(true).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_registration_removes_stale_records() {
        // ARRANGE: two stale rows for "n1" left behind by crashed processes
        let registry = InMemoryNodeRegistry::new();
        registry.overwrite(record("n1", true, 500, true));
        registry.overwrite(record("n1", true, 900, false));
        let n1 = manager_for("n1", true, registry.clone());

        // ACT
        let registered = n1.register_at_startup().await.unwrap();

        // ASSERT
        let rows = registry.search_by_name("n1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].oid, registered.oid);
        assert_eq!(rows[0].internal_token, registered.internal_token);
    }

    #[tokio::test]
    async fn test_concurrent_insert_conflict_is_fatal() {
        let registry = Arc::new(RacingRegistry {
            inner: InMemoryNodeRegistry::new(),
        });
        let n1 = manager_for("n1", true, registry);

        let result = n1.register_at_startup().await;

        assert!(matches!(result, Err(ClusterError::RegistryConflict { .. })));
        assert_eq!(
            n1.error_status().await,
            NodeErrorStatus::NodeRegistrationFailed
        );
        assert_eq!(
            n1.scheduler().state(),
            SchedulerState::Stopped,
            "scheduling must never start after a failed registration"
        );
    }

    #[tokio::test]
    async fn test_invalid_config_degrades_before_registry_access() {
        let inner = InMemoryNodeRegistry::new();
        let registry = CountingRegistry::new(inner.clone());
        let n1 = manager_for("", true, registry.clone());

        let result = n1.register_at_startup().await;

        assert!(matches!(result, Err(ClusterError::Configuration(_))));
        assert_eq!(
            n1.error_status().await,
            NodeErrorStatus::LocalConfigurationError
        );
        assert_eq!(registry.writes(), 0);
        assert!(inner.is_empty());
    }

    #[tokio::test]
    async fn test_sequential_registrations_leave_one_row() {
        let registry = InMemoryNodeRegistry::new();
        let first = manager_for("n1", true, registry.clone());
        let second = manager_for("n1", true, registry.clone());

        first.register_at_startup().await.unwrap();
        second.register_at_startup().await.unwrap();

        assert_eq!(registry.search_by_name("n1").await.unwrap().len(), 1);

        // The first process lost its row to the second one.
        let result = first.run_check_cycle().await;
        assert!(matches!(
            result,
            Err(ClusterError::IntegrityViolation {
                status: NodeErrorStatus::DuplicateNodeIdOrName,
                ..
            })
        ));
        assert!(second.run_check_cycle().await.is_ok());
    }

    #[tokio::test]
    async fn test_parallel_registrations_leave_at_most_one_row() {
        for _ in 0..20 {
            let registry = InMemoryNodeRegistry::new();
            let a = manager_for("shared", true, registry.clone());
            let b = manager_for("shared", true, registry.clone());

            let (ra, rb) = tokio::join!(
                tokio::spawn({
                    let a = a.clone();
                    async move { a.register_at_startup().await }
                }),
                tokio::spawn({
                    let b = b.clone();
                    async move { b.register_at_startup().await }
                })
            );
            let _ = (ra.unwrap(), rb.unwrap());

            assert!(registry.search_by_name("shared").await.unwrap().len() <= 1);

            // After both verify, at most one still considers itself healthy.
            let _ = a.run_check_cycle().await;
            let _ = b.run_check_cycle().await;
            let healthy = [a.error_status().await, b.error_status().await]
                .iter()
                .filter(|s| s.is_ok())
                .count();
            assert!(healthy <= 1);
        }
    }

    // ============================================================
    // HEARTBEAT & INTEGRITY TESTS
    // ============================================================

    #[tokio::test]
    async fn test_heartbeat_round_trip_keeps_token() {
        let registry = InMemoryNodeRegistry::new();
        let n1 = manager_for("n1", true, registry.clone());
        let registered = n1.register_at_startup().await.unwrap();

        for _ in 0..5 {
            n1.heartbeat().await.unwrap();
        }
        n1.verify_integrity().await.unwrap();

        let stored = registry.get_by_id(&registered.oid).await.unwrap();
        assert_eq!(stored.internal_token, registered.internal_token);
        assert_eq!(stored.identifier, registered.identifier);
        assert_eq!(stored.clustered, registered.clustered);
        assert!(stored.last_check_in >= registered.last_check_in);
    }

    #[tokio::test]
    async fn test_token_mismatch_stops_all_registry_writes() {
        // ARRANGE
        let inner = InMemoryNodeRegistry::new();
        let registry = CountingRegistry::new(inner.clone());
        let n1 = manager_for("n1", true, registry.clone());
        let registered = n1.register_at_startup().await.unwrap();

        // An impostor rewrites our row with its own token.
        inner.overwrite(NodeRecord {
            internal_token: "impostor".into(),
            ..registered.clone()
        });
        let writes_before = registry.writes();

        // ACT
        let result = n1.run_check_cycle().await;
        let _ = n1.heartbeat().await;
        n1.record_shutdown().await;

        // ASSERT
        assert!(matches!(
            result,
            Err(ClusterError::IntegrityViolation {
                status: NodeErrorStatus::DuplicateNodeIdOrName,
                ..
            })
        ));
        assert_eq!(registry.writes(), writes_before);
        let stored = inner.get_by_id(&registered.oid).await.unwrap();
        assert_eq!(stored.internal_token, "impostor");
        assert!(stored.running, "impostor's row must not be touched");
    }

    #[tokio::test]
    async fn test_heartbeat_checks_token_before_writing() {
        // ARRANGE: takeover not yet seen by any check cycle
        let inner = InMemoryNodeRegistry::new();
        let registry = CountingRegistry::new(inner.clone());
        let n1 = manager_for("n1", true, registry.clone());
        let registered = n1.register_at_startup().await.unwrap();

        let stale = Utc::now() - ChronoDuration::hours(1);
        inner.overwrite(NodeRecord {
            internal_token: "impostor".into(),
            last_check_in: stale,
            ..registered.clone()
        });
        let writes_before = registry.writes();

        // ACT
        let result = n1.heartbeat().await;

        // ASSERT: the impostor's row keeps its old check-in
        assert!(matches!(
            result,
            Err(ClusterError::IntegrityViolation {
                status: NodeErrorStatus::DuplicateNodeIdOrName,
                ..
            })
        ));
        assert_eq!(
            n1.error_status().await,
            NodeErrorStatus::DuplicateNodeIdOrName
        );
        assert_eq!(registry.writes(), writes_before);
        let stored = inner.get_by_id(&registered.oid).await.unwrap();
        assert_eq!(stored.last_check_in, stale);
    }

    #[tokio::test]
    async fn test_shutdown_leaves_foreign_row_untouched() {
        // ARRANGE
        let inner = InMemoryNodeRegistry::new();
        let registry = CountingRegistry::new(inner.clone());
        let n1 = manager_for("n1", true, registry.clone());
        let registered = n1.register_at_startup().await.unwrap();

        inner.overwrite(NodeRecord {
            internal_token: "impostor".into(),
            ..registered.clone()
        });
        let writes_before = registry.writes();

        // ACT
        n1.record_shutdown().await;

        // ASSERT
        assert_eq!(registry.writes(), writes_before);
        let stored = inner.get_by_id(&registered.oid).await.unwrap();
        assert!(stored.running);
        assert_eq!(stored.operational_state, OperationalState::Up);
        assert_eq!(
            n1.error_status().await,
            NodeErrorStatus::DuplicateNodeIdOrName
        );
        assert_eq!(n1.state().await, NodeState::Stopped);
    }

    #[tokio::test]
    async fn test_vanished_record_without_replacement() {
        let registry = InMemoryNodeRegistry::new();
        let n1 = manager_for("n1", true, registry.clone());
        let registered = n1.register_at_startup().await.unwrap();

        registry.delete(&registered.oid).await.unwrap();
        let result = n1.heartbeat().await;

        assert!(result.is_err());
        assert_eq!(
            n1.error_status().await,
            NodeErrorStatus::NodeRegistrationFailed
        );
    }

    #[tokio::test]
    async fn test_unreachable_registry_is_fatal_without_retry() {
        let registry = InMemoryNodeRegistry::new();
        let n1 = manager_for("n1", true, registry.clone());
        n1.register_at_startup().await.unwrap();

        registry.set_available(false);
        let result = n1.run_check_cycle().await;
        registry.set_available(true);

        assert!(matches!(
            result,
            Err(ClusterError::TransientCommunication { .. })
        ));
        assert_eq!(
            n1.error_status().await,
            NodeErrorStatus::NodeRegistrationFailed
        );

        // Degradation is one-way even once the registry is back.
        assert!(matches!(
            n1.run_check_cycle().await,
            Err(ClusterError::Degraded(NodeErrorStatus::NodeRegistrationFailed))
        ));
        assert_eq!(n1.scheduler().state(), SchedulerState::Stopped);
    }

    #[tokio::test]
    async fn test_checks_require_registration() {
        let n1 = manager_for("n1", true, InMemoryNodeRegistry::new());

        assert!(n1.heartbeat().await.is_err());
        assert_eq!(n1.state().await, NodeState::Registering);
    }

    // ============================================================
    // SHUTDOWN TESTS
    // ============================================================

    #[tokio::test]
    async fn test_record_shutdown_marks_record_down() {
        let registry = InMemoryNodeRegistry::new();
        let n1 = manager_for("n1", true, registry.clone());
        let registered = n1.register_at_startup().await.unwrap();

        n1.record_shutdown().await;

        let stored = registry.get_by_id(&registered.oid).await.unwrap();
        assert!(!stored.running);
        assert_eq!(stored.operational_state, OperationalState::Down);
        assert_eq!(n1.state().await, NodeState::Stopped);
        assert_eq!(n1.scheduler().state(), SchedulerState::Stopped);
    }

    #[tokio::test]
    async fn test_record_shutdown_tolerates_missing_record() {
        let registry = InMemoryNodeRegistry::new();
        let n1 = manager_for("n1", true, registry.clone());
        let registered = n1.register_at_startup().await.unwrap();
        registry.delete(&registered.oid).await.unwrap();

        n1.record_shutdown().await;

        assert_eq!(n1.state().await, NodeState::Stopped);
    }

    // ============================================================
    // ADMINISTRATIVE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_delete_live_node_refused() {
        let registry = InMemoryNodeRegistry::new();
        let n1 = manager_for("n1", true, registry.clone());
        let n2 = manager_for("n2", true, registry.clone());
        n1.register_at_startup().await.unwrap();
        n2.register_at_startup().await.unwrap();

        let result = n1.delete_node("n2").await;

        assert!(matches!(result, Err(ClusterError::NodeIsLive { .. })));
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_dead_node() {
        let registry = InMemoryNodeRegistry::new();
        registry.overwrite(record("old", true, 3600, true));
        let n1 = manager_for("n1", true, registry.clone());
        n1.register_at_startup().await.unwrap();

        assert_eq!(n1.delete_node("old").await.unwrap(), 1);
        assert!(matches!(
            n1.delete_node("old").await,
            Err(ClusterError::NodeNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_cleanup_dead_nodes_respects_retention() {
        let registry = InMemoryNodeRegistry::new();
        registry.overwrite(record("ancient", true, 7200, true));
        registry.overwrite(record("recently-dead", true, 120, true));
        let n1 = manager_for("n1", true, registry.clone());
        n1.register_at_startup().await.unwrap();

        let removed = n1
            .cleanup_dead_nodes(Duration::from_secs(3600))
            .await
            .unwrap();

        assert_eq!(removed, vec!["ancient".to_string()]);
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_handler_status_codes() {
        let registry = InMemoryNodeRegistry::new();
        let n1 = manager_for("n1", true, registry.clone());
        n1.register_at_startup().await.unwrap();

        let (live_code, live_body) =
            handle_delete_node(Extension(n1.clone()), Path("n1".to_string())).await;
        let (missing_code, _) =
            handle_delete_node(Extension(n1.clone()), Path("ghost".to_string())).await;

        assert_eq!(live_code, StatusCode::CONFLICT);
        assert!(!live_body.success);
        assert_eq!(live_body.error_status, NodeErrorStatus::Ok);
        assert_eq!(missing_code, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_status_handler_reports_sticky_error() {
        let registry = InMemoryNodeRegistry::new();
        let n1 = manager_for("n1", true, registry.clone());
        n1.register_at_startup().await.unwrap();
        registry.set_available(false);
        let _ = n1.heartbeat().await;

        let (code, body) = handle_node_status(Extension(n1.clone())).await;

        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.error_status, NodeErrorStatus::NodeRegistrationFailed);
        assert_eq!(
            body.state,
            NodeState::Degraded(NodeErrorStatus::NodeRegistrationFailed)
        );
    }

    // ============================================================
    // TIMER TESTS
    // ============================================================

    #[tokio::test]
    async fn test_timer_refreshes_check_in() {
        let registry = InMemoryNodeRegistry::new();
        let config = NodeConfig {
            identifier: "n1".into(),
            clustered: true,
            heartbeat_interval: Duration::from_millis(20),
            liveness_window: Duration::from_secs(5),
            check_timeout: Duration::from_secs(1),
            ..Default::default()
        };
        let n1 =
            NodeLifecycleManager::new(config, registry.clone(), Arc::new(LocalScheduler::new()));
        let registered = n1.register_at_startup().await.unwrap();
        let shutdown = tokio_util::sync::CancellationToken::new();

        let handle = n1.clone().start(shutdown.clone());
        tokio::time::sleep(Duration::from_millis(120)).await;
        shutdown.cancel();
        handle.await.unwrap();

        let stored = registry.get_by_id(&registered.oid).await.unwrap();
        assert!(stored.last_check_in > registered.last_check_in);
        assert_eq!(n1.error_status().await, NodeErrorStatus::Ok);
    }

    #[tokio::test]
    async fn test_timer_survives_registry_outage() {
        let registry = InMemoryNodeRegistry::new();
        let config = NodeConfig {
            identifier: "n1".into(),
            clustered: true,
            heartbeat_interval: Duration::from_millis(20),
            liveness_window: Duration::from_secs(5),
            check_timeout: Duration::from_secs(1),
            ..Default::default()
        };
        let n1 =
            NodeLifecycleManager::new(config, registry.clone(), Arc::new(LocalScheduler::new()));
        n1.register_at_startup().await.unwrap();
        let shutdown = tokio_util::sync::CancellationToken::new();

        registry.set_available(false);
        let handle = n1.clone().start(shutdown.clone());
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!handle.is_finished(), "timer must keep running when degraded");
        assert_eq!(
            n1.error_status().await,
            NodeErrorStatus::NodeRegistrationFailed
        );

        shutdown.cancel();
        handle.await.unwrap();
    }
}
