use super::protocol::*;
use super::service::NodeLifecycleManager;
use crate::error::ClusterError;

use axum::{
    Extension, Json,
    extract::{Path, Query},
    http::StatusCode,
};
use std::sync::Arc;

pub async fn handle_list_nodes(
    Extension(manager): Extension<Arc<NodeLifecycleManager>>,
    Query(query): Query<ListNodesQuery>,
) -> (StatusCode, Json<ListNodesResponse>) {
    let error_status = manager.error_status().await;

    match manager.list_nodes(query.live).await {
        Ok(nodes) => (
            StatusCode::OK,
            Json(ListNodesResponse {
                nodes,
                error_status,
            }),
        ),
        Err(e) => {
            tracing::error!("Failed to list nodes: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ListNodesResponse {
                    nodes: Vec::new(),
                    error_status,
                }),
            )
        }
    }
}

pub async fn handle_node_status(
    Extension(manager): Extension<Arc<NodeLifecycleManager>>,
) -> (StatusCode, Json<LocalNodeStatus>) {
    let status = manager.status().await;
    let code = if status.error_status.is_ok() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status))
}

pub async fn handle_force_heartbeat(
    Extension(manager): Extension<Arc<NodeLifecycleManager>>,
) -> (StatusCode, Json<AdminResponse>) {
    let result = manager.run_check_cycle().await;
    let error_status = manager.error_status().await;

    match result {
        Ok(()) => (
            StatusCode::OK,
            Json(AdminResponse {
                success: true,
                error_status,
                message: None,
            }),
        ),
        Err(e) => {
            tracing::warn!("Forced node check failed: {}", e);
            (
                StatusCode::CONFLICT,
                Json(AdminResponse {
                    success: false,
                    error_status,
                    message: Some(e.to_string()),
                }),
            )
        }
    }
}

pub async fn handle_delete_node(
    Extension(manager): Extension<Arc<NodeLifecycleManager>>,
    Path(identifier): Path<String>,
) -> (StatusCode, Json<AdminResponse>) {
    let result = manager.delete_node(&identifier).await;
    let error_status = manager.error_status().await;

    let (code, message) = match result {
        Ok(deleted) => (
            StatusCode::OK,
            Some(format!("deleted {} record(s)", deleted)),
        ),
        Err(e @ ClusterError::NodeNotFound { .. }) => {
            (StatusCode::NOT_FOUND, Some(e.to_string()))
        }
        Err(e @ ClusterError::NodeIsLive { .. }) => (StatusCode::CONFLICT, Some(e.to_string())),
        Err(e) => {
            tracing::error!("Failed to delete node '{}': {}", identifier, e);
            (StatusCode::SERVICE_UNAVAILABLE, Some(e.to_string()))
        }
    };

    (
        code,
        Json(AdminResponse {
            success: code == StatusCode::OK,
            error_status,
            message,
        }),
    )
}

pub async fn handle_cleanup_dead_nodes(
    Extension(manager): Extension<Arc<NodeLifecycleManager>>,
) -> (StatusCode, Json<CleanupResponse>) {
    let retention = manager.config().dead_node_retention;
    let result = manager.cleanup_dead_nodes(retention).await;
    let error_status = manager.error_status().await;

    match result {
        Ok(removed) => (
            StatusCode::OK,
            Json(CleanupResponse {
                removed,
                error_status,
            }),
        ),
        Err(e) => {
            tracing::error!("Dead node cleanup failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(CleanupResponse {
                    removed: Vec::new(),
                    error_status,
                }),
            )
        }
    }
}
