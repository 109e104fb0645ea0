//! REST API handlers.
//!
//! Each handler calls one `Coordinator` operation and returns a JSON
//! envelope.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use fleet_cluster::{
    ClusterSpec, CoordinatorError, ErrorKind, NodeReport, NodeSpec, NodeUpdate, OnboardRequest,
};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    /// Set on failures the caller should retry with backoff.
    #[serde(skip_serializing_if = "Option::is_none")]
    retryable: Option<bool>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
            retryable: None,
        })
    }
}

/// HTTP status for a coordinator error kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Precondition => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::Retryable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: CoordinatorError) -> Response {
    let status = status_for(err.kind());
    if status.is_server_error() && !err.is_retryable() {
        error!(error = %err, "request failed");
    } else {
        warn!(error = %err, status = status.as_u16(), "request rejected");
    }
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(err.to_string()),
            retryable: Some(err.is_retryable()),
        }),
    )
        .into_response()
}

fn respond<T: Serialize>(result: Result<T, CoordinatorError>) -> Response {
    match result {
        Ok(data) => ApiResponse::ok(data).into_response(),
        Err(e) => error_response(e),
    }
}

// ── Clusters ───────────────────────────────────────────────────

/// POST /api/v1/clusters
pub async fn create_cluster(
    State(state): State<ApiState>,
    Json(spec): Json<ClusterSpec>,
) -> Response {
    match state.coordinator.create_cluster(spec) {
        Ok(cluster) => (StatusCode::CREATED, ApiResponse::ok(cluster)).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /api/v1/clusters/{id}
pub async fn get_cluster(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    respond(state.coordinator.get_cluster(&id))
}

/// DELETE /api/v1/clusters/{id}
pub async fn delete_cluster(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    respond(state.coordinator.delete_cluster(&id).map(|()| "deleted"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualIpRequest {
    #[serde(default)]
    pub virtual_ip: Option<String>,
}

/// PUT /api/v1/clusters/{id}/virtual-ip
pub async fn update_virtual_ip(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<VirtualIpRequest>,
) -> Response {
    respond(state.coordinator.update_cluster_virtual_ip(&id, req.virtual_ip))
}

/// GET /api/v1/clusters/{id}/status
pub async fn cluster_status(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    respond(state.coordinator.cluster_status(&id))
}

// ── Nodes ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNodeRequest {
    pub cluster_id: String,
    #[serde(flatten)]
    pub spec: NodeSpec,
}

#[derive(Debug, Serialize)]
struct Created {
    id: String,
}

/// POST /api/v1/nodes
pub async fn create_node(
    State(state): State<ApiState>,
    Json(req): Json<CreateNodeRequest>,
) -> Response {
    match state.coordinator.create_node(&req.cluster_id, req.spec) {
        Ok(id) => (StatusCode::CREATED, ApiResponse::ok(Created { id })).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /api/v1/nodes/{id}
pub async fn get_node(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    respond(state.coordinator.get_node(&id))
}

/// PUT /api/v1/nodes/{id}
pub async fn update_node(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(update): Json<NodeUpdate>,
) -> Response {
    respond(state.coordinator.update_node(&id, update))
}

/// DELETE /api/v1/nodes/{id}
pub async fn delete_node(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    respond(state.coordinator.delete_node(&id))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyRequest {
    pub serial_number: String,
}

/// POST /api/v1/nodes/identify
pub async fn identify_node(
    State(state): State<ApiState>,
    Json(req): Json<IdentifyRequest>,
) -> Response {
    respond(state.coordinator.identify_by_serial_number(&req.serial_number))
}

/// POST /api/v1/nodes/onboarded
pub async fn mark_onboarded(
    State(state): State<ApiState>,
    Json(req): Json<OnboardRequest>,
) -> Response {
    respond(state.coordinator.mark_onboarded(&req).map(|()| "onboarded"))
}

/// PUT /api/v1/nodes/{id}/info
pub async fn report_node_info(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(report): Json<NodeReport>,
) -> Response {
    respond(state.coordinator.report_node_info(&id, report))
}

/// GET /api/v1/nodes/{id}/status
pub async fn node_status(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    respond(state.coordinator.node_status(&id))
}

/// GET /api/v1/nodes/{id}/features
///
/// `data` is absent while no node of the cluster has reported a version.
pub async fn node_features(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    respond(state.coordinator.features_for_node(&id))
}

// ── Capabilities ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct FeaturesQuery {
    #[serde(default)]
    pub version: Option<String>,
}

/// GET /api/v1/features?version=
pub async fn resolve_features(
    State(state): State<ApiState>,
    Query(query): Query<FeaturesQuery>,
) -> Response {
    let features = state.coordinator.resolve_capabilities(query.version.as_deref());
    ApiResponse::ok(features).into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EligibilityRequest {
    pub cluster_ids: Vec<String>,
    pub target_version: String,
}

/// POST /api/v1/upgrades/eligibility
pub async fn upgrade_eligibility(
    State(state): State<ApiState>,
    Json(req): Json<EligibilityRequest>,
) -> Response {
    respond(
        state
            .coordinator
            .check_upgrade_eligibility(&req.cluster_ids, &req.target_version)
            .map(|v| v.to_string()),
    )
}
