//! API request handlers for deployments

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use deploy_common::{DeploymentRecord, Error, PipelineError, Stage};
use deploy_pipeline::AttemptResources;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::AppState;

/// API Error type
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub stage: Option<Stage>,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
            stage: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
            "stage": self.stage,
        });

        (self.status, Json(body)).into_response()
    }
}

/// HTTP status for a pipeline error
pub fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::StorageConflict(_) => StatusCode::CONFLICT,
        Error::PermissionDenied(_) => StatusCode::FORBIDDEN,
        Error::PublishUnverified { .. } => StatusCode::GATEWAY_TIMEOUT,
        Error::TransientUnavailable(_) | Error::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError {
            status: status_for(&err),
            message: err.to_string(),
            stage: None,
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        ApiError {
            status: status_for(err.cause()),
            message: err.to_string(),
            stage: Some(err.stage),
        }
    }
}

/// Request to deploy the application for a client
#[derive(Debug, Deserialize)]
pub struct CreateDeploymentRequest {
    pub client_id: String,
}

/// Records of one client
#[derive(Debug, Serialize)]
pub struct ClientDeploymentsResponse {
    pub client_id: String,
    pub deployments: Vec<DeploymentRecord>,
}

#[derive(Debug, Deserialize)]
pub struct AttemptQuery {
    pub client_id: String,
}

/// Leftovers of one attempt
#[derive(Debug, Serialize)]
pub struct AttemptResourcesResponse {
    #[serde(flatten)]
    pub resources: AttemptResources,
    pub orphaned: bool,
}

/// Health check endpoint
pub async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "deploy-api",
        "timestamp": chrono::Utc::now(),
    }))
}

/// Run the full deployment pipeline for a client
///
/// POST /deployments
pub async fn create_deployment_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateDeploymentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    info!("Deployment requested for client: {}", req.client_id);

    let cancel = state.shutdown.child_token();
    let result = state.orchestrator.run(&req.client_id, &cancel).await?;

    Ok((StatusCode::CREATED, Json(result)))
}

/// Get a recorded deployment
///
/// GET /deployments/{service_name}
pub async fn get_deployment_handler(
    State(state): State<Arc<AppState>>,
    Path(service_name): Path<String>,
) -> Result<Json<DeploymentRecord>, ApiError> {
    let record = state.recorder.find(&service_name).await?;

    record
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Deployment not found: {}", service_name)))
}

/// List the deployments of a client, newest first
///
/// GET /clients/{client_id}/deployments
pub async fn list_client_deployments_handler(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
) -> Result<Json<ClientDeploymentsResponse>, ApiError> {
    let deployments = state.recorder.list_for_client(&client_id).await?;

    Ok(Json(ClientDeploymentsResponse {
        client_id,
        deployments,
    }))
}

/// Report what one attempt left behind
///
/// GET /attempts/{unique_id}/resources?client_id=
pub async fn attempt_resources_handler(
    State(state): State<Arc<AppState>>,
    Path(unique_id): Path<String>,
    Query(query): Query<AttemptQuery>,
) -> Result<Json<AttemptResourcesResponse>, ApiError> {
    let resources = state.reconciler.inspect(&query.client_id, &unique_id).await?;
    let orphaned = resources.is_orphaned();

    if orphaned {
        warn!(
            client = %query.client_id,
            id = %unique_id,
            "Attempt left unrecorded resources"
        );
    }

    Ok(Json(AttemptResourcesResponse {
        resources,
        orphaned,
    }))
}
