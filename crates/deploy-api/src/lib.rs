//! Deploy API
//!
//! HTTP boundary of the deployment pipeline. A single request runs the whole
//! pipeline for one client and answers with the endpoints and access token of
//! the new service.
//!
//! ## Endpoints
//!
//! - `POST /deployments` - Deploy the application for `{client_id}`
//! - `GET /deployments/{service_name}` - Recorded deployment
//! - `GET /clients/{client_id}/deployments` - Deployments of a client
//! - `GET /attempts/{unique_id}/resources?client_id=` - Leftovers of an attempt
//! - `GET /health` - Health check

pub mod config;
pub mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use deploy_pipeline::{Collaborators, Orchestrator, PipelineConfig, Reconciler};
use deployment_store::{DeploymentRecorder, DeploymentStore};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Application state shared across handlers
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub reconciler: Reconciler,
    pub recorder: DeploymentRecorder,

    /// Cancelled on shutdown; every running deployment gets a child token
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wire the pipeline, reconciler and recorder over one set of collaborators
    pub fn new(
        config: PipelineConfig,
        collaborators: Collaborators,
        store: Arc<dyn DeploymentStore>,
    ) -> deploy_common::Result<Self> {
        let recorder = DeploymentRecorder::new(store);
        let reconciler = Reconciler::new(
            collaborators.registry.clone(),
            collaborators.compute.clone(),
            recorder.clone(),
            config.naming.clone(),
        );
        let orchestrator = Orchestrator::new(config, collaborators, recorder.clone())?;

        Ok(Self {
            orchestrator,
            reconciler,
            recorder,
            shutdown: CancellationToken::new(),
        })
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_handler))
        // Deployments
        .route("/deployments", post(handlers::create_deployment_handler))
        .route(
            "/deployments/{service_name}",
            get(handlers::get_deployment_handler),
        )
        .route(
            "/clients/{client_id}/deployments",
            get(handlers::list_client_deployments_handler),
        )
        // Reconciliation
        .route(
            "/attempts/{unique_id}/resources",
            get(handlers::attempt_resources_handler),
        )
        // Middleware
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
