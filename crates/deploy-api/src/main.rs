//! Deploy API Service
//!
//! REST API that provisions, publishes, deploys and records client services.

use anyhow::{Context, Result};
use deploy_api::{config::Config, create_router, AppState};
use deploy_pipeline::clients::{
    artifact_registry, cloud_run, ArtifactRegistryClient, CloudRunClient, CommandRunner,
    DockerCli, GcloudDockerAuth, GcpApi, TokioCommandRunner,
};
use deploy_pipeline::mock::{MockAuth, MockCompute, MockEngine, MockRegistry};
use deploy_pipeline::Collaborators;
use deployment_store::{DeploymentStore, MemoryStore, RedisStore};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "deploy_api=debug,deploy_pipeline=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Deploy API Service");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    info!("Configuration loaded: {:?}", config);

    if !config.app_source_dir.is_dir() {
        warn!(
            "Application source directory does not exist: {}",
            config.app_source_dir.display()
        );
    }

    let (collaborators, store) = if config.mock_mode {
        warn!("MOCK_MODE enabled - using in-memory collaborators and storage");
        mock_backends()
    } else {
        live_backends(&config).await?
    };

    // Create application state
    let state = Arc::new(
        AppState::new(config.pipeline_config(), collaborators, store)
            .context("Failed to initialize deployment pipeline")?,
    );
    let shutdown = state.shutdown.clone();

    // Create router
    let app = create_router(state);

    // Start server
    let listener = TcpListener::bind(&config.api_address())
        .await
        .with_context(|| format!("Failed to bind to {}", config.api_address()))?;

    info!("Deploy API listening on {}", config.api_address());
    info!("Health check: http://{}/health", config.api_address());
    info!("API endpoints:");
    info!("  POST /deployments - Deploy for a client");
    info!("  GET /deployments/{{service_name}} - Get deployment");
    info!("  GET /clients/{{client_id}}/deployments - List client deployments");
    info!("  GET /attempts/{{unique_id}}/resources - Inspect attempt leftovers");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown requested, cancelling running deployments");
            shutdown.cancel();
        })
        .await
        .context("Server error")?;

    Ok(())
}

fn mock_backends() -> (Collaborators, Arc<dyn DeploymentStore>) {
    let registry = Arc::new(MockRegistry::new());
    let collaborators = Collaborators {
        engine: Arc::new(MockEngine::publishing_to(registry.clone())),
        registry,
        compute: Arc::new(MockCompute::new()),
        auth: Arc::new(MockAuth::new()),
    };

    (collaborators, Arc::new(MemoryStore::new()))
}

async fn live_backends(config: &Config) -> Result<(Collaborators, Arc<dyn DeploymentStore>)> {
    let token = config
        .gcp_access_token
        .clone()
        .context("GCP_ACCESS_TOKEN is required")?;

    let runner: Arc<dyn CommandRunner> = Arc::new(TokioCommandRunner);
    let collaborators = Collaborators {
        engine: Arc::new(DockerCli::new(runner.clone())),
        registry: Arc::new(ArtifactRegistryClient::new(GcpApi::new(
            artifact_registry::DEFAULT_ENDPOINT,
            token.clone(),
        ))),
        compute: Arc::new(CloudRunClient::new(GcpApi::new(
            cloud_run::DEFAULT_ENDPOINT,
            token,
        ))),
        auth: Arc::new(GcloudDockerAuth::new(runner)),
    };

    info!("Redis URL: {}", config.redis_url);
    let store = RedisStore::new(&config.redis_url)
        .await
        .context("Failed to initialize storage")?;

    Ok((collaborators, Arc::new(store)))
}
