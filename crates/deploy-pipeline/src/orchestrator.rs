//! Deployment orchestrator
//!
//! Runs one attempt through every stage in order:
//!
//! ```text
//! Initializing -> RepositoryReady -> ImagePublished -> ServiceDeployed
//!              -> TokenIssued -> Recorded
//! ```
//!
//! The first failing stage ends the run with `Failed(stage)`. Nothing created
//! by earlier stages is rolled back; `Reconciler` finds such leftovers.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use deploy_common::{
    CredentialIssuer, DeploymentContext, DeploymentResult, DeploymentStatus, Error, PipelineError,
    Result, SecurityContext, Stage,
};
use deployment_store::DeploymentRecorder;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};

use crate::clients::{ArtifactRegistry, ComputePlatform, ContainerEngine, RegistryAuth};
use crate::config::PipelineConfig;
use crate::stages::{ImagePublisher, RegistryProvisioner, ServiceDeployer};

/// Progress of one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "stage")]
pub enum PipelineState {
    Initializing,
    RepositoryReady,
    ImagePublished,
    ServiceDeployed,
    TokenIssued,
    Recorded,
    Failed(Stage),
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Recorded | PipelineState::Failed(_))
    }
}

/// Callback invoked on every state transition
///
/// The context is `None` until the attempt has an identity: for the initial
/// `Initializing` and for `Failed(Stage::Identity)`.
pub type StateObserver = Arc<dyn Fn(Option<&DeploymentContext>, PipelineState) + Send + Sync>;

/// External systems the pipeline drives
#[derive(Clone)]
pub struct Collaborators {
    pub engine: Arc<dyn ContainerEngine>,
    pub registry: Arc<dyn ArtifactRegistry>,
    pub compute: Arc<dyn ComputePlatform>,
    pub auth: Arc<dyn RegistryAuth>,
}

pub struct Orchestrator {
    config: PipelineConfig,
    provisioner: RegistryProvisioner,
    publisher: ImagePublisher,
    deployer: ServiceDeployer,
    issuer: CredentialIssuer,
    recorder: DeploymentRecorder,
    observer: Option<StateObserver>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Wire the stages. Fails if the signing secret or token ttl is unusable.
    pub fn new(
        config: PipelineConfig,
        collaborators: Collaborators,
        recorder: DeploymentRecorder,
    ) -> Result<Self> {
        let issuer = CredentialIssuer::new(config.signing_secret.clone(), config.token_ttl)?;

        let provisioner = RegistryProvisioner::new(
            collaborators.registry.clone(),
            collaborators.auth.clone(),
        );
        let publisher = ImagePublisher::new(
            collaborators.engine,
            collaborators.registry,
            collaborators.auth,
            config.publish.clone(),
        );
        let deployer = ServiceDeployer::new(
            collaborators.compute,
            config.naming.project_id.clone(),
            config.service.clone(),
        );

        Ok(Self {
            config,
            provisioner,
            publisher,
            deployer,
            issuer,
            recorder,
            observer: None,
        })
    }

    pub fn with_observer(mut self, observer: StateObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn issuer(&self) -> &CredentialIssuer {
        &self.issuer
    }

    pub fn recorder(&self) -> &DeploymentRecorder {
        &self.recorder
    }

    /// Run a full deployment for `client_id`
    pub async fn run(
        &self,
        client_id: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<DeploymentResult, PipelineError> {
        self.transition(None, PipelineState::Initializing);

        let ctx = DeploymentContext::generate(client_id, &self.config.naming).map_err(|e| {
            error!(client = %client_id, "Invalid deployment request: {}", e);
            self.transition(None, PipelineState::Failed(Stage::Identity));
            PipelineError::new(Stage::Identity, e)
        })?;

        let span = info_span!("deployment", client = %ctx.client_id(), id = %ctx.unique_id());
        self.run_attempt(&ctx, cancel).instrument(span).await
    }

    async fn run_attempt(
        &self,
        ctx: &DeploymentContext,
        cancel: &CancellationToken,
    ) -> std::result::Result<DeploymentResult, PipelineError> {
        info!("Starting deployment for client: {}", ctx.client_id());

        self.stage(ctx, Stage::Repository, cancel, self.provisioner.ensure_repository(ctx))
            .await?;
        self.transition(Some(ctx), PipelineState::RepositoryReady);

        self.stage(
            ctx,
            Stage::Build,
            cancel,
            self.publisher.build(ctx, &self.config.source_dir),
        )
        .await?;

        self.stage(ctx, Stage::Publish, cancel, self.publisher.publish(ctx, cancel))
            .await?;
        self.transition(Some(ctx), PipelineState::ImagePublished);

        let security = SecurityContext::new(ctx.client_id(), self.config.signing_secret.clone());
        let deployed = self
            .stage(
                ctx,
                Stage::Deploy,
                cancel,
                self.deployer.deploy(
                    ctx.service_name(),
                    ctx.image_tag(),
                    ctx.region(),
                    &security.env_vars(),
                ),
            )
            .await?;
        self.transition(Some(ctx), PipelineState::ServiceDeployed);

        let credential = self
            .stage(ctx, Stage::Credential, cancel, async {
                self.issuer.issue(ctx.client_id())
            })
            .await?;
        self.transition(Some(ctx), PipelineState::TokenIssued);

        let result = DeploymentResult {
            service_name: ctx.service_name().to_string(),
            rpc_endpoint: deployed.rpc_endpoint,
            ws_endpoint: deployed.ws_endpoint,
            status: DeploymentStatus::Running,
            access_token: credential.token,
            deployment_time: Utc::now(),
            client_id: ctx.client_id().to_string(),
            unique_id: ctx.unique_id().to_string(),
            image_tag: ctx.image_tag().to_string(),
        };

        self.stage(
            ctx,
            Stage::Record,
            cancel,
            self.recorder.record(&result, ctx.client_id()),
        )
        .await?;
        self.transition(Some(ctx), PipelineState::Recorded);

        info!(
            service = %result.service_name,
            endpoint = %result.rpc_endpoint,
            "Deployment completed"
        );
        Ok(result)
    }

    /// Run one stage, honoring cancellation at its start and tagging its failure
    async fn stage<T, F>(
        &self,
        ctx: &DeploymentContext,
        stage: Stage,
        cancel: &CancellationToken,
        step: F,
    ) -> std::result::Result<T, PipelineError>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        let outcome = if cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            step.await
        };

        outcome.map_err(|e| {
            error!(
                stage = %stage,
                kind = e.kind(),
                service = %ctx.service_name(),
                "Deployment failed: {}",
                e
            );
            self.transition(Some(ctx), PipelineState::Failed(stage));
            PipelineError::new(stage, e)
        })
    }

    fn transition(&self, ctx: Option<&DeploymentContext>, state: PipelineState) {
        if let Some(observer) = &self.observer {
            observer(ctx, state);
        }
    }
}
