//! Deploy Pipeline
//!
//! Turns a client id into a running, access-controlled Cloud Run service:
//! provisions the Artifact Registry repository, builds and publishes the
//! application image, deploys it, issues the client's access token and
//! records the deployment.
//!
//! Every external system sits behind a trait in [`clients`], so the whole
//! pipeline also runs against the in-memory collaborators in [`mock`].

pub mod clients;
pub mod config;
pub mod mock;
pub mod orchestrator;
pub mod reconcile;
pub mod stages;

pub use config::{InvokerPolicy, PipelineConfig, PublishSettings, ServiceSettings};
pub use orchestrator::{Collaborators, Orchestrator, PipelineState, StateObserver};
pub use reconcile::{AttemptResources, Reconciler};
pub use stages::{
    DeployedService, ImagePublisher, PublishedImage, RegistryProvisioner, RepositoryHandle,
    ServiceDeployer,
};
