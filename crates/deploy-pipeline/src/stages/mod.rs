//! Pipeline stages
//!
//! Each stage owns one step of a deployment and only talks to the collaborator
//! traits it needs.

pub mod deployer;
pub mod publisher;
pub mod registry;

pub use deployer::{websocket_endpoint, DeployedService, ServiceDeployer};
pub use publisher::{ImagePublisher, PublishedImage};
pub use registry::{RegistryProvisioner, RepositoryHandle};
