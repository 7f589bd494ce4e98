//! Collaborator interfaces
//!
//! The pipeline talks to the outside world only through these traits:
//! - `ContainerEngine`: builds and pushes images (Docker CLI)
//! - `ArtifactRegistry`: repositories and image listings (Artifact Registry REST)
//! - `ComputePlatform`: managed services and their IAM policy (Cloud Run REST)
//! - `RegistryAuth`: local registry credential configuration (gcloud helper)
//!
//! `crate::mock` holds in-memory implementations of all of them.

pub mod artifact_registry;
pub mod cloud_run;
pub mod command;
pub mod docker;
pub mod gcp;

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use deploy_common::Result;
use serde::{Deserialize, Serialize};

pub use artifact_registry::ArtifactRegistryClient;
pub use cloud_run::CloudRunClient;
pub use command::{CommandOutput, CommandRunner, CommandSpec, GcloudDockerAuth, TokioCommandRunner};
pub use docker::DockerCli;
pub use gcp::GcpApi;

/// Role granting permission to invoke a managed service
pub const INVOKER_ROLE: &str = "roles/run.invoker";

/// Registry repository as reported by the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    /// Full resource name, `projects/{p}/locations/{r}/repositories/{id}`
    pub name: String,

    #[serde(default)]
    pub format: String,

    #[serde(default)]
    pub description: String,
}

/// Settings for a repository to be created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositorySpec {
    pub format: String,
    pub description: String,
}

impl RepositorySpec {
    /// Container image repository
    pub fn docker(description: impl Into<String>) -> Self {
        Self {
            format: "DOCKER".to_string(),
            description: description.into(),
        }
    }
}

/// Image stored in a repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub uri: String,
    pub tags: Vec<String>,
}

/// Desired state of a managed service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    pub service_id: String,
    pub image: String,
    pub container_port: u16,
    pub cpu_limit: String,
    pub memory_limit: String,
    pub env: BTreeMap<String, String>,
    pub vpc_access: Option<VpcAccess>,
}

/// Private network egress through a serverless VPC connector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VpcAccess {
    pub connector: String,
    pub egress: String,
}

/// Reference to a created service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceHandle {
    /// Full resource name, `projects/{p}/locations/{r}/services/{id}`
    pub name: String,
}

impl ServiceHandle {
    pub fn new(parent: &str, service_id: &str) -> Self {
        Self {
            name: format!("{}/services/{}", parent, service_id),
        }
    }

    /// Last segment of the resource name
    pub fn service_id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

/// Live state of a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub uri: String,
    pub latest_revision: String,
}

/// Role bindings applied to a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPolicy {
    pub bindings: Vec<PolicyBinding>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyBinding {
    pub role: String,
    pub members: Vec<String>,
}

impl AccessPolicy {
    /// Grant the invoker role to `members`
    pub fn invoker(members: Vec<String>) -> Self {
        Self {
            bindings: vec![PolicyBinding {
                role: INVOKER_ROLE.to_string(),
                members,
            }],
        }
    }
}

/// Image build tool
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Build the context at `path` and tag the result `tag`
    async fn build(&self, path: &Path, tag: &str) -> Result<()>;

    /// Push a locally built tag to its registry
    async fn push(&self, tag: &str) -> Result<()>;
}

/// Container registry backend
#[async_trait]
pub trait ArtifactRegistry: Send + Sync {
    /// Fetch a repository. Fails with `NotFound` if it does not exist.
    async fn get_repository(&self, path: &str) -> Result<Repository>;

    /// Create a repository and wait for the operation to finish
    async fn create_repository(
        &self,
        parent: &str,
        repository_id: &str,
        spec: &RepositorySpec,
    ) -> Result<Repository>;

    /// Images in `repository_path` carrying a tag equal to `tag_filter`
    async fn list_images(&self, repository_path: &str, tag_filter: &str) -> Result<Vec<ImageRef>>;
}

/// Managed compute backend
#[async_trait]
pub trait ComputePlatform: Send + Sync {
    /// Create a service under `parent` and block until it is ready
    async fn create_service(&self, parent: &str, spec: &ServiceSpec) -> Result<ServiceHandle>;

    /// Replace the IAM policy of a service
    async fn set_access_policy(&self, service: &ServiceHandle, policy: &AccessPolicy)
        -> Result<()>;

    async fn get_service(&self, service: &ServiceHandle) -> Result<ServiceInfo>;

    /// All services under `parent`
    async fn list_services(&self, parent: &str) -> Result<Vec<ServiceHandle>>;
}

/// Local registry credential configuration
#[async_trait]
pub trait RegistryAuth: Send + Sync {
    /// Make `registry_host` usable for pushes. Idempotent.
    async fn configure_auth(&self, registry_host: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_handle_id() {
        let handle = ServiceHandle::new("projects/p/locations/us-central1", "secure-app-1");
        assert_eq!(
            handle.name,
            "projects/p/locations/us-central1/services/secure-app-1"
        );
        assert_eq!(handle.service_id(), "secure-app-1");
    }

    #[test]
    fn test_docker_repository_spec() {
        let spec = RepositorySpec::docker("desc");
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["format"], "DOCKER");
        assert_eq!(json["description"], "desc");
    }
}
