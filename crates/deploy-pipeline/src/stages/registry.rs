//! Registry provisioning

use std::sync::Arc;

use deploy_common::{DeploymentContext, Error, Result};
use serde::Serialize;
use tracing::{error, info};

use crate::clients::{ArtifactRegistry, RegistryAuth, Repository, RepositorySpec};

pub const REPOSITORY_DESCRIPTION: &str = "Docker repository for secure applications";

/// A provisioned repository, keyed by `(region, repository_name)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryHandle {
    pub region: String,
    pub repository_name: String,
    pub repository: Repository,
}

/// Makes sure the attempt's registry repository exists
pub struct RegistryProvisioner {
    registry: Arc<dyn ArtifactRegistry>,
    auth: Arc<dyn RegistryAuth>,
}

impl RegistryProvisioner {
    pub fn new(registry: Arc<dyn ArtifactRegistry>, auth: Arc<dyn RegistryAuth>) -> Self {
        Self { registry, auth }
    }

    /// Get-or-create the repository for `ctx`
    ///
    /// An existing repository is returned unchanged. A missing one is created
    /// and local registry auth is configured for its host. Every other
    /// failure is returned as is, without retry.
    pub async fn ensure_repository(&self, ctx: &DeploymentContext) -> Result<RepositoryHandle> {
        let path = ctx.repository_path();
        info!("Creating/checking Artifact Registry repository: {}", ctx.repository_name());

        let repository = match self.registry.get_repository(&path).await {
            Ok(existing) => {
                info!("Repository already exists");
                existing
            }
            Err(Error::NotFound(_)) => {
                info!("Repository not found, creating new one...");
                let repository = self.create(ctx).await?;
                self.auth.configure_auth(ctx.registry_location()).await?;
                repository
            }
            Err(e) => {
                error!("Failed to create repository: {}", e);
                return Err(e);
            }
        };

        Ok(RepositoryHandle {
            region: ctx.region().to_string(),
            repository_name: ctx.repository_name().to_string(),
            repository,
        })
    }

    async fn create(&self, ctx: &DeploymentContext) -> Result<Repository> {
        let parent = format!("projects/{}/locations/{}", ctx.project_id(), ctx.region());
        let spec = RepositorySpec::docker(REPOSITORY_DESCRIPTION);

        match self
            .registry
            .create_repository(&parent, ctx.repository_name(), &spec)
            .await
        {
            Ok(repository) => Ok(repository),
            // Another attempt for the same client won the race
            Err(Error::AlreadyExists(_)) => {
                info!("Repository created concurrently, fetching it");
                self.registry.get_repository(&ctx.repository_path()).await
            }
            Err(e) => {
                error!("Failed to create repository: {}", e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockAuth, MockRegistry};
    use deploy_common::NamingConfig;

    fn ctx() -> DeploymentContext {
        DeploymentContext::for_attempt("a@b.com", "20240101-000000-abcdefgh", &NamingConfig::default())
            .unwrap()
    }

    #[tokio::test]
    async fn test_creates_missing_repository_once() {
        let registry = Arc::new(MockRegistry::new());
        let auth = Arc::new(MockAuth::new());
        let provisioner = RegistryProvisioner::new(registry.clone(), auth.clone());

        let first = provisioner.ensure_repository(&ctx()).await.unwrap();
        let second = provisioner.ensure_repository(&ctx()).await.unwrap();

        assert_eq!(registry.create_calls(), 1);
        assert_eq!(first, second);
        assert_eq!(first.repository.format, "DOCKER");
        assert_eq!(first.repository.description, REPOSITORY_DESCRIPTION);
        assert_eq!(auth.hosts(), vec!["us-central1-docker.pkg.dev"]);
    }

    #[tokio::test]
    async fn test_existing_repository_untouched() {
        let ctx = ctx();
        let registry = Arc::new(MockRegistry::new().with_repository(&ctx.repository_path()));
        let auth = Arc::new(MockAuth::new());
        let provisioner = RegistryProvisioner::new(registry.clone(), auth.clone());

        let handle = provisioner.ensure_repository(&ctx).await.unwrap();

        assert_eq!(registry.create_calls(), 0);
        assert_eq!(handle.repository.description, "existing");
        assert!(auth.hosts().is_empty());
    }

    #[tokio::test]
    async fn test_lost_create_race_refetches() {
        let ctx = ctx();
        let registry = Arc::new(MockRegistry::new().losing_create_race());
        let auth = Arc::new(MockAuth::new());
        let provisioner = RegistryProvisioner::new(registry.clone(), auth.clone());

        let handle = provisioner.ensure_repository(&ctx).await.unwrap();

        assert_eq!(registry.create_calls(), 1);
        assert_eq!(registry.get_calls(), 2);
        assert_eq!(handle.repository.name, ctx.repository_path());
        assert_eq!(handle.repository.description, "created concurrently");
        assert_eq!(handle.repository_name, "secure-app-a");
        assert_eq!(auth.hosts(), vec!["us-central1-docker.pkg.dev"]);
    }

    #[tokio::test]
    async fn test_permission_denied_is_fatal() {
        let registry = Arc::new(MockRegistry::new().deny_access());
        let provisioner = RegistryProvisioner::new(registry.clone(), Arc::new(MockAuth::new()));

        let err = provisioner.ensure_repository(&ctx()).await.unwrap_err();

        assert!(matches!(err, Error::PermissionDenied(_)));
        assert_eq!(registry.get_calls(), 1);
        assert_eq!(registry.create_calls(), 0);
    }
}
