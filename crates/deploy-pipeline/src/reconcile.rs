//! Leftover inspection for past attempts
//!
//! A failed run keeps whatever earlier stages created. `Reconciler` rebuilds
//! the attempt's names and reports what still exists. It never deletes.

use std::sync::Arc;

use deploy_common::{DeploymentContext, DeploymentRecord, Error, NamingConfig, Result};
use deployment_store::DeploymentRecorder;
use serde::Serialize;
use tracing::debug;

use crate::clients::{ArtifactRegistry, ComputePlatform, ImageRef, Repository, ServiceHandle};

/// Resources left behind by one attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptResources {
    pub unique_id: String,
    pub client_id: String,
    pub repository: Option<Repository>,
    pub images: Vec<ImageRef>,
    pub services: Vec<ServiceHandle>,
    pub record: Option<DeploymentRecord>,
}

impl AttemptResources {
    /// Cloud resources exist but no deployment was recorded for them
    pub fn is_orphaned(&self) -> bool {
        self.record.is_none() && (!self.images.is_empty() || !self.services.is_empty())
    }
}

pub struct Reconciler {
    registry: Arc<dyn ArtifactRegistry>,
    compute: Arc<dyn ComputePlatform>,
    recorder: DeploymentRecorder,
    naming: NamingConfig,
}

impl Reconciler {
    pub fn new(
        registry: Arc<dyn ArtifactRegistry>,
        compute: Arc<dyn ComputePlatform>,
        recorder: DeploymentRecorder,
        naming: NamingConfig,
    ) -> Self {
        Self {
            registry,
            compute,
            recorder,
            naming,
        }
    }

    pub async fn inspect(&self, client_id: &str, unique_id: &str) -> Result<AttemptResources> {
        let ctx = DeploymentContext::for_attempt(client_id, unique_id, &self.naming)?;
        debug!(client = %client_id, id = %unique_id, "Inspecting attempt");

        let repository = match self.registry.get_repository(&ctx.repository_path()).await {
            Ok(repository) => Some(repository),
            Err(Error::NotFound(_)) => None,
            Err(e) => return Err(e),
        };

        let images = match &repository {
            Some(_) => match self
                .registry
                .list_images(&ctx.repository_path(), ctx.unique_id())
                .await
            {
                Ok(images) => images,
                Err(Error::NotFound(_)) => Vec::new(),
                Err(e) => return Err(e),
            },
            None => Vec::new(),
        };

        let parent = format!("projects/{}/locations/{}", ctx.project_id(), ctx.region());
        let services = self
            .compute
            .list_services(&parent)
            .await?
            .into_iter()
            .filter(|s| s.service_id() == ctx.service_name())
            .collect();

        let record = self.recorder.find(ctx.service_name()).await?;

        Ok(AttemptResources {
            unique_id: ctx.unique_id().to_string(),
            client_id: ctx.client_id().to_string(),
            repository,
            images,
            services,
            record,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{ContainerEngine, RepositorySpec};
    use crate::mock::{MockCompute, MockEngine, MockRegistry};
    use deployment_store::MemoryStore;

    const ID: &str = "20240101-000000-abcdefgh";

    #[tokio::test]
    async fn test_nothing_left() {
        let reconciler = Reconciler::new(
            Arc::new(MockRegistry::new()),
            Arc::new(MockCompute::new()),
            DeploymentRecorder::new(Arc::new(MemoryStore::new())),
            NamingConfig::default(),
        );

        let resources = reconciler.inspect("a@b.com", ID).await.unwrap();

        assert!(resources.repository.is_none());
        assert!(resources.images.is_empty());
        assert!(!resources.is_orphaned());
    }

    fn attempt() -> DeploymentContext {
        DeploymentContext::for_attempt("a@b.com", ID, &NamingConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_pushed_image_without_record_is_orphaned() {
        let registry = Arc::new(MockRegistry::new());
        registry
            .create_repository(
                "projects/local-project/locations/us-central1",
                "secure-app-a",
                &RepositorySpec::docker("d"),
            )
            .await
            .unwrap();
        MockEngine::publishing_to(registry.clone())
            .push(attempt().image_tag())
            .await
            .unwrap();

        let reconciler = Reconciler::new(
            registry,
            Arc::new(MockCompute::new()),
            DeploymentRecorder::new(Arc::new(MemoryStore::new())),
            NamingConfig::default(),
        );

        let resources = reconciler.inspect("a@b.com", ID).await.unwrap();

        assert!(resources.repository.is_some());
        assert_eq!(resources.images.len(), 1);
        assert_eq!(resources.images[0].tags, vec![ID]);
        assert!(resources.services.is_empty());
        assert!(resources.is_orphaned());
    }

    #[tokio::test]
    async fn test_attempt_that_never_ran_is_clean() {
        let registry = Arc::new(MockRegistry::new());
        registry
            .create_repository(
                "projects/local-project/locations/us-central1",
                "secure-app-a",
                &RepositorySpec::docker("d"),
            )
            .await
            .unwrap();
        MockEngine::publishing_to(registry.clone())
            .push(attempt().image_tag())
            .await
            .unwrap();

        let reconciler = Reconciler::new(
            registry,
            Arc::new(MockCompute::new()),
            DeploymentRecorder::new(Arc::new(MemoryStore::new())),
            NamingConfig::default(),
        );

        let resources = reconciler
            .inspect("a@b.com", "19990101-000000-neverran")
            .await
            .unwrap();

        assert!(resources.repository.is_some());
        assert!(resources.images.is_empty());
        assert!(!resources.is_orphaned());
    }

    #[tokio::test]
    async fn test_invalid_client_rejected() {
        let reconciler = Reconciler::new(
            Arc::new(MockRegistry::new()),
            Arc::new(MockCompute::new()),
            DeploymentRecorder::new(Arc::new(MemoryStore::new())),
            NamingConfig::default(),
        );

        let err = reconciler.inspect("", ID).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
