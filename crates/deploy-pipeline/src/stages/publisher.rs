//! Image build, push and visibility check

use std::path::Path;
use std::sync::Arc;

use deploy_common::{DeploymentContext, Error, Result};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clients::{ArtifactRegistry, ContainerEngine, RegistryAuth};
use crate::config::PublishSettings;

/// An image confirmed to be listed by the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishedImage {
    pub image_tag: String,

    /// Digest-qualified uri reported by the registry
    pub uri: String,

    /// Poll on which the image became visible
    pub attempts: u32,
}

pub struct ImagePublisher {
    engine: Arc<dyn ContainerEngine>,
    registry: Arc<dyn ArtifactRegistry>,
    auth: Arc<dyn RegistryAuth>,
    settings: PublishSettings,
}

impl ImagePublisher {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        registry: Arc<dyn ArtifactRegistry>,
        auth: Arc<dyn RegistryAuth>,
        settings: PublishSettings,
    ) -> Self {
        Self {
            engine,
            registry,
            auth,
            settings,
        }
    }

    /// Build the application in `source_dir` under the attempt's image tag
    pub async fn build(&self, ctx: &DeploymentContext, source_dir: &Path) -> Result<()> {
        if !source_dir.is_dir() {
            return Err(Error::invalid_argument(format!(
                "application source directory not found: {}",
                source_dir.display()
            )));
        }

        info!("Building container image: {}", ctx.image_tag());
        self.engine.build(source_dir, ctx.image_tag()).await
    }

    /// Push the attempt's image and wait until the registry lists it
    ///
    /// The registry is polled at most `settings.attempts` times with
    /// `settings.interval` between polls. A transient poll failure counts as
    /// a miss; any other failure ends the stage.
    pub async fn publish(
        &self,
        ctx: &DeploymentContext,
        cancel: &CancellationToken,
    ) -> Result<PublishedImage> {
        self.auth.configure_auth(ctx.registry_location()).await?;

        info!("Pushing image to Artifact Registry: {}", ctx.image_tag());
        self.engine.push(ctx.image_tag()).await?;

        let repository_path = ctx.repository_path();
        let attempts = self.settings.attempts;

        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            match self
                .registry
                .list_images(&repository_path, ctx.unique_id())
                .await
            {
                Ok(images) => {
                    if let Some(image) = images.into_iter().next() {
                        info!(
                            attempt,
                            uri = %image.uri,
                            "Image verified in Artifact Registry"
                        );
                        return Ok(PublishedImage {
                            image_tag: ctx.image_tag().to_string(),
                            uri: image.uri,
                            attempts: attempt,
                        });
                    }
                    debug!(attempt, attempts, "Image not listed yet");
                }
                Err(e) if e.is_transient() => {
                    warn!(attempt, attempts, "Registry poll failed: {}", e);
                }
                Err(e) => {
                    error!("Failed to verify image: {}", e);
                    return Err(e);
                }
            }

            if attempt < attempts {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    _ = tokio::time::sleep(self.settings.interval) => {}
                }
            }
        }

        error!(
            "Image {} not visible after {} attempts",
            ctx.image_tag(),
            attempts
        );
        Err(Error::PublishUnverified {
            image_tag: ctx.image_tag().to_string(),
            attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockAuth, MockEngine, MockRegistry, Visibility};
    use deploy_common::NamingConfig;
    use std::time::Duration;

    fn ctx() -> DeploymentContext {
        DeploymentContext::for_attempt("a@b.com", "20240101-000000-abcdefgh", &NamingConfig::default())
            .unwrap()
    }

    fn fast() -> PublishSettings {
        PublishSettings {
            attempts: 3,
            interval: Duration::from_millis(1),
        }
    }

    fn publisher(registry: Arc<MockRegistry>, engine: Arc<MockEngine>) -> ImagePublisher {
        ImagePublisher::new(engine, registry, Arc::new(MockAuth::new()), fast())
    }

    /// Registry holding the attempt's repository and an engine pushing into it
    fn wired(registry: MockRegistry) -> (Arc<MockRegistry>, Arc<MockEngine>) {
        let registry = Arc::new(registry.with_repository(&ctx().repository_path()));
        let engine = Arc::new(MockEngine::publishing_to(registry.clone()));
        (registry, engine)
    }

    #[tokio::test]
    async fn test_visible_on_second_poll() {
        let (registry, engine) = wired(MockRegistry::new().with_visibility(Visibility::OnPoll(2)));

        let image = publisher(registry.clone(), engine.clone())
            .publish(&ctx(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(image.attempts, 2);
        assert_eq!(registry.list_calls(), 2);
        assert_eq!(engine.pushes(), vec![ctx().image_tag().to_string()]);
    }

    #[tokio::test]
    async fn test_never_visible_is_unverified() {
        let (registry, engine) = wired(MockRegistry::new().with_visibility(Visibility::Never));

        let err = publisher(registry.clone(), engine)
            .publish(&ctx(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::PublishUnverified { attempts: 3, .. }));
        assert_eq!(registry.list_calls(), 3);
    }

    #[tokio::test]
    async fn test_transient_poll_counts_as_miss() {
        let (registry, engine) = wired(MockRegistry::new().with_transient_polls(2));

        let image = publisher(registry.clone(), engine)
            .publish(&ctx(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(image.attempts, 3);
    }

    #[tokio::test]
    async fn test_image_without_push_never_listed() {
        let registry = Arc::new(MockRegistry::new().with_repository(&ctx().repository_path()));

        let err = publisher(registry.clone(), Arc::new(MockEngine::new()))
            .publish(&ctx(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::PublishUnverified { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_push_failure_skips_polling() {
        let registry = Arc::new(MockRegistry::new());

        let err = publisher(registry.clone(), Arc::new(MockEngine::new().failing_push()))
            .publish(&ctx(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Push(_)));
        assert_eq!(registry.list_calls(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_during_wait() {
        let (registry, engine) = wired(MockRegistry::new().with_visibility(Visibility::Never));
        let publisher = ImagePublisher::new(
            engine,
            registry.clone(),
            Arc::new(MockAuth::new()),
            PublishSettings {
                attempts: 3,
                interval: Duration::from_secs(60),
            },
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = publisher.publish(&ctx(), &cancel).await.unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert_eq!(registry.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_build_requires_source_dir() {
        let publisher = publisher(Arc::new(MockRegistry::new()), Arc::new(MockEngine::new()));

        let err = publisher
            .build(&ctx(), Path::new("/definitely/not/here"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));

        let dir = tempfile::tempdir().unwrap();
        publisher.build(&ctx(), dir.path()).await.unwrap();
    }
}
