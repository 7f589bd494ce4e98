//! Artifact Registry REST client (v1)

use async_trait::async_trait;
use deploy_common::Result;
use serde::Deserialize;
use tracing::{debug, info};

use super::gcp::{GcpApi, Operation};
use super::{ArtifactRegistry, ImageRef, Repository, RepositorySpec};

pub const DEFAULT_ENDPOINT: &str = "https://artifactregistry.googleapis.com/v1";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListDockerImagesResponse {
    #[serde(default)]
    docker_images: Vec<DockerImage>,

    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DockerImage {
    #[serde(default)]
    uri: String,

    #[serde(default)]
    tags: Vec<String>,
}

/// Client for repositories and Docker images in Artifact Registry
pub struct ArtifactRegistryClient {
    api: GcpApi,
}

impl ArtifactRegistryClient {
    pub fn new(api: GcpApi) -> Self {
        Self { api }
    }
}

#[async_trait]
impl ArtifactRegistry for ArtifactRegistryClient {
    async fn get_repository(&self, path: &str) -> Result<Repository> {
        debug!("Fetching repository: {}", path);
        self.api.send_json(self.api.get(path)).await
    }

    async fn create_repository(
        &self,
        parent: &str,
        repository_id: &str,
        spec: &RepositorySpec,
    ) -> Result<Repository> {
        info!("Creating repository {} under {}", repository_id, parent);

        let request = self
            .api
            .post(&format!("{}/repositories", parent))
            .query(&[("repositoryId", repository_id)])
            .json(spec);

        let operation: Operation = self.api.send_json(request).await?;
        let response = self.api.wait_operation(operation).await?;

        match serde_json::from_value::<Repository>(response) {
            Ok(repository) => Ok(repository),
            // Some operations finish without echoing the resource
            Err(_) => {
                self.get_repository(&format!("{}/repositories/{}", parent, repository_id))
                    .await
            }
        }
    }

    async fn list_images(&self, repository_path: &str, tag_filter: &str) -> Result<Vec<ImageRef>> {
        let mut images = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .api
                .get(&format!("{}/dockerImages", repository_path))
                .query(&[("pageSize", "100")]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let page: ListDockerImagesResponse = self.api.send_json(request).await?;

            images.extend(
                page.docker_images
                    .into_iter()
                    .filter(|image| image.tags.iter().any(|t| t == tag_filter))
                    .map(|image| ImageRef {
                        uri: image.uri,
                        tags: image.tags,
                    }),
            );

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        debug!(
            "Found {} image(s) tagged {} in {}",
            images.len(),
            tag_filter,
            repository_path
        );
        Ok(images)
    }
}
