//! Docker CLI container engine

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use deploy_common::{Error, Result};
use tracing::info;

use super::command::{CommandRunner, CommandSpec};
use super::ContainerEngine;

/// Builds and pushes images with the `docker` binary
pub struct DockerCli {
    runner: Arc<dyn CommandRunner>,
    docker_bin: String,
}

impl DockerCli {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            docker_bin: "docker".to_string(),
        }
    }

    pub fn with_binary(mut self, docker_bin: impl Into<String>) -> Self {
        self.docker_bin = docker_bin.into();
        self
    }
}

#[async_trait]
impl ContainerEngine for DockerCli {
    async fn build(&self, path: &Path, tag: &str) -> Result<()> {
        info!("Building Docker image: {}", tag);

        let spec = CommandSpec::new(&self.docker_bin)
            .arg("build")
            .arg("--rm")
            .arg("-t")
            .arg(tag)
            .arg(".")
            .env("DOCKER_BUILDKIT", "1")
            .current_dir(path);

        let output = self.runner.run(&spec).await?;
        if !output.success() {
            return Err(Error::Build(output.stderr.trim().to_string()));
        }

        info!("Docker image build completed");
        Ok(())
    }

    async fn push(&self, tag: &str) -> Result<()> {
        info!("Pushing Docker image: {}", tag);

        let spec = CommandSpec::new(&self.docker_bin).arg("push").arg(tag);

        let output = self.runner.run(&spec).await?;
        if !output.success() {
            return Err(Error::Push(output.stderr.trim().to_string()));
        }

        info!("Docker image pushed successfully");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockCommandRunner;

    #[tokio::test]
    async fn test_build_command() {
        let runner = Arc::new(MockCommandRunner::default());
        let docker = DockerCli::new(runner.clone());

        docker
            .build(Path::new("/tmp/app"), "host/p/r/img:1")
            .await
            .unwrap();

        let calls = runner.calls();
        assert_eq!(calls[0].display(), "docker build --rm -t host/p/r/img:1 .");
        assert_eq!(calls[0].current_dir.as_deref(), Some(Path::new("/tmp/app")));
        assert!(calls[0]
            .envs
            .contains(&("DOCKER_BUILDKIT".to_string(), "1".to_string())));
    }

    #[tokio::test]
    async fn test_push_failure_is_push_error() {
        let runner = Arc::new(MockCommandRunner::failing(1, "denied: unauthorized"));
        let docker = DockerCli::new(runner);

        let err = docker.push("host/p/r/img:1").await.unwrap_err();
        assert!(matches!(err, Error::Push(msg) if msg.contains("unauthorized")));
    }

    #[tokio::test]
    async fn test_build_failure_is_build_error() {
        let runner = Arc::new(MockCommandRunner::failing(1, "no Dockerfile"));
        let docker = DockerCli::new(runner);

        let err = docker.build(Path::new("/tmp/app"), "tag").await.unwrap_err();
        assert!(matches!(err, Error::Build(_)));
    }
}
