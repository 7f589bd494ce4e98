//! Local command execution
//!
//! External CLIs (docker, gcloud) are reached through `CommandRunner` so a
//! native implementation or a test double can stand in for them.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use deploy_common::{Error, Result};
use tokio::process::Command;
use tracing::debug;

use super::RegistryAuth;

/// A command to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
    pub current_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            current_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Working directory of the child process
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Render as a shell-like line for logs
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Turn a non-zero exit into `Error::Command`
    pub fn check(self, spec: &CommandSpec) -> Result<Self> {
        if self.success() {
            return Ok(self);
        }

        Err(Error::Command {
            program: spec.program.clone(),
            status: self
                .code
                .map(|c| format!("exit code {}", c))
                .unwrap_or_else(|| "signal".to_string()),
            stderr: self.stderr.trim().to_string(),
        })
    }
}

/// Runs local commands
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion and capture output. A non-zero exit is not an error here.
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

/// `CommandRunner` backed by `tokio::process`
#[derive(Debug, Default, Clone)]
pub struct TokioCommandRunner;

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        debug!(command = %spec.display(), "running command");

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(spec.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &spec.current_dir {
            cmd.current_dir(dir);
        }

        let output = cmd.output().await.map_err(|e| Error::Command {
            program: spec.program.clone(),
            status: "spawn failed".to_string(),
            stderr: e.to_string(),
        })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Registry auth through `gcloud auth configure-docker`
pub struct GcloudDockerAuth {
    runner: Arc<dyn CommandRunner>,
    gcloud_bin: String,
}

impl GcloudDockerAuth {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            gcloud_bin: "gcloud".to_string(),
        }
    }

    pub fn with_binary(mut self, gcloud_bin: impl Into<String>) -> Self {
        self.gcloud_bin = gcloud_bin.into();
        self
    }
}

#[async_trait]
impl RegistryAuth for GcloudDockerAuth {
    async fn configure_auth(&self, registry_host: &str) -> Result<()> {
        let spec = CommandSpec::new(&self.gcloud_bin)
            .arg("auth")
            .arg("configure-docker")
            .arg(registry_host)
            .arg("--quiet");

        self.runner.run(&spec).await?.check(&spec)?;

        debug!(host = %registry_host, "configured docker authentication");
        Ok(())
    }
}
