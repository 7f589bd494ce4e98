use std::fmt;

use thiserror::Error;

/// Failure taxonomy shared by every deployment stage.
#[derive(Error, Debug)]
pub enum Error {
    /// Bad caller input. Never retried.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Remote resource is missing. Drives get-or-create, never surfaced as a final failure.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Remote resource already exists. Resolves create races in get-or-create.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid remote configuration: {0}")]
    InvalidRemoteConfig(String),

    /// Network or backend hiccup.
    #[error("Transient backend failure: {0}")]
    TransientUnavailable(String),

    /// The push succeeded but the registry never listed the tag within the poll budget.
    #[error("Image {image_tag} not visible after {attempts} verification attempts")]
    PublishUnverified { image_tag: String, attempts: u32 },

    /// The service exists and is running, but its access policy was not applied.
    #[error("Service {service_name} created but access policy binding failed: {cause}")]
    PolicyBindingFailed {
        service_name: String,
        cause: Box<Error>,
    },

    #[error("Deployment already recorded for service: {0}")]
    StorageConflict(String),

    #[error("Image build failed: {0}")]
    Build(String),

    #[error("Image push failed: {0}")]
    Push(String),

    #[error("Command `{program}` exited with {status}: {stderr}")]
    Command {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error("Deployment cancelled")]
    Cancelled,
}

impl Error {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::TransientUnavailable(msg.into())
    }

    /// Short machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidArgument(_) => "invalid_argument",
            Error::NotFound(_) => "not_found",
            Error::AlreadyExists(_) => "already_exists",
            Error::PermissionDenied(_) => "permission_denied",
            Error::InvalidRemoteConfig(_) => "invalid_remote_config",
            Error::TransientUnavailable(_) => "transient_unavailable",
            Error::PublishUnverified { .. } => "publish_unverified",
            Error::PolicyBindingFailed { .. } => "policy_binding_failed",
            Error::StorageConflict(_) => "storage_conflict",
            Error::Build(_) => "build_failed",
            Error::Push(_) => "push_failed",
            Error::Command { .. } => "command_failed",
            Error::Storage(_) => "storage_error",
            Error::JsonSerialization(_) => "serialization_error",
            Error::Cancelled => "cancelled",
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TransientUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline step in which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Identity,
    Repository,
    Build,
    Publish,
    Deploy,
    Credential,
    Record,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Identity => "identity",
            Stage::Repository => "repository",
            Stage::Build => "build",
            Stage::Publish => "publish",
            Stage::Deploy => "deploy",
            Stage::Credential => "credential",
            Stage::Record => "record",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The first failure of a pipeline run, tagged with the stage that produced it.
#[derive(Error, Debug)]
#[error("deployment failed at {stage} stage: {source}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub source: Error,
}

impl PipelineError {
    pub fn new(stage: Stage, source: Error) -> Self {
        Self { stage, source }
    }

    /// The underlying cause, exactly as the failing stage reported it.
    pub fn cause(&self) -> &Error {
        &self.source
    }
}
