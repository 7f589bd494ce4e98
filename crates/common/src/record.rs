//! Deployment result and persisted record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a recorded deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentStatus {
    /// Set at creation
    Running,
    /// Only set by external reconciliation
    Stopped,
    /// Only set by external reconciliation
    Failed,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Running => "RUNNING",
            DeploymentStatus::Stopped => "STOPPED",
            DeploymentStatus::Failed => "FAILED",
        }
    }
}

/// What a successful pipeline run hands back to its caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentResult {
    pub service_name: String,
    pub rpc_endpoint: String,
    pub ws_endpoint: String,
    pub status: DeploymentStatus,
    pub access_token: String,
    pub deployment_time: DateTime<Utc>,

    pub client_id: String,
    pub unique_id: String,
    pub image_tag: String,
}

/// Persisted deployment row, keyed by `service_name`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub service_name: String,
    pub client_id: String,
    pub image_tag: String,
    pub status: DeploymentStatus,
    pub rpc_endpoint: String,
    pub ws_endpoint: String,
    pub access_token: String,
    pub created_at: DateTime<Utc>,
}

impl DeploymentRecord {
    /// Create the row for a finished deployment, stamped now
    pub fn from_result(result: &DeploymentResult, client_id: &str) -> Self {
        Self {
            service_name: result.service_name.clone(),
            client_id: client_id.to_string(),
            image_tag: result.image_tag.clone(),
            status: DeploymentStatus::Running,
            rpc_endpoint: result.rpc_endpoint.clone(),
            ws_endpoint: result.ws_endpoint.clone(),
            access_token: result.access_token.clone(),
            created_at: Utc::now(),
        }
    }
}
