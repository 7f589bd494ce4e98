//! Shared plumbing for Google Cloud REST APIs
//!
//! Handles bearer auth, status-code classification and long-running
//! operation polling for the Artifact Registry and Cloud Run clients.

use std::time::Duration;

use deploy_common::{Error, Result};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

/// Long-running operation envelope
#[derive(Debug, Clone, Deserialize)]
pub struct Operation {
    pub name: String,

    #[serde(default)]
    pub done: bool,

    #[serde(default)]
    pub error: Option<RpcStatus>,

    #[serde(default)]
    pub response: Option<serde_json::Value>,
}

/// `google.rpc.Status`
#[derive(Debug, Clone, Deserialize)]
pub struct RpcStatus {
    #[serde(default)]
    pub code: i32,

    #[serde(default)]
    pub message: String,
}

/// Authenticated client for one REST API root, e.g. `https://run.googleapis.com/v2`
#[derive(Clone)]
pub struct GcpApi {
    base_url: String,
    access_token: String,
    client: reqwest::Client,
    operation_poll_interval: Duration,
    operation_timeout: Duration,
}

impl GcpApi {
    pub fn new(base_url: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
            client: reqwest::Client::new(),
            operation_poll_interval: Duration::from_secs(2),
            operation_timeout: Duration::from_secs(600),
        }
    }

    pub fn with_operation_polling(mut self, interval: Duration, timeout: Duration) -> Self {
        self.operation_poll_interval = interval;
        self.operation_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.client.get(self.url(path))
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.client.post(self.url(path))
    }

    /// Send with bearer auth and decode a JSON body
    pub async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| Error::transient(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http(status, &body));
        }

        response
            .json()
            .await
            .map_err(|e| Error::InvalidRemoteConfig(format!("unexpected response body: {}", e)))
    }

    /// Poll an operation until done and return its response payload
    pub async fn wait_operation(&self, mut operation: Operation) -> Result<serde_json::Value> {
        let deadline = Instant::now() + self.operation_timeout;

        while !operation.done {
            if Instant::now() >= deadline {
                return Err(Error::transient(format!(
                    "operation {} did not finish within {:?}",
                    operation.name, self.operation_timeout
                )));
            }

            tokio::time::sleep(self.operation_poll_interval).await;
            debug!(operation = %operation.name, "polling operation");
            operation = self.send_json(self.get(&operation.name)).await?;
        }

        if let Some(status) = operation.error {
            return Err(classify_rpc(&status));
        }

        Ok(operation.response.unwrap_or(serde_json::Value::Null))
    }
}

/// Request body wrapper for `:setIamPolicy`
#[derive(Debug, Serialize)]
pub struct SetIamPolicyRequest<'a, P: Serialize> {
    pub policy: &'a P,
}

/// Map an HTTP failure onto the error taxonomy
pub fn classify_http(status: StatusCode, body: &str) -> Error {
    let message = format!("{}: {}", status, body.trim());

    match status {
        StatusCode::NOT_FOUND => Error::NotFound(message),
        StatusCode::CONFLICT => Error::AlreadyExists(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::PermissionDenied(message),
        StatusCode::BAD_REQUEST => Error::InvalidArgument(message),
        StatusCode::PRECONDITION_FAILED => Error::InvalidRemoteConfig(message),
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            Error::TransientUnavailable(message)
        }
        s if s.is_server_error() => Error::TransientUnavailable(message),
        _ => Error::InvalidRemoteConfig(message),
    }
}

/// Map a `google.rpc.Code` onto the error taxonomy
pub fn classify_rpc(status: &RpcStatus) -> Error {
    let message = format!("code {}: {}", status.code, status.message);

    match status.code {
        3 | 11 => Error::InvalidArgument(message),
        5 => Error::NotFound(message),
        6 | 10 => Error::AlreadyExists(message),
        7 | 16 => Error::PermissionDenied(message),
        4 | 8 | 14 => Error::TransientUnavailable(message),
        _ => Error::InvalidRemoteConfig(message),
    }
}
