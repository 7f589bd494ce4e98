//! Configuration management for the Deploy API
//!
//! Loads configuration from environment variables with sensible defaults.

use anyhow::{Context, Result};
use deploy_common::credential::MAX_TOKEN_TTL;
use deploy_common::NamingConfig;
use deploy_pipeline::{InvokerPolicy, PipelineConfig, PublishSettings, ServiceSettings};
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration
#[derive(Clone)]
pub struct Config {
    /// API server host
    pub api_host: String,

    /// API server port
    pub api_port: u16,

    /// Redis connection URL for deployment records
    pub redis_url: String,

    /// Run against in-memory collaborators instead of Google Cloud
    pub mock_mode: bool,

    pub gcp_project_id: Option<String>,

    /// OAuth access token for the Artifact Registry and Cloud Run APIs
    pub gcp_access_token: Option<String>,

    pub region: String,

    /// Application source with its Dockerfile
    pub app_source_dir: PathBuf,

    pub jwt_secret: String,

    pub token_ttl_minutes: u64,

    pub publish_poll_attempts: u32,

    pub publish_poll_interval_secs: u64,

    /// Serverless VPC connector attached in `region`
    pub vpc_connector: Option<String>,

    /// Grant `allUsers` the invoker role
    pub allow_unauthenticated: bool,

    /// Invoker members used when unauthenticated access is off
    pub invoker_members: Vec<String>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("api_host", &self.api_host)
            .field("api_port", &self.api_port)
            .field("redis_url", &self.redis_url)
            .field("mock_mode", &self.mock_mode)
            .field("gcp_project_id", &self.gcp_project_id)
            .field("region", &self.region)
            .field("app_source_dir", &self.app_source_dir)
            .field("token_ttl_minutes", &self.token_ttl_minutes)
            .field("publish_poll_attempts", &self.publish_poll_attempts)
            .field("publish_poll_interval_secs", &self.publish_poll_interval_secs)
            .field("vpc_connector", &self.vpc_connector)
            .field("allow_unauthenticated", &self.allow_unauthenticated)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists (for local development)
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let optional = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let config = Config {
            api_host: var("API_HOST", "0.0.0.0"),
            api_port: parse(&var("API_PORT", "8080"), "API_PORT")?,
            redis_url: var("REDIS_URL", "redis://127.0.0.1:6379"),
            mock_mode: parse_bool(&var("MOCK_MODE", "false"), "MOCK_MODE")?,
            gcp_project_id: optional("GCP_PROJECT_ID"),
            gcp_access_token: optional("GCP_ACCESS_TOKEN"),
            region: var("DEPLOY_REGION", "us-central1"),
            app_source_dir: var("APP_SOURCE_DIR", "./app").into(),
            jwt_secret: var("JWT_SECRET", ""),
            token_ttl_minutes: parse(&var("TOKEN_TTL_MINUTES", "60"), "TOKEN_TTL_MINUTES")?,
            publish_poll_attempts: parse(
                &var("PUBLISH_POLL_ATTEMPTS", "3"),
                "PUBLISH_POLL_ATTEMPTS",
            )?,
            publish_poll_interval_secs: parse(
                &var("PUBLISH_POLL_INTERVAL_SECS", "10"),
                "PUBLISH_POLL_INTERVAL_SECS",
            )?,
            vpc_connector: optional("VPC_CONNECTOR"),
            allow_unauthenticated: parse_bool(
                &var("ALLOW_UNAUTHENTICATED", "true"),
                "ALLOW_UNAUTHENTICATED",
            )?,
            invoker_members: var("INVOKER_MEMBERS", "")
                .split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(String::from)
                .collect(),
        };

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.api_port == 0 {
            anyhow::bail!("API_PORT must be greater than 0");
        }

        if self.jwt_secret.is_empty() {
            anyhow::bail!("JWT_SECRET must be set");
        }

        if self.token_ttl_minutes == 0 {
            anyhow::bail!("TOKEN_TTL_MINUTES must be greater than 0");
        }

        let max_ttl_minutes = MAX_TOKEN_TTL.as_secs() / 60;
        if self.token_ttl_minutes > max_ttl_minutes {
            anyhow::bail!("TOKEN_TTL_MINUTES must not exceed {}", max_ttl_minutes);
        }

        if self.publish_poll_attempts == 0 {
            anyhow::bail!("PUBLISH_POLL_ATTEMPTS must be greater than 0");
        }

        if !self.mock_mode {
            if self.gcp_project_id.is_none() {
                anyhow::bail!("GCP_PROJECT_ID must be set unless MOCK_MODE is enabled");
            }
            if self.gcp_access_token.is_none() {
                anyhow::bail!("GCP_ACCESS_TOKEN must be set unless MOCK_MODE is enabled");
            }
        }

        Ok(())
    }

    /// Get the API server address
    pub fn api_address(&self) -> String {
        format!("{}:{}", self.api_host, self.api_port)
    }

    /// Pipeline settings derived from this configuration
    pub fn pipeline_config(&self) -> PipelineConfig {
        let naming = NamingConfig {
            project_id: self
                .gcp_project_id
                .clone()
                .unwrap_or_else(|| NamingConfig::default().project_id),
            region: self.region.clone(),
            ..NamingConfig::default()
        };

        let mut service = ServiceSettings::default();
        if let Some(connector) = &self.vpc_connector {
            service
                .vpc_connectors
                .insert(self.region.clone(), connector.clone());
        }
        service.invoker = if self.allow_unauthenticated {
            InvokerPolicy::Public
        } else {
            InvokerPolicy::Members(self.invoker_members.clone())
        };

        PipelineConfig {
            naming,
            source_dir: self.app_source_dir.clone(),
            publish: PublishSettings {
                attempts: self.publish_poll_attempts,
                interval: Duration::from_secs(self.publish_poll_interval_secs),
            },
            service,
            token_ttl: Duration::from_secs(self.token_ttl_minutes.saturating_mul(60)),
            signing_secret: self.jwt_secret.clone(),
        }
    }
}

fn parse<T>(raw: &str, key: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse()
        .with_context(|| format!("Invalid {}: {}", key, raw))
}

fn parse_bool(raw: &str, key: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => anyhow::bail!("Invalid {}: {}", key, raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_config_defaults() {
        let config = load(&[("JWT_SECRET", "s"), ("MOCK_MODE", "true")]).unwrap();

        assert_eq!(config.api_host, "0.0.0.0");
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.redis_url, "redis://127.0.0.1:6379");
        assert_eq!(config.region, "us-central1");
        assert_eq!(config.app_source_dir, PathBuf::from("./app"));
        assert_eq!(config.token_ttl_minutes, 60);
        assert_eq!(config.publish_poll_attempts, 3);
        assert_eq!(config.publish_poll_interval_secs, 10);
        assert!(config.allow_unauthenticated);
        assert!(config.vpc_connector.is_none());
    }

    #[test]
    fn test_api_address() {
        let config = load(&[
            ("JWT_SECRET", "s"),
            ("MOCK_MODE", "true"),
            ("API_HOST", "127.0.0.1"),
            ("API_PORT", "9000"),
        ])
        .unwrap();

        assert_eq!(config.api_address(), "127.0.0.1:9000");
    }

    #[test]
    fn test_validate_invalid_port() {
        let result = load(&[("JWT_SECRET", "s"), ("MOCK_MODE", "true"), ("API_PORT", "0")]);

        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("API_PORT must be greater than 0"));
    }

    #[test]
    fn test_missing_secret_rejected() {
        let err = load(&[("MOCK_MODE", "true")]).unwrap_err();
        assert!(err.to_string().contains("JWT_SECRET"));
    }

    #[test]
    fn test_gcp_settings_required_outside_mock_mode() {
        let err = load(&[("JWT_SECRET", "s")]).unwrap_err();
        assert!(err.to_string().contains("GCP_PROJECT_ID"));

        let err = load(&[("JWT_SECRET", "s"), ("GCP_PROJECT_ID", "p")]).unwrap_err();
        assert!(err.to_string().contains("GCP_ACCESS_TOKEN"));

        load(&[
            ("JWT_SECRET", "s"),
            ("GCP_PROJECT_ID", "p"),
            ("GCP_ACCESS_TOKEN", "t"),
        ])
        .unwrap();
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let err = load(&[
            ("JWT_SECRET", "s"),
            ("MOCK_MODE", "true"),
            ("PUBLISH_POLL_ATTEMPTS", "0"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("PUBLISH_POLL_ATTEMPTS"));
    }

    #[test]
    fn test_token_ttl_upper_bound() {
        let err = load(&[
            ("JWT_SECRET", "s"),
            ("MOCK_MODE", "true"),
            ("TOKEN_TTL_MINUTES", "18446744073709551615"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("TOKEN_TTL_MINUTES"));

        let config = load(&[
            ("JWT_SECRET", "s"),
            ("MOCK_MODE", "true"),
            ("TOKEN_TTL_MINUTES", "525600"),
        ])
        .unwrap();
        assert_eq!(config.pipeline_config().token_ttl, MAX_TOKEN_TTL);
    }

    #[test]
    fn test_bad_number_reports_variable() {
        let err = load(&[
            ("JWT_SECRET", "s"),
            ("MOCK_MODE", "true"),
            ("TOKEN_TTL_MINUTES", "soon"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("TOKEN_TTL_MINUTES"));
    }

    #[test]
    fn test_pipeline_config() {
        let config = load(&[
            ("JWT_SECRET", "s"),
            ("GCP_PROJECT_ID", "demo"),
            ("GCP_ACCESS_TOKEN", "t"),
            ("DEPLOY_REGION", "europe-west1"),
            ("TOKEN_TTL_MINUTES", "15"),
            ("VPC_CONNECTOR", "projects/demo/locations/europe-west1/connectors/c"),
            ("ALLOW_UNAUTHENTICATED", "false"),
            ("INVOKER_MEMBERS", "serviceAccount:gw@demo.iam, user:ops@demo.dev"),
        ])
        .unwrap();

        let pipeline = config.pipeline_config();
        assert_eq!(pipeline.naming.project_id, "demo");
        assert_eq!(pipeline.naming.region, "europe-west1");
        assert_eq!(pipeline.token_ttl, Duration::from_secs(900));
        assert!(pipeline.service.connector_for("europe-west1").is_some());
        assert_eq!(
            pipeline.service.invoker,
            InvokerPolicy::Members(vec![
                "serviceAccount:gw@demo.iam".to_string(),
                "user:ops@demo.dev".to_string(),
            ])
        );
    }

    #[test]
    fn test_debug_hides_secrets() {
        let config = load(&[
            ("JWT_SECRET", "jwt-secret-value"),
            ("GCP_PROJECT_ID", "p"),
            ("GCP_ACCESS_TOKEN", "access-token-value"),
        ])
        .unwrap();

        let debug = format!("{:?}", config);
        assert!(!debug.contains("jwt-secret-value"));
        assert!(!debug.contains("access-token-value"));
    }
}
