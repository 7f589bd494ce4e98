//! Pipeline configuration
//!
//! Everything the pipeline needs is passed in explicitly at construction.
//! `Default` values mirror a single-region Cloud Run setup.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use deploy_common::credential::DEFAULT_TOKEN_TTL;
use deploy_common::NamingConfig;

use crate::clients::AccessPolicy;

/// Image visibility polling after a push
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishSettings {
    /// How many times the registry is queried for the pushed tag
    pub attempts: u32,

    /// Wait between two queries
    pub interval: Duration,
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            attempts: 3,
            interval: Duration::from_secs(10),
        }
    }
}

/// Who may invoke a deployed service
///
/// `Public` grants `roles/run.invoker` to `allUsers`. The transport stays open
/// and the workload authenticates callers itself with the issued bearer
/// tokens. Deployments that must not be reachable anonymously have to use
/// `Members`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum InvokerPolicy {
    #[default]
    Public,
    Members(Vec<String>),
}

impl InvokerPolicy {
    pub fn to_policy(&self) -> AccessPolicy {
        match self {
            InvokerPolicy::Public => AccessPolicy::invoker(vec!["allUsers".to_string()]),
            InvokerPolicy::Members(members) => AccessPolicy::invoker(members.clone()),
        }
    }
}

/// Shape of the managed service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSettings {
    pub container_port: u16,
    pub cpu_limit: String,
    pub memory_limit: String,

    /// Serverless VPC connector per region
    pub vpc_connectors: HashMap<String, String>,

    /// Egress mode used when a connector is attached
    pub vpc_egress: String,

    pub invoker: InvokerPolicy,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            container_port: 8080,
            cpu_limit: "1".to_string(),
            memory_limit: "512Mi".to_string(),
            vpc_connectors: HashMap::new(),
            vpc_egress: "PRIVATE_RANGES_ONLY".to_string(),
            invoker: InvokerPolicy::Public,
        }
    }
}

impl ServiceSettings {
    pub fn connector_for(&self, region: &str) -> Option<&str> {
        self.vpc_connectors.get(region).map(String::as_str)
    }
}

/// Complete pipeline configuration
#[derive(Clone)]
pub struct PipelineConfig {
    pub naming: NamingConfig,

    /// Directory holding the application source and its Dockerfile
    pub source_dir: PathBuf,

    pub publish: PublishSettings,

    pub service: ServiceSettings,

    /// Lifetime of issued access tokens
    pub token_ttl: Duration,

    /// Secret that signs access tokens. Also injected into the workload.
    pub signing_secret: String,
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("naming", &self.naming)
            .field("source_dir", &self.source_dir)
            .field("publish", &self.publish)
            .field("service", &self.service)
            .field("token_ttl", &self.token_ttl)
            .finish_non_exhaustive()
    }
}

impl PipelineConfig {
    pub fn new(signing_secret: impl Into<String>) -> Self {
        Self {
            naming: NamingConfig::default(),
            source_dir: PathBuf::from("./app"),
            publish: PublishSettings::default(),
            service: ServiceSettings::default(),
            token_ttl: DEFAULT_TOKEN_TTL,
            signing_secret: signing_secret.into(),
        }
    }
}
