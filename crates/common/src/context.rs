//! Per-attempt naming context
//!
//! Every deployment attempt gets a `unique_id` made of a one-second timestamp
//! and a random lowercase alphanumeric suffix. Uniqueness is probabilistic:
//! two attempts in the same second collide only if they draw the same suffix
//! (36^8 possibilities).

use chrono::{DateTime, Utc};
use rand::distributions::Uniform;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Length of the random suffix in a unique id.
pub const SUFFIX_LEN: usize = 8;

const SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Static naming inputs shared by all attempts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingConfig {
    /// Cloud project that owns the registry and services
    pub project_id: String,

    /// Deployment region
    pub region: String,

    /// Image name inside the repository
    pub image_name: String,

    /// Prefix for repository and service names
    pub name_prefix: String,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            project_id: "local-project".to_string(),
            region: "us-central1".to_string(),
            image_name: "secure-app".to_string(),
            name_prefix: "secure-app".to_string(),
        }
    }
}

/// Immutable identity of one deployment attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentContext {
    client_id: String,
    unique_id: String,
    project_id: String,
    region: String,
    repository_name: String,
    registry_location: String,
    image_name: String,
    service_name: String,
    image_tag: String,
}

impl DeploymentContext {
    /// Create the context for a fresh attempt
    pub fn generate(client_id: &str, naming: &NamingConfig) -> Result<Self> {
        Self::for_attempt(client_id, &new_unique_id(Utc::now()), naming)
    }

    /// Rebuild the context of a known attempt
    pub fn for_attempt(client_id: &str, unique_id: &str, naming: &NamingConfig) -> Result<Self> {
        let client_id = client_id.trim();
        if client_id.is_empty() {
            return Err(Error::invalid_argument("client_id must not be empty"));
        }
        if unique_id.trim().is_empty() {
            return Err(Error::invalid_argument("unique_id must not be empty"));
        }

        let local_part = sanitize_name(client_id.split('@').next().unwrap_or_default());
        if local_part.is_empty() {
            return Err(Error::invalid_argument(format!(
                "client_id has no usable name component: {}",
                client_id
            )));
        }

        let repository_name = format!("{}-{}", naming.name_prefix, local_part);
        let registry_location = format!("{}-docker.pkg.dev", naming.region);
        let service_name = format!("{}-{}", naming.name_prefix, unique_id);
        let image_tag = format!(
            "{}/{}/{}/{}:{}",
            registry_location, naming.project_id, repository_name, naming.image_name, unique_id
        );

        Ok(Self {
            client_id: client_id.to_string(),
            unique_id: unique_id.to_string(),
            project_id: naming.project_id.clone(),
            region: naming.region.clone(),
            repository_name,
            registry_location,
            image_name: naming.image_name.clone(),
            service_name,
            image_tag,
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn repository_name(&self) -> &str {
        &self.repository_name
    }

    /// Registry host, e.g. `us-central1-docker.pkg.dev`
    pub fn registry_location(&self) -> &str {
        &self.registry_location
    }

    pub fn image_name(&self) -> &str {
        &self.image_name
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Fully qualified image reference for this attempt
    pub fn image_tag(&self) -> &str {
        &self.image_tag
    }

    /// Resource path of the repository, `projects/{p}/locations/{r}/repositories/{name}`
    pub fn repository_path(&self) -> String {
        format!(
            "projects/{}/locations/{}/repositories/{}",
            self.project_id, self.region, self.repository_name
        )
    }
}

/// Build a unique id from a timestamp and a fresh random suffix
pub fn new_unique_id(now: DateTime<Utc>) -> String {
    let mut rng = rand::thread_rng();
    let dist = Uniform::from(0..SUFFIX_ALPHABET.len());
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| SUFFIX_ALPHABET[rng.sample(dist)] as char)
        .collect();

    format!("{}-{}", now.format("%Y%m%d-%H%M%S"), suffix)
}

/// Registry and service ids accept lowercase letters, digits and dashes only.
fn sanitize_name(raw: &str) -> String {
    let mapped: String = raw
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();

    mapped.trim_matches('-').to_string()
}
