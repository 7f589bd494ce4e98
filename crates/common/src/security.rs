//! Secrets injected into a deployed workload

use std::collections::BTreeMap;
use std::fmt;

use rand::RngCore;

/// Per-deployment security material
///
/// The workload receives its client id, a freshly generated API key and the
/// token signing secret so it can validate inbound bearer tokens itself.
#[derive(Clone)]
pub struct SecurityContext {
    client_id: String,
    api_key: String,
    signing_secret: String,
}

impl fmt::Debug for SecurityContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityContext")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl SecurityContext {
    /// Create a context with a new random API key
    pub fn new(client_id: impl Into<String>, signing_secret: impl Into<String>) -> Self {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);

        Self {
            client_id: client_id.into(),
            api_key: hex::encode(key),
            signing_secret: signing_secret.into(),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Environment variables for the workload container
    pub fn env_vars(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("CLIENT_ID".to_string(), self.client_id.clone()),
            ("API_KEY".to_string(), self.api_key.clone()),
            ("JWT_SECRET".to_string(), self.signing_secret.clone()),
        ])
    }
}
