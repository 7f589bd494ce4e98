//! Storage backend contract

use async_trait::async_trait;
use deploy_common::{DeploymentRecord, Result};

/// Backend holding deployment records keyed by service name
///
/// `insert` must be atomic: either the record and its client index entry are
/// both written, or nothing is. A second insert for the same service name
/// fails with `StorageConflict` and leaves the stored record untouched.
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Insert a new record. Never upserts.
    async fn insert(&self, record: &DeploymentRecord) -> Result<()>;

    /// Get a record by service name
    async fn get(&self, service_name: &str) -> Result<Option<DeploymentRecord>>;

    /// All records of a client, newest first
    async fn list_by_client(&self, client_id: &str) -> Result<Vec<DeploymentRecord>>;
}
