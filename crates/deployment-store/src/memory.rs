//! In-memory deployment store
//!
//! Data is lost when the process exits. Used by tests and mock mode.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use deploy_common::{DeploymentRecord, Error, Result};

use crate::store::DeploymentStore;

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, DeploymentRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DeploymentStore for MemoryStore {
    async fn insert(&self, record: &DeploymentRecord) -> Result<()> {
        let mut records = self
            .records
            .write()
            .map_err(|_| Error::storage("lock poisoned"))?;

        if records.contains_key(&record.service_name) {
            return Err(Error::StorageConflict(record.service_name.clone()));
        }

        records.insert(record.service_name.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, service_name: &str) -> Result<Option<DeploymentRecord>> {
        let records = self
            .records
            .read()
            .map_err(|_| Error::storage("lock poisoned"))?;

        Ok(records.get(service_name).cloned())
    }

    async fn list_by_client(&self, client_id: &str) -> Result<Vec<DeploymentRecord>> {
        let records = self
            .records
            .read()
            .map_err(|_| Error::storage("lock poisoned"))?;

        let mut results: Vec<_> = records
            .values()
            .filter(|r| r.client_id == client_id)
            .cloned()
            .collect();

        results.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(results)
    }
}
