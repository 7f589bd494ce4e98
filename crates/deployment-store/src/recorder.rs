//! Deployment recorder
//!
//! The only component that reads or writes deployment records.

use std::sync::Arc;

use deploy_common::{DeploymentRecord, DeploymentResult, Result};
use tracing::{error, info};

use crate::store::DeploymentStore;

/// Persists the outcome of successful pipeline runs
#[derive(Clone)]
pub struct DeploymentRecorder {
    store: Arc<dyn DeploymentStore>,
}

impl DeploymentRecorder {
    pub fn new(store: Arc<dyn DeploymentStore>) -> Self {
        Self { store }
    }

    /// Insert exactly one record for `result.service_name`
    ///
    /// Fails with `StorageConflict` if the service name was already recorded.
    pub async fn record(
        &self,
        result: &DeploymentResult,
        client_id: &str,
    ) -> Result<DeploymentRecord> {
        let record = DeploymentRecord::from_result(result, client_id);

        if let Err(e) = self.store.insert(&record).await {
            error!(
                service = %record.service_name,
                error = %e,
                "Error saving deployment record"
            );
            return Err(e);
        }

        info!(service = %record.service_name, client = %client_id, "Deployment recorded");
        Ok(record)
    }

    /// Look up a record by service name
    pub async fn find(&self, service_name: &str) -> Result<Option<DeploymentRecord>> {
        self.store.get(service_name).await
    }

    /// All records of a client, newest first
    pub async fn list_for_client(&self, client_id: &str) -> Result<Vec<DeploymentRecord>> {
        self.store.list_by_client(client_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use chrono::Utc;
    use deploy_common::{DeploymentStatus, Error};

    fn result(service_name: &str) -> DeploymentResult {
        DeploymentResult {
            service_name: service_name.to_string(),
            rpc_endpoint: "https://svc.run.app".to_string(),
            ws_endpoint: "wss://svc.run.app".to_string(),
            status: DeploymentStatus::Running,
            access_token: "token".to_string(),
            deployment_time: Utc::now(),
            client_id: "a@b.com".to_string(),
            unique_id: "20240101-000000-abcdefgh".to_string(),
            image_tag: "tag".to_string(),
        }
    }

    #[tokio::test]
    async fn test_record_persists_running_row() {
        let recorder = DeploymentRecorder::new(Arc::new(MemoryStore::new()));

        let record = recorder.record(&result("secure-app-1"), "a@b.com").await.unwrap();
        assert_eq!(record.status, DeploymentStatus::Running);

        let found = recorder.find("secure-app-1").await.unwrap();
        assert_eq!(found, Some(record));
    }

    #[tokio::test]
    async fn test_second_record_conflicts_and_keeps_first() {
        let recorder = DeploymentRecorder::new(Arc::new(MemoryStore::new()));

        let first = recorder.record(&result("secure-app-1"), "a@b.com").await.unwrap();

        let mut again = result("secure-app-1");
        again.access_token = "replacement".to_string();
        let err = recorder.record(&again, "a@b.com").await.unwrap_err();
        assert!(matches!(err, Error::StorageConflict(_)));

        let stored = recorder.find("secure-app-1").await.unwrap().unwrap();
        assert_eq!(stored, first);
        assert_eq!(stored.access_token, "token");
        assert_eq!(recorder.list_for_client("a@b.com").await.unwrap().len(), 1);
    }
}
