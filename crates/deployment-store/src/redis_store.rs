//! Redis storage for deployment records

use async_trait::async_trait;
use deploy_common::{DeploymentRecord, Error, Result};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError, Script};
use tracing::{debug, info};

use crate::store::DeploymentStore;

/// Writes the record and its client index entry in one atomic step.
/// Returns 0 without touching anything if the service name is taken.
const INSERT_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return 0
end
redis.call('SET', KEYS[1], ARGV[1])
redis.call('SADD', KEYS[2], ARGV[2])
return 1
";

/// Redis-backed deployment store
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    insert_script: Script,
}

impl RedisStore {
    /// Connect to Redis
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| Error::storage(format!("Failed to create Redis client: {}", e)))?;

        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| Error::storage(format!("Failed to connect to Redis: {}", e)))?;

        info!("Connected to Redis at {}", redis_url);

        Ok(Self {
            conn,
            insert_script: Script::new(INSERT_SCRIPT),
        })
    }

    /// Remove a record. Used by tests to clean up after themselves.
    pub async fn delete(&self, service_name: &str) -> Result<bool> {
        let mut conn = self.conn.clone();

        let Some(record) = self.get(service_name).await? else {
            return Ok(false);
        };

        let deleted: bool = conn
            .del(record_key(service_name))
            .await
            .map_err(redis_error)?;
        let _: () = conn
            .srem(client_key(&record.client_id), service_name)
            .await
            .map_err(redis_error)?;

        Ok(deleted)
    }
}

#[async_trait]
impl DeploymentStore for RedisStore {
    async fn insert(&self, record: &DeploymentRecord) -> Result<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(record)?;

        let inserted: i32 = self
            .insert_script
            .key(record_key(&record.service_name))
            .key(client_key(&record.client_id))
            .arg(json)
            .arg(&record.service_name)
            .invoke_async(&mut conn)
            .await
            .map_err(redis_error)?;

        if inserted == 0 {
            debug!("Deployment already recorded: {}", record.service_name);
            return Err(Error::StorageConflict(record.service_name.clone()));
        }

        info!(
            "Recorded deployment {} for client: {}",
            record.service_name, record.client_id
        );
        Ok(())
    }

    async fn get(&self, service_name: &str) -> Result<Option<DeploymentRecord>> {
        let mut conn = self.conn.clone();

        let json: Option<String> = conn.get(record_key(service_name)).await.map_err(redis_error)?;

        match json {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    async fn list_by_client(&self, client_id: &str) -> Result<Vec<DeploymentRecord>> {
        let mut conn = self.conn.clone();

        let service_names: Vec<String> = conn
            .smembers(client_key(client_id))
            .await
            .map_err(redis_error)?;

        let mut records = Vec::new();
        for service_name in service_names {
            if let Some(record) = self.get(&service_name).await? {
                records.push(record);
            }
        }

        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(records)
    }
}

fn record_key(service_name: &str) -> String {
    format!("deployment:{}", service_name)
}

fn client_key(client_id: &str) -> String {
    format!("deployments:client:{}", client_id)
}

fn redis_error(err: RedisError) -> Error {
    if err.is_io_error() || err.is_timeout() || err.is_connection_dropped() {
        Error::transient(format!("Redis unavailable: {}", err))
    } else {
        Error::storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use deploy_common::DeploymentStatus;

    async fn get_test_storage() -> RedisStore {
        RedisStore::new("redis://127.0.0.1:6379/15")
            .await
            .expect("Failed to connect to test Redis")
    }

    fn record(service_name: &str, client_id: &str) -> DeploymentRecord {
        DeploymentRecord {
            service_name: service_name.to_string(),
            client_id: client_id.to_string(),
            image_tag: format!("us-central1-docker.pkg.dev/p/r/secure-app:{}", service_name),
            status: DeploymentStatus::Running,
            rpc_endpoint: format!("https://{}.run.app", service_name),
            ws_endpoint: format!("wss://{}.run.app", service_name),
            access_token: "token".to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    #[ignore] // Requires Redis to be running
    async fn test_insert_and_get_record() {
        let storage = get_test_storage().await;
        let record = record("secure-app-redis-1", "redis@example.com");

        storage.insert(&record).await.unwrap();

        let retrieved = storage
            .get("secure-app-redis-1")
            .await
            .unwrap()
            .expect("Record not found");
        assert_eq!(retrieved, record);

        let listed = storage.list_by_client("redis@example.com").await.unwrap();
        assert_eq!(listed.len(), 1);

        storage.delete("secure-app-redis-1").await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Redis to be running
    async fn test_duplicate_insert_conflicts() {
        let storage = get_test_storage().await;
        let original = record("secure-app-redis-2", "redis@example.com");

        storage.insert(&original).await.unwrap();

        let mut duplicate = record("secure-app-redis-2", "other@example.com");
        duplicate.access_token = "different".to_string();

        let err = storage.insert(&duplicate).await.unwrap_err();
        assert!(matches!(err, Error::StorageConflict(_)));

        // Original untouched, and the other client gained no index entry
        let retrieved = storage.get("secure-app-redis-2").await.unwrap().unwrap();
        assert_eq!(retrieved, original);
        assert!(storage
            .list_by_client("other@example.com")
            .await
            .unwrap()
            .is_empty());

        storage.delete("secure-app-redis-2").await.unwrap();
    }
}
