use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use crate::config::StageGateConfig;
use crate::persistence::{FileSystemGateway, PersistenceGateway};
use crate::sequence::{FileSequenceStore, SequenceStore};

#[cfg(feature = "database")]
use crate::config::DatabaseConfig;
#[cfg(feature = "database")]
use crate::persistence::PersistenceError;
#[cfg(feature = "database")]
use crate::sequence::{AllocationError, SequenceKey};
#[cfg(feature = "database")]
use crate::workflow::types::{InstanceId, WorkflowInstance};
#[cfg(feature = "database")]
use async_trait::async_trait;
#[cfg(feature = "database")]
use sqlx::{migrate::MigrateDatabase, sqlite::SqlitePoolOptions, Row, SqlitePool};

/// Record and counter storage selected from configuration
#[derive(Clone)]
pub struct StorageBackends {
    pub gateway: Arc<dyn PersistenceGateway>,
    pub sequences: Arc<dyn SequenceStore>,
}

impl StorageBackends {
    /// JSON files under `storage.data_dir`
    pub fn file_backed(config: &StageGateConfig) -> Self {
        Self {
            gateway: Arc::new(FileSystemGateway::new(&config.storage.data_dir)),
            sequences: Arc::new(FileSequenceStore::new(config.storage.sequence_file())),
        }
    }
}

#[cfg(feature = "database")]
/// SQLite store for both committed records and sequence counters
pub struct SqliteStore {
    pool: SqlitePool,
}

#[cfg(feature = "database")]
impl SqliteStore {
    /// Connect, creating the database file and running migrations if asked
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        if !sqlx::Sqlite::database_exists(&config.url).await? {
            info!("Creating database at {}", config.url);
            sqlx::Sqlite::create_database(&config.url).await?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect(&config.url)
            .await?;

        if config.auto_migrate {
            info!("Running database migrations...");
            sqlx::migrate!("./migrations").run(&pool).await?;
            info!("Database migrations completed");
        }

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close database connections gracefully
    pub async fn shutdown(&self) {
        info!("Shutting down database connections...");
        self.pool.close().await;
        info!("Database connections closed");
    }
}

#[cfg(feature = "database")]
#[async_trait]
impl PersistenceGateway for SqliteStore {
    async fn save(&self, instance: &WorkflowInstance) -> Result<(), PersistenceError> {
        let body = serde_json::to_string(instance)?;
        sqlx::query(
            r#"
            INSERT INTO workflow_instances (id, protocol, status, current_stage_index, body, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                protocol = excluded.protocol,
                status = excluded.status,
                current_stage_index = excluded.current_stage_index,
                body = excluded.body,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(instance.id.to_string())
        .bind(&instance.protocol)
        .bind(instance.status.as_str())
        .bind(instance.current_stage_index as i64)
        .bind(body)
        .bind(instance.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load(&self, id: &InstanceId) -> Result<WorkflowInstance, PersistenceError> {
        let row = sqlx::query("SELECT body FROM workflow_instances WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let body: String = row.get("body");
                Ok(serde_json::from_str(&body)?)
            }
            None => Err(PersistenceError::NotFound { id: *id }),
        }
    }

    async fn list(&self) -> Result<Vec<InstanceId>, PersistenceError> {
        let rows = sqlx::query("SELECT id FROM workflow_instances ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        let mut ids: Vec<InstanceId> = rows
            .iter()
            .filter_map(|row| row.get::<String, _>("id").parse().ok())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(feature = "database")]
fn unavailable(e: sqlx::Error) -> AllocationError {
    AllocationError::Unavailable {
        reason: e.to_string(),
    }
}

#[cfg(feature = "database")]
#[async_trait]
impl SequenceStore for SqliteStore {
    async fn peek(&self, key: &SequenceKey) -> Result<u64, AllocationError> {
        let value: Option<i64> =
            sqlx::query_scalar("SELECT value FROM sequences WHERE scope_id = ?1 AND year = ?2")
                .bind(&key.scope_id)
                .bind(key.year)
                .fetch_optional(&self.pool)
                .await
                .map_err(unavailable)?;
        Ok(value.unwrap_or(0) as u64)
    }

    async fn increment(&self, key: &SequenceKey) -> Result<u64, AllocationError> {
        // single statement, so concurrent callers never share a value
        let value: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO sequences (scope_id, year, value) VALUES (?1, ?2, 1)
            ON CONFLICT(scope_id, year) DO UPDATE SET value = value + 1
            RETURNING value
            "#,
        )
        .bind(&key.scope_id)
        .bind(key.year)
        .fetch_one(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(value as u64)
    }
}

#[cfg(feature = "database")]
/// Open the configured storage; SQLite when a database section is present
pub async fn open_backends(config: &StageGateConfig) -> Result<StorageBackends> {
    if let Some(db_config) = &config.database {
        info!("Initializing database at {}", db_config.url);
        let store = Arc::new(SqliteStore::connect(db_config).await?);
        return Ok(StorageBackends {
            gateway: store.clone(),
            sequences: store,
        });
    }

    info!("Database not configured, using file storage");
    Ok(StorageBackends::file_backed(config))
}

// Stub implementation for when database feature is not enabled
#[cfg(not(feature = "database"))]
pub async fn open_backends(config: &StageGateConfig) -> Result<StorageBackends> {
    if config.database.is_some() {
        tracing::warn!("Database feature not enabled, ignoring [database] and using file storage");
    } else {
        info!("Using file storage at {}", config.storage.data_dir.display());
    }
    Ok(StorageBackends::file_backed(config))
}

#[cfg(all(test, feature = "database"))]
mod tests {
    use super::*;
    use crate::workflow::types::RecordStatus;

    async fn memory_store() -> SqliteStore {
        SqliteStore::connect(&DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            auto_migrate: true,
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_sqlite_record_upsert_and_load() {
        let store = memory_store().await;
        let mut instance =
            WorkflowInstance::new("COM-001/2024", "Office supplies", "sector-7", 2024);
        store.save(&instance).await.unwrap();

        instance.status = RecordStatus::AwaitingApproval;
        store.save(&instance).await.unwrap();

        assert_eq!(store.load(&instance.id).await.unwrap(), instance);
        assert_eq!(store.list().await.unwrap(), vec![instance.id]);
        assert!(matches!(
            store.load(&InstanceId::new()).await,
            Err(PersistenceError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_sqlite_sequences_increment_per_key() {
        let store = memory_store().await;
        let key = SequenceKey::new("sector-7", 2024).unwrap();
        let other = SequenceKey::new("sector-7", 2025).unwrap();

        assert_eq!(store.peek(&key).await.unwrap(), 0);
        assert_eq!(store.increment(&key).await.unwrap(), 1);
        assert_eq!(store.increment(&key).await.unwrap(), 2);
        assert_eq!(store.increment(&other).await.unwrap(), 1);
        assert_eq!(store.peek(&key).await.unwrap(), 2);
    }
}
