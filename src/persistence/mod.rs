// Persistence gateway for workflow records

use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::workflow::types::{InstanceId, WorkflowInstance};

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Record {id} not found")]
    NotFound { id: InstanceId },

    #[error("Storage unavailable: {reason}")]
    Unavailable { reason: String },

    #[cfg(feature = "database")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Where committed records live
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn save(&self, instance: &WorkflowInstance) -> Result<(), PersistenceError>;

    async fn load(&self, id: &InstanceId) -> Result<WorkflowInstance, PersistenceError>;

    async fn list(&self) -> Result<Vec<InstanceId>, PersistenceError>;
}

#[derive(Debug, Default)]
pub struct InMemoryGateway {
    records: RwLock<HashMap<InstanceId, WorkflowInstance>>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistenceGateway for InMemoryGateway {
    async fn save(&self, instance: &WorkflowInstance) -> Result<(), PersistenceError> {
        self.records
            .write()
            .await
            .insert(instance.id, instance.clone());
        Ok(())
    }

    async fn load(&self, id: &InstanceId) -> Result<WorkflowInstance, PersistenceError> {
        self.records
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or(PersistenceError::NotFound { id: *id })
    }

    async fn list(&self) -> Result<Vec<InstanceId>, PersistenceError> {
        let mut ids: Vec<InstanceId> = self.records.read().await.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }
}

/// One JSON document per record under `<data_dir>/instances`
#[derive(Debug, Clone)]
pub struct FileSystemGateway {
    directory: PathBuf,
}

impl FileSystemGateway {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            directory: data_dir.as_ref().join("instances"),
        }
    }

    fn record_path(&self, id: &InstanceId) -> PathBuf {
        self.directory.join(format!("{id}.json"))
    }
}

#[async_trait]
impl PersistenceGateway for FileSystemGateway {
    async fn save(&self, instance: &WorkflowInstance) -> Result<(), PersistenceError> {
        fs::create_dir_all(&self.directory).await?;

        let path = self.record_path(&instance.id);
        let serialized = serde_json::to_string_pretty(instance)?;

        // Write to temporary file first, then rename (atomic operation)
        let temp_file = self
            .directory
            .join(format!("{}.{}.tmp", instance.id, rand::rng().random::<u32>()));
        fs::write(&temp_file, serialized).await?;
        if let Err(e) = fs::rename(&temp_file, &path).await {
            let _ = fs::remove_file(&temp_file).await;
            return Err(e.into());
        }

        debug!(
            instance_id = %instance.id,
            stage = instance.current_stage_index,
            file = ?path,
            "Record saved"
        );
        Ok(())
    }

    async fn load(&self, id: &InstanceId) -> Result<WorkflowInstance, PersistenceError> {
        let path = self.record_path(id);
        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PersistenceError::NotFound { id: *id })
            }
            Err(e) => return Err(e.into()),
        };
        let instance: WorkflowInstance = serde_json::from_str(&contents)?;
        info!(instance_id = %id, protocol = %instance.protocol, "Record loaded");
        Ok(instance)
    }

    async fn list(&self) -> Result<Vec<InstanceId>, PersistenceError> {
        let mut ids = Vec::new();
        let mut entries = match fs::read_dir(&self.directory).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<InstanceId>().ok())
            {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record() -> WorkflowInstance {
        WorkflowInstance::new("COM-001/2024", "Office supplies", "sector-7", 2024)
    }

    #[tokio::test]
    async fn test_filesystem_gateway_save_load() {
        let temp_dir = TempDir::new().unwrap();
        let gateway = FileSystemGateway::new(temp_dir.path());
        let instance = record();

        gateway.save(&instance).await.unwrap();
        let loaded = gateway.load(&instance.id).await.unwrap();
        assert_eq!(loaded, instance);
        assert_eq!(gateway.list().await.unwrap(), vec![instance.id]);
    }

    #[tokio::test]
    async fn test_filesystem_gateway_overwrites_and_leaves_no_temp_files() {
        let temp_dir = TempDir::new().unwrap();
        let gateway = FileSystemGateway::new(temp_dir.path());
        let mut instance = record();
        gateway.save(&instance).await.unwrap();

        instance.title = "Office supplies 2024".to_string();
        gateway.save(&instance).await.unwrap();

        assert_eq!(
            gateway.load(&instance.id).await.unwrap().title,
            "Office supplies 2024"
        );
        let leftovers = std::fs::read_dir(temp_dir.path().join("instances"))
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .path()
                    .extension()
                    .is_some_and(|ext| ext == "tmp")
            })
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_missing_record_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let gateway = FileSystemGateway::new(temp_dir.path());
        let id = InstanceId::new();
        assert!(matches!(
            gateway.load(&id).await,
            Err(PersistenceError::NotFound { id: missing }) if missing == id
        ));
        assert!(gateway.list().await.unwrap().is_empty());

        let memory = InMemoryGateway::new();
        assert!(matches!(
            memory.load(&id).await,
            Err(PersistenceError::NotFound { .. })
        ));
    }
}
