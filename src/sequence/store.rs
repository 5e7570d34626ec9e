use async_trait::async_trait;
use fd_lock::RwLock as FileLock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::debug;

use super::AllocationError;

/// Counter key: a scope (usually a sector) and a calendar year
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SequenceKey {
    pub scope_id: String,
    pub year: i32,
}

impl SequenceKey {
    pub fn new(scope_id: &str, year: i32) -> Result<Self, AllocationError> {
        let scope_id = scope_id.trim();
        if scope_id.is_empty() {
            return Err(AllocationError::InvalidScope {
                reason: "scope id is blank".to_string(),
            });
        }
        if scope_id.contains('/') {
            return Err(AllocationError::InvalidScope {
                reason: format!("scope id '{scope_id}' contains '/'"),
            });
        }
        Ok(Self {
            scope_id: scope_id.to_string(),
            year,
        })
    }

    fn storage_key(&self) -> String {
        format!("{}/{}", self.scope_id, self.year)
    }
}

impl std::fmt::Display for SequenceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.scope_id, self.year)
    }
}

/// Storage contract for sequence counters.
///
/// `increment` must be a single atomic step in the backing store: no two
/// callers for the same key may ever receive the same value.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait SequenceStore: Send + Sync {
    /// Current value, 0 for a key never incremented
    async fn peek(&self, key: &SequenceKey) -> Result<u64, AllocationError>;

    /// Increase the counter by one and return the new value
    async fn increment(&self, key: &SequenceKey) -> Result<u64, AllocationError>;
}

#[derive(Debug, Default)]
pub struct InMemorySequenceStore {
    counters: Mutex<BTreeMap<SequenceKey, u64>>,
}

impl InMemorySequenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a key at `value`, as if it had been incremented that many times
    pub async fn seed(&self, key: SequenceKey, value: u64) {
        self.counters.lock().await.insert(key, value);
    }
}

#[async_trait]
impl SequenceStore for InMemorySequenceStore {
    async fn peek(&self, key: &SequenceKey) -> Result<u64, AllocationError> {
        Ok(self.counters.lock().await.get(key).copied().unwrap_or(0))
    }

    async fn increment(&self, key: &SequenceKey) -> Result<u64, AllocationError> {
        let mut counters = self.counters.lock().await;
        let counter = counters.entry(key.clone()).or_insert(0);
        *counter = counter
            .checked_add(1)
            .ok_or_else(|| AllocationError::Exhausted { key: key.clone() })?;
        Ok(*counter)
    }
}

/// Counters kept in a JSON file. An exclusive lock on a sidecar `.lock` file
/// covers the whole read-modify-write, and each update lands through a temp
/// file renamed over the counters, so the file is never seen half written.
#[derive(Debug, Clone)]
pub struct FileSequenceStore {
    path: PathBuf,
}

type CounterFile = BTreeMap<String, u64>;

impl FileSequenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    fn open_lock(&self) -> Result<File, AllocationError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.lock_path())?)
    }

    /// A missing file means no counters yet. An existing file must parse;
    /// an empty one is reported as corrupt rather than restarting at zero.
    fn read_counters(&self) -> Result<CounterFile, AllocationError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(CounterFile::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&raw)?)
    }

    fn write_counters(&self, counters: &CounterFile) -> Result<(), AllocationError> {
        let serialized = serde_json::to_string_pretty(counters)?;
        let mut temp_name = self.path.as_os_str().to_owned();
        temp_name.push(format!(".{}.tmp", rand::rng().random::<u32>()));
        let temp_path = PathBuf::from(temp_name);

        let written = File::create(&temp_path)
            .and_then(|mut temp| {
                temp.write_all(serialized.as_bytes())?;
                temp.sync_all()
            })
            .and_then(|()| std::fs::rename(&temp_path, &self.path));
        if let Err(e) = written {
            let _ = std::fs::remove_file(&temp_path);
            return Err(e.into());
        }
        Ok(())
    }

    fn peek_blocking(&self, key: &SequenceKey) -> Result<u64, AllocationError> {
        let lock = FileLock::new(self.open_lock()?);
        let _guard = lock.read()?;
        let counters = self.read_counters()?;
        Ok(counters.get(&key.storage_key()).copied().unwrap_or(0))
    }

    fn increment_blocking(&self, key: &SequenceKey) -> Result<u64, AllocationError> {
        let mut lock = FileLock::new(self.open_lock()?);
        let _guard = lock.write()?;

        let mut counters = self.read_counters()?;
        let counter = counters.entry(key.storage_key()).or_insert(0);
        *counter = counter
            .checked_add(1)
            .ok_or_else(|| AllocationError::Exhausted { key: key.clone() })?;
        let value = *counter;

        self.write_counters(&counters)?;

        debug!(key = %key, value, file = ?self.path, "Sequence incremented");
        Ok(value)
    }
}

async fn run_blocking<T, F>(task: F) -> Result<T, AllocationError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, AllocationError> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| AllocationError::Unavailable {
            reason: format!("sequence worker failed: {e}"),
        })?
}

#[async_trait]
impl SequenceStore for FileSequenceStore {
    async fn peek(&self, key: &SequenceKey) -> Result<u64, AllocationError> {
        let store = self.clone();
        let key = key.clone();
        run_blocking(move || store.peek_blocking(&key)).await
    }

    async fn increment(&self, key: &SequenceKey) -> Result<u64, AllocationError> {
        let store = self.clone();
        let key = key.clone();
        run_blocking(move || store.increment_blocking(&key)).await
    }
}
