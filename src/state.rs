use crate::block::BlockRecord;
use crate::error::AppError;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

/// Durable single-table storage, keyed by coin slug.
pub trait StateBackend: Send + Sync {
    fn load(&self) -> Result<Vec<BlockRecord>, AppError>;
    fn save(&self, records: &[BlockRecord]) -> Result<(), AppError>;
}

/// Stores every record in one JSON object `{ "<coin>": { ...record } }`.
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl StateBackend for JsonFileBackend {
    fn load(&self) -> Result<Vec<BlockRecord>, AppError> {
        if !self.path.exists() {
            return Ok(vec![]);
        }

        let content = fs::read_to_string(&self.path).map_err(|e| {
            AppError::Persistence(format!("Failed to read {}: {e}", self.path.display()))
        })?;
        let table: BTreeMap<String, BlockRecord> = serde_json::from_str(&content).map_err(|e| {
            AppError::Persistence(format!("Corrupt state file {}: {e}", self.path.display()))
        })?;

        // The key is authoritative
        Ok(table
            .into_iter()
            .map(|(coin, mut record)| {
                record.coin = coin;
                record
            })
            .collect())
    }

    fn save(&self, records: &[BlockRecord]) -> Result<(), AppError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    AppError::Persistence(format!("Failed to create {}: {e}", parent.display()))
                })?;
            }
        }

        let table: BTreeMap<&str, &BlockRecord> =
            records.iter().map(|r| (r.coin.as_str(), r)).collect();
        let json = serde_json::to_string_pretty(&table).map_err(|e| {
            AppError::Persistence(format!("Failed to serialize block state: {e}"))
        })?;

        // Write-then-rename so a crash mid-write leaves the previous table intact
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, json).map_err(|e| {
            AppError::Persistence(format!("Failed to write {}: {e}", tmp_path.display()))
        })?;
        fs::rename(&tmp_path, &self.path).map_err(|e| {
            AppError::Persistence(format!("Failed to replace {}: {e}", self.path.display()))
        })?;
        Ok(())
    }
}

/// Last observed block per coin, shared by every watcher task.
pub struct BlockStateStore {
    records: Mutex<HashMap<String, BlockRecord>>,
    // Serialises whole-index flushes so two snapshots never interleave on disk
    persist_lock: Mutex<()>,
    backend: Box<dyn StateBackend>,
}

impl BlockStateStore {
    pub fn new(backend: Box<dyn StateBackend>) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            persist_lock: Mutex::new(()),
            backend,
        }
    }

    /// Stored record for `coin`, or a placeholder if the coin has never been seen.
    pub fn get(&self, coin: &str) -> BlockRecord {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records
            .get(coin)
            .cloned()
            .unwrap_or_else(|| BlockRecord::placeholder(coin))
    }

    pub fn put(&self, coin: &str, record: BlockRecord) {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.insert(coin.to_string(), record);
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replaces the in-memory index with the backend's contents.
    ///
    /// A failed read is logged and leaves the index empty; startup continues.
    pub fn load_all(&self) {
        let loaded = match self.backend.load() {
            Ok(records) => records,
            Err(e) => {
                tracing::error!("Failed to load block state, starting empty: {e}");
                Vec::new()
            }
        };

        let count = loaded.len();
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.clear();
        for record in loaded {
            records.insert(record.coin.clone(), record);
        }
        drop(records);

        tracing::info!("Loaded {count} block records");
    }

    /// Best-effort flush of the full index. Returns whether the write succeeded.
    pub fn persist(&self) -> bool {
        let _guard = self.persist_lock.lock().unwrap_or_else(|e| e.into_inner());

        let snapshot: Vec<BlockRecord> = {
            let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
            records.values().cloned().collect()
        };

        match self.backend.save(&snapshot) {
            Ok(()) => {
                tracing::debug!("Persisted {} block records", snapshot.len());
                true
            }
            Err(e) => {
                tracing::error!("Failed to persist block state: {e}");
                false
            }
        }
    }
}
