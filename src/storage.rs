// Durable key/value storage for the rate cache and the visitor's currency choice.
// Values are plain strings so any string store (browser-style local storage, a file,
// a shared key/value service) can back the cache.

use crate::config::CurrencyConfig;
use crate::currency::RateTable;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

pub trait RateStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
}

// In-process storage; survives for as long as the value is kept alive
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: DashMap<String, String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl RateStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.get(key).map(|value| value.clone()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Storage backed by a single JSON object file of string keys and values.
///
/// The whole file is read once on open and rewritten on every `set`, going
/// through a sibling temporary file and a rename so a crash mid-write leaves
/// the previous contents intact.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read_to_string(&path) {
            Ok(contents) if contents.trim().is_empty() => HashMap::new(),
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err.into()),
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &HashMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, serde_json::to_vec_pretty(entries)?)?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl RateStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock();
        let previous = entries.insert(key.to_string(), value.to_string());

        if let Err(err) = self.persist(&entries) {
            // Keep memory consistent with what is on disk
            match previous {
                Some(previous) => entries.insert(key.to_string(), previous),
                None => entries.remove(key),
            };
            return Err(err);
        }
        Ok(())
    }
}

/// A rate table snapshot paired with the time it was fetched.
///
/// Stored as two parallel keys: the JSON table under `rates_cache_key` and an
/// RFC 3339 timestamp under `rates_timestamp_key`.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRecord {
    pub rates: RateTable,
    pub fetched_at: DateTime<Utc>,
}

impl CacheRecord {
    pub fn new(rates: RateTable, fetched_at: DateTime<Utc>) -> Self {
        Self { rates, fetched_at }
    }

    // Anything missing, unreadable or malformed counts as no cache at all
    pub fn load(storage: &dyn RateStorage, config: &CurrencyConfig) -> Option<Self> {
        let rates_json = read_key(storage, &config.rates_cache_key)?;
        let timestamp = read_key(storage, &config.rates_timestamp_key)?;

        let rates = match serde_json::from_str::<RateTable>(&rates_json) {
            Ok(rates) => rates,
            Err(err) => {
                warn!(
                    key = %config.rates_cache_key,
                    error = %err,
                    "Discarding malformed cached rates"
                );
                return None;
            }
        };

        let fetched_at = match DateTime::parse_from_rfc3339(timestamp.trim()) {
            Ok(ts) => ts.with_timezone(&Utc),
            Err(err) => {
                warn!(
                    key = %config.rates_timestamp_key,
                    value = %timestamp,
                    error = %err,
                    "Discarding cached rates with malformed timestamp"
                );
                return None;
            }
        };

        Some(Self { rates, fetched_at })
    }

    pub fn save(
        &self,
        storage: &dyn RateStorage,
        config: &CurrencyConfig,
    ) -> Result<(), StorageError> {
        storage.set(&config.rates_cache_key, &serde_json::to_string(&self.rates)?)?;
        storage.set(&config.rates_timestamp_key, &self.fetched_at.to_rfc3339())?;
        Ok(())
    }

    // Negative when the record claims to come from the future
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.fetched_at
    }
}

pub fn load_selected_code(storage: &dyn RateStorage, config: &CurrencyConfig) -> Option<String> {
    read_key(storage, &config.selected_currency_key)
}

pub fn save_selected_code(
    storage: &dyn RateStorage,
    config: &CurrencyConfig,
    code: &str,
) -> Result<(), StorageError> {
    storage.set(&config.selected_currency_key, code)
}

fn read_key(storage: &dyn RateStorage, key: &str) -> Option<String> {
    match storage.get(key) {
        Ok(value) => value,
        Err(err) => {
            warn!(key, error = %err, "Failed to read from rate storage");
            None
        }
    }
}
