use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use thiserror::Error;

pub const TIMER_STATE_KEY: &str = "timerData";
pub const USER_PROFILE_KEY: &str = "userData";
pub const BACKGROUND_TASK_KEY: &str = "backgroundTask";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unable to access store file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON in store file {} at line {line}, column {column}", path.display())]
    Corrupt {
        path: PathBuf,
        line: usize,
        column: usize,
    },
    #[error("store file {} does not hold a JSON object", path.display())]
    NotAnObject { path: PathBuf },
    #[error("value stored under '{key}' is malformed: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("value for '{key}' could not be serialized: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("store lock poisoned")]
    Poisoned,
}

/// Durable string-keyed storage of JSON values.
///
/// Every call is a complete operation: implementations must not cache values
/// across calls, because another process may change the backing data between
/// two reads.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;
    fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
    fn clear(&self) -> Result<(), StoreError>;
}

pub fn get_typed<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    let Some(value) = store.get(key)? else {
        return Ok(None);
    };
    serde_json::from_value(value)
        .map(Some)
        .map_err(|source| StoreError::Decode {
            key: key.to_string(),
            source,
        })
}

pub fn set_typed<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    let encoded = serde_json::to_value(value).map_err(|source| StoreError::Encode {
        key: key.to_string(),
        source,
    })?;
    store.set(key, encoded)
}

/// All keys live in one JSON object on disk. Writes go to a uniquely named
/// sibling temp file that is renamed over the store, so a concurrent reader
/// in another process sees either the old or the new object, never a partial
/// one.
///
/// The mutex only serializes callers inside one process. Two processes
/// updating at once each rewrite the whole object, and the later rename wins.
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<Map<String, Value>, StoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Map::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        if content.trim().is_empty() {
            return Ok(Map::new());
        }

        let parsed = serde_json::from_str::<Value>(&content).map_err(|err| StoreError::Corrupt {
            path: self.path.clone(),
            line: err.line(),
            column: err.column(),
        })?;
        match parsed {
            Value::Object(map) => Ok(map),
            _ => Err(StoreError::NotAnObject {
                path: self.path.clone(),
            }),
        }
    }

    fn write_map(&self, map: Map<String, Value>) -> Result<(), StoreError> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let io_error = |source| StoreError::Io {
            path: parent.to_path_buf(),
            source,
        };
        fs::create_dir_all(parent).map_err(io_error)?;

        let text = serde_json::to_string_pretty(&Value::Object(map)).map_err(|source| {
            StoreError::Encode {
                key: "*".to_string(),
                source,
            }
        })?;
        let mut staging = NamedTempFile::new_in(parent).map_err(io_error)?;
        staging
            .write_all(format!("{text}\n").as_bytes())
            .map_err(io_error)?;
        staging
            .persist(&self.path)
            .map_err(|err| StoreError::Io {
                path: self.path.clone(),
                source: err.error,
            })?;
        Ok(())
    }

    fn update<F>(&self, mutate: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Map<String, Value>) -> bool,
    {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        let mut map = self.read_map()?;
        if mutate(&mut map) {
            self.write_map(map)?;
        }
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        let mut map = self.read_map()?;
        Ok(map.remove(key))
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.update(|map| {
            map.insert(key.to_string(), value);
            true
        })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.update(|map| map.remove(key).is_some())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

pub fn default_store_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fleishig")
        .join("store.json")
}
