//! Persistent key-value store collaborator.
//!
//! Records are JSON object maps. A `set` merges the given keys into the
//! stored record as one write, so aggregate values (the whole vocabulary
//! list) are never torn.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tempfile::NamedTempFile;

use crate::error::StoreError;

pub type Record = Map<String, Value>;

pub trait KeyValueStore {
    /// Fetch the subset of `keys` that exist.
    fn get(&self, keys: &[&str]) -> Result<Record, StoreError>;
    /// Merge `record` into the store.
    fn set(&mut self, record: Record) -> Result<(), StoreError>;
}

fn pick(data: &Record, keys: &[&str]) -> Record {
    keys.iter()
        .filter_map(|k| data.get(*k).map(|v| (k.to_string(), v.clone())))
        .collect()
}

/// In-process store, used by tests and embedders without persistence.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    data: Record,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(data: Record) -> Self {
        Self { data }
    }

    pub fn snapshot(&self) -> &Record {
        &self.data
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, keys: &[&str]) -> Result<Record, StoreError> {
        Ok(pick(&self.data, keys))
    }

    fn set(&mut self, record: Record) -> Result<(), StoreError> {
        self.data.extend(record);
        Ok(())
    }
}

/// Whole-file JSON store with atomic replacement on every write.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    data: Record,
}

impl JsonFileStore {
    /// Open `path`, starting empty when the file does not exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Ok(Self {
                path,
                data: Record::new(),
            });
        }
        let contents = fs::read_to_string(&path)?;
        let data = if contents.trim().is_empty() {
            Record::new()
        } else {
            serde_json::from_str(&contents)?
        };
        Ok(Self { path, data })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, data: &Record) -> Result<(), StoreError> {
        let parent_dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent_dir)?;

        let temp_file = NamedTempFile::new_in(parent_dir)?;
        {
            let mut writer = BufWriter::new(temp_file.as_file());
            serde_json::to_writer_pretty(&mut writer, data)?;
            writer.flush()?;
        }
        temp_file
            .persist(&self.path)
            .map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, keys: &[&str]) -> Result<Record, StoreError> {
        Ok(pick(&self.data, keys))
    }

    fn set(&mut self, record: Record) -> Result<(), StoreError> {
        let mut next = self.data.clone();
        next.extend(record);
        self.persist(&next)?;
        self.data = next;
        Ok(())
    }
}
