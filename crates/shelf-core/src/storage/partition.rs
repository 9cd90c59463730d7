//! Partition files
//!
//! A partition is one JSON file mapping row ids to row documents. Its
//! contents are loaded on first access and every successful mutation is
//! written straight back to disk.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde_json::{Map, Value};
use tracing::debug;

use super::error::{StorageError, StorageResult};
use super::file::{atomic_write, read_document};

/// Rows of a partition, keyed by the stored id string
pub type Rows = Map<String, Value>;

/// One partition file and its lazily loaded rows
#[derive(Debug)]
pub struct Partition {
    name: String,
    path: PathBuf,
    rows: Mutex<Option<Rows>>,
}

impl Partition {
    /// Handle to an existing (or not yet written) partition file
    ///
    /// Nothing is read until the rows are first accessed.
    pub fn open(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            rows: Mutex::new(None),
        }
    }

    /// Create a new, empty partition file
    pub fn create(name: impl Into<String>, path: impl Into<PathBuf>) -> StorageResult<Self> {
        let partition = Self::open(name, path);
        atomic_write(&partition.path, b"{}")?;
        *partition.lock() = Some(Rows::new());
        debug!("Created partition {:?}", partition.path);
        Ok(partition)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the rows have been read from disk
    pub fn is_loaded(&self) -> bool {
        self.lock().is_some()
    }

    /// Run `f` over the rows, loading them first if needed
    pub fn read<R>(&self, f: impl FnOnce(&Rows) -> R) -> StorageResult<R> {
        let mut guard = self.lock();
        let rows = self.loaded(&mut guard)?;
        Ok(f(rows))
    }

    /// Run `f` over the rows mutably and persist the result if it succeeds
    ///
    /// If writing fails the cached rows are dropped, so the next access
    /// reloads what is actually on disk.
    pub fn update<R, E>(&self, f: impl FnOnce(&mut Rows) -> Result<R, E>) -> Result<R, E>
    where
        E: From<StorageError>,
    {
        let mut guard = self.lock();
        let rows = self.loaded(&mut guard)?;
        let result = f(rows)?;

        if let Err(e) = self.persist(rows) {
            *guard = None;
            return Err(e.into());
        }
        Ok(result)
    }

    /// Number of rows, loading the partition if needed
    pub fn len(&self) -> StorageResult<usize> {
        self.read(|rows| rows.len())
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        self.read(|rows| rows.is_empty())
    }

    fn lock(&self) -> MutexGuard<'_, Option<Rows>> {
        // A panic while holding the lock leaves the cache in an unknown
        // state; drop it and reload from disk.
        match self.rows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                let mut guard = poisoned.into_inner();
                *guard = None;
                guard
            }
        }
    }

    fn loaded<'a>(&self, guard: &'a mut Option<Rows>) -> StorageResult<&'a mut Rows> {
        if guard.is_none() {
            *guard = Some(self.load()?);
        }
        Ok(guard.get_or_insert_with(Rows::new))
    }

    fn load(&self) -> StorageResult<Rows> {
        if !self.path.exists() {
            return Ok(Rows::new());
        }

        match read_document(&self.path)? {
            Value::Object(rows) => {
                debug!("Loaded {} rows from {:?}", rows.len(), self.path);
                Ok(rows)
            }
            other => Err(StorageError::InvalidFormat {
                path: self.path.clone(),
                details: format!("expected an object of rows, found {}", kind_of(&other)),
            }),
        }
    }

    fn persist(&self, rows: &Rows) -> StorageResult<()> {
        let bytes = serde_json::to_vec_pretty(rows).map_err(|e| StorageError::InvalidFormat {
            path: self.path.clone(),
            details: e.to_string(),
        })?;
        atomic_write(&self.path, &bytes)
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
