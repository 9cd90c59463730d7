//! JSON document files
//!
//! Reads and writes whole JSON documents by logical name under a base
//! directory. Writes are atomic (write to temp file, then rename) so a crash
//! never leaves a partially-written document behind.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde_json::Value;

use super::error::{StorageError, StorageResult};

/// Extension of every document file
pub const DOCUMENT_EXTENSION: &str = "json";

/// A directory of JSON documents addressed by name
#[derive(Debug, Clone)]
pub struct DocumentFiles {
    base: PathBuf,
}

impl DocumentFiles {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base
    }

    /// Full path of the document called `name`
    pub fn path(&self, name: &str) -> PathBuf {
        self.base.join(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path(name).exists()
    }

    /// Read and parse a document
    pub fn read(&self, name: &str) -> StorageResult<Value> {
        read_document(&self.path(name))
    }

    /// Read a document, returning `None` if it does not exist
    pub fn read_optional(&self, name: &str) -> StorageResult<Option<Value>> {
        match self.read(name) {
            Ok(doc) => Ok(Some(doc)),
            Err(StorageError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Serialize and atomically write a document
    pub fn write(&self, name: &str, doc: &Value) -> StorageResult<()> {
        write_document(&self.path(name), doc)
    }

    /// Delete a document if it exists
    pub fn remove(&self, name: &str) -> StorageResult<()> {
        let path = self.path(name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::from_io(e, path)),
        }
    }

    /// Names (without extension) of every document in the directory, sorted
    ///
    /// A missing directory has no documents.
    pub fn list(&self) -> StorageResult<Vec<String>> {
        let entries = match fs::read_dir(&self.base) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::from_read(e, self.base.clone())),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::from_read(e, self.base.clone()))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if path.extension().map_or(false, |ext| ext == DOCUMENT_EXTENSION) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Total size in bytes of the documents in the directory
    pub fn size_on_disk(&self) -> u64 {
        self.list()
            .unwrap_or_default()
            .iter()
            .filter_map(|name| fs::metadata(self.path(&document_name(name))).ok())
            .map(|m| m.len())
            .sum()
    }
}

impl fmt::Display for DocumentFiles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base.display())
    }
}

/// File name of the document with stem `stem`
pub fn document_name(stem: &str) -> String {
    format!("{}.{}", stem, DOCUMENT_EXTENSION)
}

/// Read and parse a JSON document at `path`
pub fn read_document(path: &Path) -> StorageResult<Value> {
    let bytes = fs::read(path).map_err(|e| StorageError::from_read(e, path.to_path_buf()))?;
    serde_json::from_slice(&bytes).map_err(|e| StorageError::InvalidFormat {
        path: path.to_path_buf(),
        details: e.to_string(),
    })
}

/// Serialize `doc` and write it atomically to `path`
pub fn write_document(path: &Path, doc: &Value) -> StorageResult<()> {
    let bytes = serde_json::to_vec_pretty(doc).map_err(|e| StorageError::InvalidFormat {
        path: path.to_path_buf(),
        details: e.to_string(),
    })?;
    atomic_write(path, &bytes)
}

/// Write data to a file atomically
///
/// 1. Write to a temporary file in the same directory
/// 2. Sync the file to disk
/// 3. Rename the temp file to the target path
pub fn atomic_write(path: &Path, data: &[u8]) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StorageError::CreateDirectory {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    // Same directory as the target so the rename stays on one filesystem
    let temp_path = path.with_extension("tmp");

    let mut file =
        File::create(&temp_path).map_err(|e| StorageError::from_io(e, temp_path.clone()))?;
    file.write_all(data)
        .map_err(|e| StorageError::from_io(e, temp_path.clone()))?;
    file.sync_all()
        .map_err(|e| StorageError::from_io(e, temp_path.clone()))?;

    fs::rename(&temp_path, path).map_err(|e| StorageError::AtomicWriteFailed {
        from: temp_path.clone(),
        to: path.to_path_buf(),
        source: e,
    })?;

    Ok(())
}
