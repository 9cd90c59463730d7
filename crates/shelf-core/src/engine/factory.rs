//! Engine construction

use std::path::{Path, PathBuf};

use super::{Engine, FileEngine, ShardedEngine};
use crate::error::{TableError, TableResult};
use crate::metadata::TableMetadata;
use crate::storage::file::DOCUMENT_EXTENSION;

/// Builds the engine for a table from its metadata
///
/// Every table has one storage stem, `<data_dir>/<table>`. A table whose
/// configuration carries a sharding policy gets a [`ShardedEngine`] using
/// the stem as its directory; any other table gets a [`FileEngine`] over
/// `<stem>.json`.
#[derive(Debug, Clone)]
pub struct EngineFactory {
    data_dir: PathBuf,
}

impl EngineFactory {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Storage stem of `table`
    pub fn engine_path(&self, table: &str) -> PathBuf {
        self.data_dir.join(table)
    }

    /// Open the engine described by `metadata`
    ///
    /// Fails for engine-only metadata, which carries no configuration.
    pub fn make_engine(&self, metadata: &TableMetadata) -> TableResult<Box<dyn Engine>> {
        let name = metadata.name();
        let config = metadata
            .config()
            .ok_or_else(|| TableError::ConfigurationConflict {
                table: name.to_string(),
                details: "metadata has no table configuration".to_string(),
            })?;
        let codec = metadata.id_codec().cloned();

        match &config.sharding {
            Some(sharding) => Ok(Box::new(ShardedEngine::open(
                name,
                metadata.engine_path(),
                sharding.clone(),
                codec,
                metadata.engine_metadata(),
            )?)),
            None => Ok(Box::new(FileEngine::open(
                name,
                file_path(metadata.engine_path()),
                codec,
                metadata.engine_metadata(),
            )?)),
        }
    }
}

/// `<stem>.json`, keeping any dots already in the stem
fn file_path(stem: &Path) -> PathBuf {
    let mut path = stem.as_os_str().to_owned();
    path.push(".");
    path.push(DOCUMENT_EXTENSION);
    PathBuf::from(path)
}
