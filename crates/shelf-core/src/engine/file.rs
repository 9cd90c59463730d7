//! Single-file engine

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::debug;

use super::{check_kind, Engine, EngineStats, PartitionRows, Row, KIND_FIELD};
use crate::error::TableResult;
use crate::id::IdCodec;
use crate::query::Query;
use crate::storage::Partition;

pub const KIND: &str = "file";

/// Stores a whole table in one partition file
#[derive(Debug)]
pub struct FileEngine {
    table: String,
    codec: Option<IdCodec>,
    partition: Partition,
}

impl FileEngine {
    /// Open the table stored at `path`
    ///
    /// The file is created on the first write.
    pub fn open(
        table: impl Into<String>,
        path: impl Into<PathBuf>,
        codec: Option<IdCodec>,
        fragment: &Map<String, Value>,
    ) -> TableResult<Self> {
        let table = table.into();
        check_kind(&table, fragment, KIND)?;

        let path = path.into();
        debug!("Opening table '{}' from {:?}", table, path);
        Ok(Self {
            partition: Partition::open(table.clone(), path),
            table,
            codec,
        })
    }

    pub fn path(&self) -> &Path {
        self.partition.path()
    }

    fn rows(&self) -> PartitionRows<'_> {
        PartitionRows {
            table: &self.table,
            codec: self.codec.as_ref(),
        }
    }
}

impl Engine for FileEngine {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn insert_row(&self, id: &str, data: Value) -> TableResult<()> {
        self.rows().insert(&self.partition, id, data)
    }

    fn read_row(&self, id: &str) -> TableResult<Option<Value>> {
        self.rows().read(&self.partition, id)
    }

    fn replace_row(&self, id: &str, data: Value) -> TableResult<()> {
        self.rows().replace(&self.partition, id, data)
    }

    fn upsert_row(&self, id: &str, data: Value) -> TableResult<bool> {
        self.rows().upsert(&self.partition, id, data)
    }

    fn delete_row(&self, id: &str) -> TableResult<()> {
        self.rows().delete(&self.partition, id)
    }

    fn delete_all(&self, query: &Query) -> TableResult<usize> {
        self.rows().delete_matching(&self.partition, query)
    }

    fn query(&self, query: &Query) -> TableResult<Vec<Row>> {
        self.rows().query(&self.partition, query)
    }

    fn save_fragment(&self, fragment: &mut Map<String, Value>) {
        fragment.insert(KIND_FIELD.to_string(), Value::String(KIND.to_string()));
    }

    fn stats(&self) -> TableResult<EngineStats> {
        let exists = self.partition.path().exists();
        let size_bytes = fs::metadata(self.partition.path())
            .map(|m| m.len())
            .unwrap_or(0);
        let rows = if exists { self.partition.len()? } else { 0 };

        Ok(EngineStats {
            kind: KIND.to_string(),
            partitions: usize::from(exists),
            rows,
            size_bytes,
        })
    }
}
