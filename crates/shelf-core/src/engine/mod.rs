//! Table storage engines
//!
//! An engine owns the partition files of one table and serves row reads,
//! writes and queries. Two engines exist:
//!
//! - [`FileEngine`]: the whole table in one partition file
//! - [`ShardedEngine`]: one partition file per key interval, routed through
//!   a [`ShardRangeIndex`]
//!
//! Which one a table uses is decided by [`EngineFactory`] from the table
//! configuration and never changes afterwards.
//!
//! Engines keep their own bookkeeping in the metadata's engine fragment.
//! Both record their `kind`, which is checked when the table is reopened.

mod factory;
mod file;
mod range;
mod sharded;

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{TableError, TableResult};
use crate::id::IdCodec;
use crate::query::{FieldPath, FieldSource, Query};
use crate::storage::{Partition, Rows};

pub use factory::EngineFactory;
pub use file::FileEngine;
pub use range::{Interval, ShardRangeIndex};
pub use sharded::ShardedEngine;

/// Engine fragment field naming the engine kind
pub const KIND_FIELD: &str = "kind";

/// A stored row: its id string and its document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row {
    pub id: String,
    pub data: Value,
}

impl Row {
    pub fn new(id: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }
}

/// Size of an engine's storage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub kind: String,
    pub partitions: usize,
    pub rows: usize,
    pub size_bytes: u64,
}

/// Storage for the rows of one table
///
/// Rows are keyed by the string form of their id. All methods may be called
/// concurrently.
pub trait Engine: Send + Sync + fmt::Debug {
    /// Engine kind recorded in the metadata fragment
    fn kind(&self) -> &'static str;

    /// Store a new row; fails with `DuplicateKey` if the id exists
    fn insert_row(&self, id: &str, data: Value) -> TableResult<()>;

    /// Fetch a row's document
    fn read_row(&self, id: &str) -> TableResult<Option<Value>>;

    /// Replace an existing row; fails with `KeyNotFound` if it does not exist
    fn replace_row(&self, id: &str, data: Value) -> TableResult<()>;

    /// Insert or replace a row, returning `true` if it was inserted
    fn upsert_row(&self, id: &str, data: Value) -> TableResult<bool>;

    /// Delete a row; fails with `KeyNotFound` if it does not exist
    fn delete_row(&self, id: &str) -> TableResult<()>;

    /// Delete every row matching `query`, returning how many were removed
    fn delete_all(&self, query: &Query) -> TableResult<usize>;

    /// Every row matching `query`, in no particular order
    fn query(&self, query: &Query) -> TableResult<Vec<Row>>;

    /// Write the engine's bookkeeping into its metadata fragment
    fn save_fragment(&self, fragment: &mut Map<String, Value>);

    fn stats(&self) -> TableResult<EngineStats>;
}

/// A row as seen by a query
///
/// `FieldPath::Id` resolves to the id decoded through the table's id type,
/// so numeric ids compare as numbers.
pub struct RowView<'a> {
    pub id: &'a str,
    pub data: &'a Value,
    pub codec: Option<&'a IdCodec>,
}

impl FieldSource for RowView<'_> {
    fn field(&self, path: &FieldPath) -> Option<Value> {
        match path {
            FieldPath::Id => match self.codec {
                Some(codec) => codec.decode(self.id).ok().map(|id| id.to_json()),
                None => Some(Value::String(self.id.to_string())),
            },
            FieldPath::Pointer(pointer) => self.data.pointer(pointer).cloned(),
        }
    }
}

/// Row operations shared by both engines, applied to a single partition
pub(crate) struct PartitionRows<'a> {
    pub table: &'a str,
    pub codec: Option<&'a IdCodec>,
}

impl PartitionRows<'_> {
    pub fn insert(&self, partition: &Partition, id: &str, data: Value) -> TableResult<()> {
        partition.update(|rows| {
            if rows.contains_key(id) {
                return Err(self.duplicate(id));
            }
            rows.insert(id.to_string(), data);
            Ok(())
        })
    }

    pub fn read(&self, partition: &Partition, id: &str) -> TableResult<Option<Value>> {
        Ok(partition.read(|rows| rows.get(id).cloned())?)
    }

    pub fn contains(&self, partition: &Partition, id: &str) -> TableResult<bool> {
        Ok(partition.read(|rows| rows.contains_key(id))?)
    }

    pub fn replace(&self, partition: &Partition, id: &str, data: Value) -> TableResult<()> {
        partition.update(|rows| match rows.get_mut(id) {
            Some(existing) => {
                *existing = data;
                Ok(())
            }
            None => Err(self.not_found(id)),
        })
    }

    pub fn upsert(&self, partition: &Partition, id: &str, data: Value) -> TableResult<bool> {
        partition.update(|rows| Ok::<_, TableError>(rows.insert(id.to_string(), data).is_none()))
    }

    pub fn delete(&self, partition: &Partition, id: &str) -> TableResult<()> {
        partition.update(|rows| match rows.remove(id) {
            Some(_) => Ok(()),
            None => Err(self.not_found(id)),
        })
    }

    /// Remove the row if present, without failing when it is absent
    pub fn remove(&self, partition: &Partition, id: &str) -> TableResult<bool> {
        if !self.contains(partition, id)? {
            return Ok(false);
        }
        partition.update(|rows| Ok::<_, TableError>(rows.remove(id).is_some()))
    }

    pub fn delete_matching(&self, partition: &Partition, query: &Query) -> TableResult<usize> {
        let matching = partition.read(|rows| self.matching_ids(rows, query))?;
        if matching.is_empty() {
            return Ok(0);
        }

        partition.update(|rows| {
            let removed = matching
                .iter()
                .filter(|id| rows.remove(id.as_str()).is_some())
                .count();
            Ok::<_, TableError>(removed)
        })
    }

    pub fn query(&self, partition: &Partition, query: &Query) -> TableResult<Vec<Row>> {
        Ok(partition.read(|rows| {
            rows.iter()
                .filter(|(id, data)| query.matches(&self.view(id, data)))
                .map(|(id, data)| Row::new(id.clone(), data.clone()))
                .collect()
        })?)
    }

    fn matching_ids(&self, rows: &Rows, query: &Query) -> Vec<String> {
        rows.iter()
            .filter(|(id, data)| query.matches(&self.view(id, data)))
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn view<'v>(&'v self, id: &'v str, data: &'v Value) -> RowView<'v> {
        RowView {
            id,
            data,
            codec: self.codec,
        }
    }

    pub fn duplicate(&self, id: &str) -> TableError {
        TableError::DuplicateKey {
            table: self.table.to_string(),
            id: id.to_string(),
        }
    }

    pub fn not_found(&self, id: &str) -> TableError {
        TableError::KeyNotFound {
            table: self.table.to_string(),
            id: id.to_string(),
        }
    }
}

/// Check the `kind` recorded in an engine fragment against the engine being built
pub(crate) fn check_kind(table: &str, fragment: &Map<String, Value>, kind: &str) -> TableResult<()> {
    match fragment.get(KIND_FIELD).and_then(Value::as_str) {
        Some(recorded) if recorded != kind => Err(TableError::ConfigurationConflict {
            table: table.to_string(),
            details: format!(
                "table was stored by a '{}' engine but is configured for a '{}' engine",
                recorded, kind
            ),
        }),
        _ => Ok(()),
    }
}
