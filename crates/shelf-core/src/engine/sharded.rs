//! Range-sharded engine
//!
//! Rows are spread over partition files `<table dir>/<lower bound>.json`,
//! one per key interval. The directory listing is the source of truth for
//! which intervals exist; it is read once when the engine opens. A partition
//! is created the first time a row lands in its interval.
//!
//! When the sharding key is the row id, every operation goes straight to one
//! partition. When it is a field of the row document, the partition holding
//! an id is not known up front: lookups scan the partitions and mutations are
//! serialized so a row is never stored in two partitions.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use super::range::{Interval, ShardRangeIndex};
use super::{check_kind, Engine, EngineStats, PartitionRows, Row, KIND_FIELD};
use crate::error::{TableError, TableResult};
use crate::id::{parse_date, IdCodec, IdType};
use crate::query::{FieldPath, Query};
use crate::storage::{document_name, DocumentFiles, Partition};
use crate::table_config::{ShardKey, ShardsetConfig};

pub const KIND: &str = "sharded";

/// Engine fragment field listing the partitions known at the last save
const PARTITIONS_FIELD: &str = "partitions";

/// Stores a table as one partition file per key interval
#[derive(Debug)]
pub struct ShardedEngine {
    table: String,
    files: DocumentFiles,
    sharding: ShardsetConfig,
    codec: Option<IdCodec>,
    index: ShardRangeIndex<Partition>,
    relocate_lock: Mutex<()>,
}

impl ShardedEngine {
    /// Open the sharded table stored in `dir`
    pub fn open(
        table: impl Into<String>,
        dir: &Path,
        sharding: ShardsetConfig,
        codec: Option<IdCodec>,
        fragment: &Map<String, Value>,
    ) -> TableResult<Self> {
        let table = table.into();
        check_kind(&table, fragment, KIND)?;
        validate_sharding(&table, &sharding, codec.as_ref())?;

        let files = DocumentFiles::new(dir);
        let mut partitions = Vec::new();
        for name in files.list()? {
            let lower = parse_lower_bound(&table, &sharding, &name)?;
            let path = files.path(&document_name(&name));
            partitions.push((lower, Partition::open(name, path)));
        }

        if let Some(Value::Array(recorded)) = fragment.get(PARTITIONS_FIELD) {
            let missing: Vec<&str> = recorded
                .iter()
                .filter_map(Value::as_str)
                .filter(|name| !partitions.iter().any(|(_, p)| p.name() == *name))
                .collect();
            if !missing.is_empty() {
                warn!(
                    "Table '{}' is missing partition files recorded in its metadata: {}",
                    table,
                    missing.join(", ")
                );
            }
        }

        debug!(
            "Opening sharded table '{}' from {} ({} partitions)",
            table,
            files,
            partitions.len()
        );

        Ok(Self {
            index: ShardRangeIndex::from_partitions(sharding.intervals, partitions),
            table,
            files,
            sharding,
            codec,
            relocate_lock: Mutex::new(()),
        })
    }

    /// Directory holding the partition files
    pub fn dir(&self) -> &Path {
        self.files.base_dir()
    }

    pub fn sharding(&self) -> &ShardsetConfig {
        &self.sharding
    }

    /// Every partition with its interval, in key order
    pub fn partitions(&self) -> Vec<(Interval, Arc<Partition>)> {
        self.index.all()
    }

    /// Sharding key of a row
    pub fn key_of(&self, id: &str, data: &Value) -> TableResult<i64> {
        let key_type = self.sharding.key_type;
        match &self.sharding.key {
            ShardKey::Id => {
                let codec = self.codec.as_ref().ok_or_else(|| {
                    self.invalid_key(id, "table has no id generator to decode ids")
                })?;
                codec
                    .decode_as(id, key_type)
                    .map_err(|e| self.invalid_key(id, e))?
                    .as_i64()
                    .ok_or_else(|| self.invalid_key(id, format!("{} ids are not numeric", key_type)))
            }
            ShardKey::Field(pointer) => {
                let value = data
                    .pointer(pointer)
                    .ok_or_else(|| self.invalid_key(id, format!("field '{}' is missing", pointer)))?;
                field_key(value, key_type).map_err(|details| self.invalid_key(id, details))
            }
        }
    }

    fn rows(&self) -> PartitionRows<'_> {
        PartitionRows {
            table: &self.table,
            codec: self.codec.as_ref(),
        }
    }

    fn keyed_by_id(&self) -> bool {
        self.sharding.key == ShardKey::Id
    }

    /// Serializes mutations of field-keyed tables
    fn relocation_guard(&self) -> Option<MutexGuard<'_, ()>> {
        if self.keyed_by_id() {
            return None;
        }
        Some(
            self.relocate_lock
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }

    /// The partition for `key`, created if its interval has none yet
    fn partition_for_write(&self, key: i64) -> TableResult<Arc<Partition>> {
        self.index.get_or_create(key, |interval| {
            let name = interval.lower.to_string();
            let partition = Partition::create(name.clone(), self.files.path(&document_name(&name)))?;
            info!(
                "Created partition '{}' {} for table '{}'",
                name, interval, self.table
            );
            Ok::<_, TableError>(partition)
        })
    }

    /// The partition currently holding `id`, if any
    fn find(&self, id: &str) -> TableResult<Option<Arc<Partition>>> {
        if self.keyed_by_id() {
            let key = self.key_of(id, &Value::Null)?;
            return Ok(self.index.locate(key));
        }

        for (_, partition) in self.index.all() {
            if self.rows().contains(&partition, id)? {
                return Ok(Some(partition));
            }
        }
        Ok(None)
    }

    /// Store `data` under `id` in the partition for `key`, moving it out of `old`
    fn relocate(&self, old: &Arc<Partition>, id: &str, key: i64, data: Value) -> TableResult<()> {
        let target = self.partition_for_write(key)?;
        if Arc::ptr_eq(old, &target) {
            return self.rows().replace(&target, id, data);
        }

        // Write the new copy first so a failure never loses the row
        let inserted = self.rows().upsert(&target, id, data)?;
        if let Err(e) = self.rows().remove(old, id) {
            error!(
                "Failed to remove row '{}' of table '{}' from partition '{}' after copying it to '{}': {}",
                id,
                self.table,
                old.name(),
                target.name(),
                e
            );
            if inserted {
                if let Err(rollback) = self.rows().remove(&target, id) {
                    error!(
                        "Row '{}' of table '{}' is now in partitions '{}' and '{}': {}",
                        id,
                        self.table,
                        old.name(),
                        target.name(),
                        rollback
                    );
                }
            }
            return Err(e);
        }
        debug!(
            "Moved row '{}' of table '{}' from partition '{}' to '{}'",
            id,
            self.table,
            old.name(),
            target.name()
        );
        Ok(())
    }

    fn invalid_key(&self, id: &str, details: impl ToString) -> TableError {
        TableError::InvalidShardKey {
            table: self.table.clone(),
            id: id.to_string(),
            details: details.to_string(),
        }
    }
}

impl Engine for ShardedEngine {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn insert_row(&self, id: &str, data: Value) -> TableResult<()> {
        let key = self.key_of(id, &data)?;
        let _guard = self.relocation_guard();

        if !self.keyed_by_id() && self.find(id)?.is_some() {
            return Err(self.rows().duplicate(id));
        }

        let partition = self.partition_for_write(key)?;
        self.rows().insert(&partition, id, data)
    }

    fn read_row(&self, id: &str) -> TableResult<Option<Value>> {
        match self.find(id)? {
            Some(partition) => self.rows().read(&partition, id),
            None => Ok(None),
        }
    }

    fn replace_row(&self, id: &str, data: Value) -> TableResult<()> {
        let key = self.key_of(id, &data)?;
        let _guard = self.relocation_guard();

        let current = self.find(id)?.ok_or_else(|| self.rows().not_found(id))?;
        if self.keyed_by_id() {
            return self.rows().replace(&current, id, data);
        }
        self.relocate(&current, id, key, data)
    }

    fn upsert_row(&self, id: &str, data: Value) -> TableResult<bool> {
        let key = self.key_of(id, &data)?;
        let _guard = self.relocation_guard();

        if !self.keyed_by_id() {
            if let Some(current) = self.find(id)? {
                self.relocate(&current, id, key, data)?;
                return Ok(false);
            }
        }

        let partition = self.partition_for_write(key)?;
        self.rows().upsert(&partition, id, data)
    }

    fn delete_row(&self, id: &str) -> TableResult<()> {
        let _guard = self.relocation_guard();
        let partition = self.find(id)?.ok_or_else(|| self.rows().not_found(id))?;
        self.rows().delete(&partition, id)
    }

    fn delete_all(&self, query: &Query) -> TableResult<usize> {
        let _guard = self.relocation_guard();
        let range = query.key_range(&FieldPath::from(&self.sharding.key));

        let mut removed = 0;
        for (_, partition) in self.index.overlapping(&range) {
            removed += self.rows().delete_matching(&partition, query)?;
        }
        Ok(removed)
    }

    fn query(&self, query: &Query) -> TableResult<Vec<Row>> {
        let range = query.key_range(&FieldPath::from(&self.sharding.key));
        let partitions = self.index.overlapping(&range);
        debug!(
            "Query on table '{}' touches {} of {} partitions",
            self.table,
            partitions.len(),
            self.index.len()
        );

        let mut rows = Vec::new();
        for (_, partition) in partitions {
            rows.extend(self.rows().query(&partition, query)?);
        }
        Ok(rows)
    }

    fn save_fragment(&self, fragment: &mut Map<String, Value>) {
        fragment.insert(KIND_FIELD.to_string(), Value::String(KIND.to_string()));
        let names = self
            .index
            .lower_bounds()
            .into_iter()
            .map(|lower| Value::String(lower.to_string()))
            .collect();
        fragment.insert(PARTITIONS_FIELD.to_string(), Value::Array(names));
    }

    fn stats(&self) -> TableResult<EngineStats> {
        let mut rows = 0;
        for (_, partition) in self.index.all() {
            rows += partition.len()?;
        }

        Ok(EngineStats {
            kind: KIND.to_string(),
            partitions: self.index.len(),
            rows,
            size_bytes: self.files.size_on_disk(),
        })
    }
}

fn validate_sharding(
    table: &str,
    sharding: &ShardsetConfig,
    codec: Option<&IdCodec>,
) -> TableResult<()> {
    let conflict = |details: String| TableError::ConfigurationConflict {
        table: table.to_string(),
        details,
    };

    if !sharding.intervals.is_valid() {
        return Err(conflict(format!(
            "interval width must be positive, got {}",
            sharding.intervals.width
        )));
    }

    if !matches!(
        sharding.key_type,
        IdType::Integer | IdType::Long | IdType::Date
    ) {
        return Err(conflict(format!(
            "cannot shard on {} keys; use integer, long or date",
            sharding.key_type
        )));
    }

    if sharding.key == ShardKey::Id {
        match codec {
            Some(codec) if codec.generator().supports(sharding.key_type) => {}
            Some(codec) => {
                return Err(conflict(format!(
                    "id generator '{}' cannot convert ids to {} sharding keys",
                    codec.generator().tag(),
                    sharding.key_type
                )))
            }
            None => return Err(conflict("sharding on the id requires an id generator".into())),
        }
    }

    Ok(())
}

/// Lower bound encoded in a partition name
fn parse_lower_bound(table: &str, sharding: &ShardsetConfig, name: &str) -> TableResult<i64> {
    let invalid = |details: String| TableError::InvalidPartition {
        table: table.to_string(),
        name: name.to_string(),
        details,
    };

    let lower = name
        .parse::<i64>()
        .map_err(|e| invalid(format!("not an interval lower bound: {}", e)))?;
    if !sharding.intervals.is_aligned(lower) {
        return Err(invalid(format!(
            "{} is not an interval boundary of {:?}",
            lower, sharding.intervals
        )));
    }
    Ok(lower)
}

/// Sharding key held in a document field
fn field_key(value: &Value, key_type: IdType) -> Result<i64, String> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| format!("{} is not an integer", n)),
        Value::String(s) => match key_type {
            IdType::Date => parse_date(s)
                .map(|d| d.timestamp_millis())
                .map_err(|e| e.to_string()),
            _ => s
                .parse::<i64>()
                .map_err(|e| format!("'{}' is not an integer: {}", s, e)),
        },
        other => Err(format!("{} cannot be a sharding key", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::BigIntIdGenerator;
    use crate::table_config::IntervalProvider;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn id_codec() -> IdCodec {
        IdCodec::new(Arc::new(BigIntIdGenerator::new()), IdType::Integer).unwrap()
    }

    fn by_id() -> ShardsetConfig {
        ShardsetConfig::by_id(IdType::Integer, IntervalProvider::new(2, 100))
    }

    fn by_year() -> ShardsetConfig {
        ShardsetConfig::by(
            ShardKey::Field("/year".into()),
            IdType::Integer,
            IntervalProvider::new(0, 10),
        )
    }

    fn open(dir: &Path, sharding: ShardsetConfig) -> ShardedEngine {
        ShardedEngine::open("t", dir, sharding, Some(id_codec()), &Map::new()).unwrap()
    }

    fn ids(mut rows: Vec<Row>) -> Vec<String> {
        rows.sort_by_key(|r| r.id.parse::<i64>().unwrap_or_default());
        rows.into_iter().map(|r| r.id).collect()
    }

    #[test]
    fn test_routes_by_id_interval() {
        let temp_dir = TempDir::new().unwrap();
        let engine = open(temp_dir.path(), by_id());

        for id in ["1", "2", "3"] {
            engine.insert_row(id, json!({ "id": id })).unwrap();
        }

        assert!(temp_dir.path().join("-98.json").exists());
        assert!(temp_dir.path().join("2.json").exists());
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 2);

        let rows = engine.query(&Query::gt(FieldPath::Id, 1)).unwrap();
        assert_eq!(ids(rows), vec!["2", "3"]);
        assert_eq!(engine.read_row("1").unwrap(), Some(json!({ "id": "1" })));
    }

    #[test]
    fn test_query_does_not_open_pruned_partitions() {
        let temp_dir = TempDir::new().unwrap();
        open(temp_dir.path(), by_id())
            .insert_row("1", json!({}))
            .unwrap();
        open(temp_dir.path(), by_id())
            .insert_row("250", json!({}))
            .unwrap();

        let engine = open(temp_dir.path(), by_id());
        let rows = engine.query(&Query::ge(FieldPath::Id, 200)).unwrap();
        assert_eq!(ids(rows), vec!["250"]);

        let loaded: Vec<(i64, bool)> = engine
            .partitions()
            .iter()
            .map(|(interval, p)| (interval.lower, p.is_loaded()))
            .collect();
        assert_eq!(loaded, vec![(-98, false), (202, true)]);
    }

    #[test]
    fn test_read_of_unknown_interval_creates_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let engine = open(temp_dir.path(), by_id());

        assert_eq!(engine.read_row("500").unwrap(), None);
        assert!(matches!(
            engine.delete_row("500").unwrap_err(),
            TableError::KeyNotFound { .. }
        ));
        assert!(engine.partitions().is_empty());
    }

    #[test]
    fn test_malformed_id_is_invalid_shard_key() {
        let temp_dir = TempDir::new().unwrap();
        let engine = open(temp_dir.path(), by_id());

        let err = engine.insert_row("abc", json!({})).unwrap_err();
        assert!(matches!(err, TableError::InvalidShardKey { .. }));
    }

    #[test]
    fn test_open_rebuilds_index_from_files() {
        let temp_dir = TempDir::new().unwrap();
        {
            let engine = open(temp_dir.path(), by_id());
            for id in ["1", "2", "150"] {
                engine.insert_row(id, json!({})).unwrap();
            }
        }

        let engine = open(temp_dir.path(), by_id());
        let lowers: Vec<i64> = engine.partitions().iter().map(|(i, _)| i.lower).collect();
        assert_eq!(lowers, vec![-98, 2, 102]);
        assert_eq!(engine.query(&Query::All).unwrap().len(), 3);
    }

    #[test]
    fn test_misaligned_partition_file_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("5.json"), "{}").unwrap();

        let err = ShardedEngine::open("t", temp_dir.path(), by_id(), Some(id_codec()), &Map::new())
            .unwrap_err();
        assert!(matches!(err, TableError::InvalidPartition { .. }));
    }

    #[test]
    fn test_non_numeric_partition_file_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("notes.json"), "{}").unwrap();

        let err = ShardedEngine::open("t", temp_dir.path(), by_id(), Some(id_codec()), &Map::new())
            .unwrap_err();
        assert!(matches!(err, TableError::InvalidPartition { .. }));
    }

    #[test]
    fn test_generator_must_convert_key_type() {
        let temp_dir = TempDir::new().unwrap();
        let sharding = ShardsetConfig::by_id(IdType::Date, IntervalProvider::new(0, 1000));

        let err = ShardedEngine::open("t", temp_dir.path(), sharding, Some(id_codec()), &Map::new())
            .unwrap_err();
        assert!(matches!(err, TableError::ConfigurationConflict { .. }));
    }

    #[test]
    fn test_string_keys_are_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let sharding = ShardsetConfig::by_id(IdType::String, IntervalProvider::new(0, 10));

        let err = ShardedEngine::open("t", temp_dir.path(), sharding, Some(id_codec()), &Map::new())
            .unwrap_err();
        assert!(matches!(err, TableError::ConfigurationConflict { .. }));
    }

    #[test]
    fn test_zero_width_from_config_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        // Deserialized providers bypass IntervalProvider::new
        let sharding =
            ShardsetConfig::by_id(IdType::Integer, IntervalProvider { base: 0, width: 0 });

        let err = ShardedEngine::open("t", temp_dir.path(), sharding, Some(id_codec()), &Map::new())
            .unwrap_err();
        assert!(matches!(err, TableError::ConfigurationConflict { .. }));
    }

    #[test]
    fn test_field_key_routing_and_relocation() {
        let temp_dir = TempDir::new().unwrap();
        let engine = open(temp_dir.path(), by_year());

        engine.insert_row("a", json!({ "year": 3 })).unwrap();
        engine.insert_row("b", json!({ "year": 15 })).unwrap();
        assert!(matches!(
            engine.insert_row("a", json!({ "year": 25 })).unwrap_err(),
            TableError::DuplicateKey { .. }
        ));

        engine.replace_row("a", json!({ "year": 12 })).unwrap();
        let lowers: Vec<(i64, usize)> = engine
            .partitions()
            .iter()
            .map(|(i, p)| (i.lower, p.len().unwrap()))
            .collect();
        assert_eq!(lowers, vec![(0, 0), (10, 2)]);
        assert_eq!(engine.read_row("a").unwrap(), Some(json!({ "year": 12 })));

        assert!(!engine.upsert_row("b", json!({ "year": 31 })).unwrap());
        assert!(engine.upsert_row("c", json!({ "year": 1 })).unwrap());

        let recent = engine
            .query(&Query::ge(FieldPath::pointer("/year"), 10))
            .unwrap();
        let mut recent: Vec<String> = recent.into_iter().map(|r| r.id).collect();
        recent.sort();
        assert_eq!(recent, vec!["a", "b"]);

        engine.delete_row("b").unwrap();
        assert_eq!(engine.read_row("b").unwrap(), None);
    }

    #[test]
    fn test_failed_relocation_keeps_row_in_one_partition() {
        let temp_dir = TempDir::new().unwrap();
        let engine = open(temp_dir.path(), by_year());
        engine.insert_row("a", json!({ "year": 3 })).unwrap();

        // Partition 0 can no longer be rewritten
        let blocker = temp_dir.path().join("0.tmp");
        fs::create_dir(&blocker).unwrap();

        assert!(engine.replace_row("a", json!({ "year": 12 })).is_err());
        let counts: Vec<(i64, usize)> = engine
            .partitions()
            .iter()
            .map(|(i, p)| (i.lower, p.len().unwrap()))
            .collect();
        assert_eq!(counts, vec![(0, 1), (10, 0)]);
        assert_eq!(engine.read_row("a").unwrap(), Some(json!({ "year": 3 })));

        fs::remove_dir(&blocker).unwrap();
        engine.replace_row("a", json!({ "year": 12 })).unwrap();
        assert_eq!(engine.read_row("a").unwrap(), Some(json!({ "year": 12 })));
    }

    #[test]
    fn test_string_field_keys_are_parsed() {
        let temp_dir = TempDir::new().unwrap();
        let engine = open(temp_dir.path(), by_year());

        assert_eq!(engine.key_of("a", &json!({ "year": "42" })).unwrap(), 42);

        let dated = ShardsetConfig::by(
            ShardKey::Field("/at".into()),
            IdType::Date,
            IntervalProvider::new(0, 86_400_000),
        );
        let engine = ShardedEngine::open("d", temp_dir.path(), dated, None, &Map::new()).unwrap();
        assert_eq!(
            engine
                .key_of("x", &json!({ "at": "1970-01-02T00:00:00.000Z" }))
                .unwrap(),
            86_400_000
        );
    }

    #[test]
    fn test_missing_field_key() {
        let temp_dir = TempDir::new().unwrap();
        let engine = open(temp_dir.path(), by_year());

        let err = engine.insert_row("a", json!({ "title": "x" })).unwrap_err();
        assert!(matches!(err, TableError::InvalidShardKey { .. }));
        let err = engine.insert_row("a", json!({ "year": 1.5 })).unwrap_err();
        assert!(matches!(err, TableError::InvalidShardKey { .. }));
    }

    #[test]
    fn test_delete_all_only_touches_matching_partitions() {
        let temp_dir = TempDir::new().unwrap();
        let engine = open(temp_dir.path(), by_id());
        for id in 1..=5 {
            engine.insert_row(&id.to_string(), json!({})).unwrap();
        }

        assert_eq!(engine.delete_all(&Query::lt(FieldPath::Id, 3)).unwrap(), 2);
        assert_eq!(ids(engine.query(&Query::All).unwrap()), vec!["3", "4", "5"]);
    }

    #[test]
    fn test_fragment_and_stats() {
        let temp_dir = TempDir::new().unwrap();
        let engine = open(temp_dir.path(), by_id());
        for id in ["1", "2", "3"] {
            engine.insert_row(id, json!({})).unwrap();
        }

        let mut fragment = Map::new();
        engine.save_fragment(&mut fragment);
        assert_eq!(fragment[KIND_FIELD], json!("sharded"));
        assert_eq!(fragment[PARTITIONS_FIELD], json!(["-98", "2"]));

        let stats = engine.stats().unwrap();
        assert_eq!(stats.partitions, 2);
        assert_eq!(stats.rows, 3);
        assert!(stats.size_bytes > 0);

        let mut file_fragment = Map::new();
        file_fragment.insert(KIND_FIELD.into(), json!("file"));
        let err = ShardedEngine::open("t", temp_dir.path(), by_id(), Some(id_codec()), &file_fragment)
            .unwrap_err();
        assert!(matches!(err, TableError::ConfigurationConflict { .. }));
    }
}
