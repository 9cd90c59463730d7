//! Restart and metadata recovery.

mod common;

use std::fs;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use serde_json::{json, Map, Value};
use shelf_core::{
    Database, FieldPath, GeneratorRegistry, IdError, IdGenerator, IdType, IdValue,
    IntervalProvider, Query, ShardsetConfig, TableConfig, TableError,
};
use tempfile::TempDir;

use common::{config, integer_id_shards, open, sharded_by_id};

#[test]
fn generator_state_survives_restart() {
    let temp_dir = TempDir::new().unwrap();
    {
        let db = open(sharded_by_id(temp_dir.path(), "table"));
        let table = db.table("table", IdType::Integer).unwrap();
        for n in 1..=3 {
            table.insert(json!({ "n": n })).unwrap();
        }
        db.shutdown().unwrap();
    }

    let db = open(sharded_by_id(temp_dir.path(), "table"));
    let table = db.table("table", IdType::Integer).unwrap();

    assert_eq!(table.find(&IdValue::Integer(2)).unwrap(), Some(json!({ "n": 2 })));
    assert_eq!(table.insert(json!({ "n": 4 })).unwrap(), IdValue::Integer(4));
    assert_eq!(table.query(&Query::All).unwrap().len(), 4);
}

#[test]
fn persisted_config_is_adopted_without_config_file() {
    let temp_dir = TempDir::new().unwrap();
    {
        let db = open(sharded_by_id(temp_dir.path(), "table"));
        db.table("table", IdType::Integer)
            .unwrap()
            .insert(json!({}))
            .unwrap();
    }

    // No [tables.table] section this time
    let db = open(config(temp_dir.path()));
    let table = db.table("table", IdType::Integer).unwrap();
    assert_eq!(table.config(), &integer_id_shards());
    assert!(table.find(&IdValue::Integer(1)).unwrap().is_some());
}

#[test]
fn corrupt_metadata_is_regenerated() {
    let temp_dir = TempDir::new().unwrap();
    {
        let db = open(sharded_by_id(temp_dir.path(), "table"));
        let table = db.table("table", IdType::Integer).unwrap();
        table.insert(json!({ "n": 1 })).unwrap();
    }

    fs::write(
        temp_dir.path().join(".metadata").join("table.config.json"),
        "{ not json",
    )
    .unwrap();

    let db = open(sharded_by_id(temp_dir.path(), "table"));
    let table = db.table("table", IdType::Integer).unwrap();

    // Rows live in the partition files and are still there
    assert_eq!(table.find(&IdValue::Integer(1)).unwrap(), Some(json!({ "n": 1 })));

    // The counter restarted, so the next generated id collides
    assert!(matches!(
        table.insert(json!({ "n": 2 })).unwrap_err(),
        TableError::DuplicateKey { .. }
    ));
    assert_eq!(table.insert(json!({ "n": 2 })).unwrap(), IdValue::Integer(2));
}

#[test]
fn changed_table_config_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    {
        let db = open(sharded_by_id(temp_dir.path(), "table"));
        db.table("table", IdType::Integer).unwrap();
    }

    let mut changed = config(temp_dir.path());
    changed.tables.insert(
        "table".into(),
        TableConfig::default()
            .with_id_generator("bigint")
            .sharded(ShardsetConfig::by_id(
                IdType::Integer,
                IntervalProvider::new(0, 1000),
            )),
    );

    let db = open(changed);
    let err = db.table("table", IdType::Integer).unwrap_err();
    assert!(matches!(err, TableError::ConfigurationConflict { .. }));
    assert!(err.is_configuration_error());
}

#[test]
fn reopening_with_unsupported_id_type_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    {
        let db = open(config(temp_dir.path()));
        db.table("notes", IdType::Uuid).unwrap();
    }

    let db = open(config(temp_dir.path()));
    let err = db.table("notes", IdType::Integer).unwrap_err();
    assert!(matches!(err, TableError::ConfigurationConflict { .. }));
}

/// Counts down from -1
#[derive(Debug, Default)]
struct Countdown {
    last: AtomicI64,
}

impl IdGenerator for Countdown {
    fn tag(&self) -> &str {
        "countdown"
    }

    fn supports(&self, id_type: IdType) -> bool {
        id_type == IdType::Long
    }

    fn generate_new_id(&self, id_type: IdType) -> Result<IdValue, IdError> {
        if !self.supports(id_type) {
            return Err(self.unsupported(id_type));
        }
        Ok(IdValue::Long(self.last.fetch_sub(1, Ordering::AcqRel) - 1))
    }

    fn id_to_string(&self, id: &IdValue) -> Result<String, IdError> {
        match id {
            IdValue::Long(l) => Ok(l.to_string()),
            other => Err(self.unsupported(other.id_type())),
        }
    }

    fn string_to_id(&self, id: &str, id_type: IdType) -> Result<IdValue, IdError> {
        if !self.supports(id_type) {
            return Err(self.unsupported(id_type));
        }
        id.parse().map(IdValue::Long).map_err(|e| IdError::Malformed {
            value: id.to_string(),
            id_type,
            details: format!("{}", e),
        })
    }

    fn save_state(&self, state: &mut Map<String, Value>) {
        state.insert("last".into(), json!(self.last.load(Ordering::Acquire)));
    }

    fn load_state(&self, state: &Map<String, Value>) -> Result<(), IdError> {
        let last = state
            .get("last")
            .and_then(Value::as_i64)
            .ok_or_else(|| IdError::MalformedState {
                generator: "countdown".into(),
                details: "missing 'last'".into(),
            })?;
        self.last.store(last, Ordering::Release);
        Ok(())
    }
}

fn countdown_registry() -> GeneratorRegistry {
    let mut registry = GeneratorRegistry::with_defaults();
    registry.register("countdown", || Arc::new(Countdown::default()));
    registry
}

#[test]
fn custom_generator_is_restored_by_tag() {
    let temp_dir = TempDir::new().unwrap();
    let mut cfg = config(temp_dir.path());
    cfg.id_generator_strategy = vec!["countdown".into(), "timestamp".into()];

    {
        let db = Database::with_registry(cfg.clone(), countdown_registry()).unwrap();
        let table = db.table("t", IdType::Long).unwrap();
        assert_eq!(table.id_generator(), "countdown");
        assert_eq!(table.insert(json!({})).unwrap(), IdValue::Long(-1));
        assert_eq!(table.insert(json!({})).unwrap(), IdValue::Long(-2));
    }

    {
        let db = Database::with_registry(cfg.clone(), countdown_registry()).unwrap();
        let table = db.table("t", IdType::Long).unwrap();
        assert_eq!(table.insert(json!({})).unwrap(), IdValue::Long(-3));
        assert_eq!(
            table.query(&Query::lt(FieldPath::Id, -1)).unwrap().len(),
            2
        );
    }

    // Without the custom generator registered the table cannot be opened
    let db = Database::open(config(temp_dir.path())).unwrap();
    let err = db.table("t", IdType::Long).unwrap_err();
    assert!(matches!(err, TableError::GeneratorResolution { .. }));
}
