//! Database
//!
//! The `Database` owns a data directory exclusively and opens its tables on
//! demand. For each table it:
//! - loads or creates the table metadata through the [`TableMetadataFactory`]
//! - builds the engine through the [`EngineFactory`]
//! - keeps the open [`Table`] for later callers
//!
//! A background thread saves the metadata of every open table every
//! `flush_interval_secs`. [`Database::shutdown`] (also run on drop) stops it
//! and shuts every table down.
//!
//! ## Usage
//!
//! ```ignore
//! let db = Database::open(Config::load()?)?;
//! let events = db.table("events", IdType::Integer)?;
//!
//! let id = events.insert(json!({ "kind": "login" }))?;
//! let recent = events.query(&Query::gt(FieldPath::Id, 100))?;
//!
//! db.shutdown()?;
//! ```

use std::collections::HashMap;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::engine::EngineFactory;
use crate::error::{TableError, TableResult};
use crate::id::{GeneratorRegistry, IdType};
use crate::metadata::{metadata_file_name, TableMetadata, TableMetadataFactory};
use crate::storage::{DocumentFiles, StorageError};
use crate::table::{Table, TableStats};

type OpenTables = Arc<RwLock<HashMap<String, Arc<Table>>>>;

/// Suffix of metadata document stems, `<table>.config`
const METADATA_STEM_SUFFIX: &str = ".config";

/// Table names may not end like the files tables are stored in
const RESERVED_NAME_SUFFIXES: [&str; 2] = [".json", ".tmp"];

/// An open data directory
#[derive(Debug)]
pub struct Database {
    config: Config,
    metadata: Arc<TableMetadataFactory>,
    engines: EngineFactory,
    tables: OpenTables,
    /// Serializes table opening so each table is opened once
    open_lock: Mutex<()>,
    /// Set under `open_lock` once shutdown begins
    closed: AtomicBool,
    flusher: Mutex<Option<Flusher>>,
}

impl Database {
    /// Open the data directory described by `config` with the default id generators
    pub fn open(config: Config) -> TableResult<Self> {
        Self::with_registry(config, GeneratorRegistry::with_defaults())
    }

    /// Open the data directory with a custom set of id generators
    pub fn with_registry(config: Config, registry: GeneratorRegistry) -> TableResult<Self> {
        create_dir(&config.data_dir)?;
        let metadata_dir = config.metadata_path();
        create_dir(&metadata_dir)?;

        let metadata = Arc::new(TableMetadataFactory::new(
            metadata_dir,
            Arc::new(registry),
            config.id_generator_strategy.clone(),
        ));
        let engines = EngineFactory::new(&config.data_dir);
        let tables: OpenTables = Arc::default();

        let flusher = match config.flush_interval() {
            Some(interval) => Some(Flusher::spawn(interval, Arc::clone(&tables))?),
            None => None,
        };

        info!("Opened database at {:?}", config.data_dir);
        Ok(Self {
            config,
            metadata,
            engines,
            tables,
            open_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
            flusher: Mutex::new(flusher),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Open a table, creating it if it does not exist
    ///
    /// The table configuration comes from the config file's `[tables.<name>]`
    /// section when there is one; otherwise a new table uses the defaults and
    /// an existing one keeps its persisted configuration.
    ///
    /// Fails with [`TableError::ShutDown`] once [`Database::shutdown`] has begun.
    pub fn table(&self, name: &str, id_type: IdType) -> TableResult<Arc<Table>> {
        validate_table_name(name)?;
        self.check_open(name)?;
        if let Some(table) = self.open_table(name) {
            return check_open_id_type(table, id_type);
        }

        let _opening = self.lock_opening();
        self.check_open(name)?;
        if let Some(table) = self.open_table(name) {
            return check_open_id_type(table, id_type);
        }

        let metadata = self.metadata.make_table_metadata(
            name,
            self.engines.engine_path(name),
            self.config.table(name).cloned(),
            id_type,
        )?;
        let engine = self.engines.make_engine(&metadata)?;
        let table = Arc::new(Table::new(metadata, engine, Arc::clone(&self.metadata))?);

        // Persist right away so the generator choice is fixed from now on
        table.save_metadata()?;
        info!(
            "Opened table '{}' ({} ids, '{}' generator, {} engine)",
            name,
            id_type,
            table.id_generator(),
            if table.config().is_sharded() { "sharded" } else { "file" }
        );

        self.tables
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name.to_string(), Arc::clone(&table));
        Ok(table)
    }

    /// Open a table using the id type recorded in its configuration
    pub fn table_with_configured_type(&self, name: &str) -> TableResult<Arc<Table>> {
        let id_type = self
            .configured_id_type(name)
            .ok_or_else(|| TableError::ConfigurationConflict {
                table: name.to_string(),
                details: "no id type configured; open the table with an explicit id type"
                    .to_string(),
            })?;
        self.table(name, id_type)
    }

    /// Id type recorded for `name` in the config file or its persisted configuration
    pub fn configured_id_type(&self, name: &str) -> Option<IdType> {
        if let Some(id_type) = self.config.table(name).and_then(|c| c.id_type) {
            return Some(id_type);
        }
        if let Some(table) = self.open_table(name) {
            return Some(table.id_type());
        }
        self.metadata
            .persisted_config(name)
            .and_then(|config| config.id_type)
    }

    /// Metadata of a table with only its engine fragment, for inspection
    ///
    /// Binds no id generator and never fails; a table without metadata
    /// yields an empty fragment.
    pub fn inspect_table(&self, name: &str) -> TableMetadata {
        self.metadata
            .make_engine_metadata(name, self.engines.engine_path(name))
    }

    /// Names of every table with metadata on disk, plus tables open now
    pub fn table_names(&self) -> TableResult<Vec<String>> {
        let files = DocumentFiles::new(self.metadata.metadata_dir());
        let mut names: Vec<String> = files
            .list()?
            .into_iter()
            .filter_map(|stem| stem.strip_suffix(METADATA_STEM_SUFFIX).map(str::to_string))
            .collect();

        for name in self.read_tables().keys() {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Whether metadata for `name` exists on disk
    pub fn table_exists(&self, name: &str) -> bool {
        self.metadata
            .metadata_dir()
            .join(metadata_file_name(name))
            .exists()
    }

    /// Save the metadata of every open table
    ///
    /// Every table is attempted; the first failure is returned.
    pub fn flush(&self) -> TableResult<()> {
        if self.is_shut_down() {
            return Err(TableError::DatabaseShutDown {
                path: self.config.data_dir.clone(),
            });
        }
        flush_tables(&self.tables)
    }

    /// Stats of every open table
    pub fn stats(&self) -> TableResult<Vec<TableStats>> {
        let mut stats = self
            .read_tables()
            .values()
            .map(|table| table.stats())
            .collect::<TableResult<Vec<_>>>()?;
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(stats)
    }

    /// Stop the flusher and shut every open table down
    ///
    /// No table can be opened once this has begun. Every table is
    /// attempted; the first failure is returned. Calling it again does
    /// nothing.
    pub fn shutdown(&self) -> TableResult<()> {
        {
            let _opening = self.lock_opening();
            if self.closed.swap(true, Ordering::AcqRel) {
                return Ok(());
            }
        }

        if let Some(flusher) = self
            .flusher
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            flusher.stop();
        }

        let tables: Vec<Arc<Table>> = self.read_tables().values().cloned().collect();
        let mut first_error = None;
        for table in tables {
            if let Err(e) = table.shutdown() {
                warn!("Failed to shut down table '{}': {}", table.name(), e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                debug!("Database at {:?} shut down", self.config.data_dir);
                Ok(())
            }
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn check_open(&self, table: &str) -> TableResult<()> {
        if self.is_shut_down() {
            return Err(TableError::ShutDown {
                table: table.to_string(),
            });
        }
        Ok(())
    }

    fn lock_opening(&self) -> MutexGuard<'_, ()> {
        self.open_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn open_table(&self, name: &str) -> Option<Arc<Table>> {
        self.read_tables().get(name).cloned()
    }

    fn read_tables(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<Table>>> {
        self.tables
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Error shutting down database: {}", e);
        }
    }
}

/// Background thread flushing table metadata on an interval
#[derive(Debug)]
struct Flusher {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

impl Flusher {
    fn spawn(interval: Duration, tables: OpenTables) -> TableResult<Self> {
        let (stop, rx) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name("shelf-flusher".to_string())
            .spawn(move || loop {
                match rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        if let Err(e) = flush_tables(&tables) {
                            warn!("Background metadata flush failed: {}", e);
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(StorageError::Io)?;

        debug!("Flushing table metadata every {:?}", interval);
        Ok(Self { stop, handle })
    }

    fn stop(self) {
        let _ = self.stop.send(());
        if self.handle.join().is_err() {
            warn!("Metadata flusher panicked");
        }
    }
}

fn flush_tables(tables: &OpenTables) -> TableResult<()> {
    let open: Vec<Arc<Table>> = tables
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .values()
        .cloned()
        .collect();

    let mut first_error = None;
    for table in open {
        match table.save_metadata() {
            Ok(()) => {}
            // Shut down tables have already saved
            Err(TableError::ShutDown { .. }) => {}
            Err(e) => {
                warn!("Failed to flush metadata of table '{}': {}", table.name(), e);
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn check_open_id_type(table: Arc<Table>, id_type: IdType) -> TableResult<Arc<Table>> {
    if table.id_type() != id_type {
        return Err(TableError::ConfigurationConflict {
            table: table.name().to_string(),
            details: format!(
                "table is open with {} ids, requested {}",
                table.id_type(),
                id_type
            ),
        });
    }
    Ok(table)
}

fn validate_table_name(name: &str) -> TableResult<()> {
    let invalid = |details: &str| TableError::InvalidTableName {
        name: name.to_string(),
        details: details.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.starts_with('.') {
        return Err(invalid("name starts with '.'"));
    }
    if name.contains(['/', '\\']) || name.contains('\0') {
        return Err(invalid("name contains a path separator"));
    }
    if let Some(suffix) = RESERVED_NAME_SUFFIXES
        .iter()
        .find(|suffix| name.ends_with(*suffix))
    {
        return Err(invalid(&format!("name ends with '{}'", suffix)));
    }
    Ok(())
}

fn create_dir(path: &std::path::Path) -> TableResult<()> {
    fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::IdValue;
    use crate::table_config::{IntervalProvider, ShardsetConfig, TableConfig};
    use serde_json::json;
    use tempfile::TempDir;

    fn config(temp_dir: &TempDir) -> Config {
        Config {
            flush_interval_secs: 0,
            ..Config::with_data_dir(temp_dir.path())
        }
    }

    #[test]
    fn test_open_creates_directories() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::open(config(&temp_dir)).unwrap();
        assert!(temp_dir.path().join(".metadata").is_dir());
        assert!(db.table_names().unwrap().is_empty());
    }

    #[test]
    fn test_table_is_opened_once() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::open(config(&temp_dir)).unwrap();

        let a = db.table("notes", IdType::String).unwrap();
        let b = db.table("notes", IdType::String).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let err = db.table("notes", IdType::Long).unwrap_err();
        assert!(matches!(err, TableError::ConfigurationConflict { .. }));

        assert!(db.table_exists("notes"));
        assert_eq!(db.table_names().unwrap(), vec!["notes"]);
    }

    #[test]
    fn test_invalid_table_names() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::open(config(&temp_dir)).unwrap();

        for name in ["", ".metadata", "a/b", "..\\x", "a.json", "a.tmp"] {
            let err = db.table(name, IdType::String).unwrap_err();
            assert!(
                matches!(err, TableError::InvalidTableName { .. }),
                "{:?} should be rejected",
                name
            );
        }

        // A sharded `a.json` would collide with the file of an unsharded `a`
        db.table("a", IdType::String).unwrap();
        assert!(db.table("a.v2", IdType::String).is_ok());
    }

    #[test]
    fn test_config_file_tables_are_applied() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = config(&temp_dir);
        config.tables.insert(
            "events".into(),
            TableConfig::default()
                .with_id_generator("bigint")
                .with_id_type(IdType::Integer)
                .sharded(ShardsetConfig::by_id(
                    IdType::Integer,
                    IntervalProvider::new(0, 10),
                )),
        );

        let db = Database::open(config).unwrap();
        assert_eq!(db.configured_id_type("events"), Some(IdType::Integer));

        let events = db.table_with_configured_type("events").unwrap();
        assert_eq!(events.id_generator(), "bigint");
        events.insert(json!({})).unwrap();
        assert!(temp_dir.path().join("events").join("0.json").exists());

        assert!(db.table_with_configured_type("unknown").is_err());
    }

    #[test]
    fn test_shutdown_persists_and_rejects() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::open(config(&temp_dir)).unwrap();
        let table = db.table("t", IdType::Integer).unwrap();
        table.insert(json!({ "n": 1 })).unwrap();

        db.shutdown().unwrap();
        assert!(matches!(
            table.insert(json!({})).unwrap_err(),
            TableError::ShutDown { .. }
        ));
        drop(db);

        let db = Database::open(config(&temp_dir)).unwrap();
        let table = db.table("t", IdType::Integer).unwrap();
        assert_eq!(table.insert(json!({})).unwrap(), IdValue::Integer(2));
    }

    #[test]
    fn test_inspect_table() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::open(config(&temp_dir)).unwrap();
        db.table("t", IdType::String).unwrap();
        db.flush().unwrap();

        let md = db.inspect_table("t");
        assert!(md.is_engine_only());
        assert_eq!(md.engine_metadata()["kind"], json!("file"));
        assert!(db.inspect_table("missing").engine_metadata().is_empty());
    }

    #[test]
    fn test_background_flush() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = config(&temp_dir);
        config.flush_interval_secs = 1;
        let db = Database::open(config).unwrap();

        let table = db.table("t", IdType::Integer).unwrap();
        table.insert(json!({})).unwrap();
        table.insert(json!({})).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        loop {
            let doc = db.metadata.load_metadata_document("t").unwrap();
            if doc["generator"]["state"]["maxId"] == json!("2") {
                break;
            }
            assert!(std::time::Instant::now() < deadline, "flusher never ran");
            thread::sleep(Duration::from_millis(50));
        }

        db.shutdown().unwrap();
    }

    #[test]
    fn test_stats() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::open(config(&temp_dir)).unwrap();
        db.table("b", IdType::String).unwrap();
        db.table("a", IdType::Long)
            .unwrap()
            .insert(json!({}))
            .unwrap();

        let stats = db.stats().unwrap();
        let names: Vec<&str> = stats.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(stats[0].engine.rows, 1);
    }
}
