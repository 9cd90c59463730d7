//! Tables
//!
//! A [`Table`] owns the metadata and engine of one open table. It allocates
//! ids for rows inserted without one, forwards row operations to the engine
//! and writes the metadata back through the [`TableMetadataFactory`].
//!
//! ## Shutdown
//!
//! [`Table::shutdown`] is a barrier: it waits for in-flight operations,
//! saves the metadata, and from then on every operation fails with
//! [`TableError::ShutDown`].

use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::engine::{Engine, EngineStats, Row};
use crate::error::{TableError, TableResult};
use crate::id::{IdCodec, IdType, IdValue};
use crate::metadata::{TableMetadata, TableMetadataFactory};
use crate::query::Query;
use crate::table_config::TableConfig;

/// Summary of an open table
#[derive(Debug, Clone, Serialize)]
pub struct TableStats {
    pub name: String,
    pub id_type: IdType,
    pub id_generator: String,
    pub sharded: bool,
    #[serde(flatten)]
    pub engine: EngineStats,
}

/// One open table
#[derive(Debug)]
pub struct Table {
    name: String,
    config: TableConfig,
    codec: IdCodec,
    engine: Box<dyn Engine>,
    metadata: Mutex<TableMetadata>,
    factory: Arc<TableMetadataFactory>,
    /// `true` once shutdown has begun
    closed: RwLock<bool>,
}

impl Table {
    /// Wrap metadata and the engine built from it
    ///
    /// The metadata must carry a configuration and an id generator.
    pub fn new(
        metadata: TableMetadata,
        engine: Box<dyn Engine>,
        factory: Arc<TableMetadataFactory>,
    ) -> TableResult<Self> {
        let name = metadata.name().to_string();
        let (config, codec) = match (metadata.config(), metadata.id_codec()) {
            (Some(config), Some(codec)) => (config.clone(), codec.clone()),
            _ => {
                return Err(TableError::GeneratorResolution {
                    table: name,
                    details: "metadata has no configuration or id generator".to_string(),
                })
            }
        };

        Ok(Self {
            name,
            config,
            codec,
            engine,
            metadata: Mutex::new(metadata),
            factory,
            closed: RwLock::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    pub fn id_type(&self) -> IdType {
        self.codec.id_type()
    }

    /// Tag of the table's id generator
    pub fn id_generator(&self) -> &str {
        self.codec.generator().tag()
    }

    /// Parse an id given in its stored string form
    pub fn parse_id(&self, id: &str) -> TableResult<IdValue> {
        Ok(self.codec.decode(id)?)
    }

    /// Insert a row under a newly generated id
    pub fn insert(&self, data: Value) -> TableResult<IdValue> {
        let _open = self.enter()?;
        let (id, key) = self.codec.generate()?;
        self.engine.insert_row(&key, data)?;
        debug!("Inserted row '{}' into table '{}'", key, self.name);
        Ok(id)
    }

    /// Insert a row under an id chosen by the caller
    pub fn insert_with_id(&self, id: &IdValue, data: Value) -> TableResult<()> {
        let _open = self.enter()?;
        let key = self.encode(id)?;
        self.engine.insert_row(&key, data)
    }

    pub fn find(&self, id: &IdValue) -> TableResult<Option<Value>> {
        let _open = self.enter()?;
        let key = self.encode(id)?;
        self.engine.read_row(&key)
    }

    /// Every row matching `query`, in no particular order
    pub fn query(&self, query: &Query) -> TableResult<Vec<Row>> {
        let _open = self.enter()?;
        self.engine.query(query)
    }

    pub fn replace(&self, id: &IdValue, data: Value) -> TableResult<()> {
        let _open = self.enter()?;
        let key = self.encode(id)?;
        self.engine.replace_row(&key, data)
    }

    /// Insert or replace a row; returns `true` if it was inserted
    pub fn upsert(&self, id: &IdValue, data: Value) -> TableResult<bool> {
        let _open = self.enter()?;
        let key = self.encode(id)?;
        self.engine.upsert_row(&key, data)
    }

    pub fn delete(&self, id: &IdValue) -> TableResult<()> {
        let _open = self.enter()?;
        let key = self.encode(id)?;
        self.engine.delete_row(&key)
    }

    /// Delete every row matching `query`
    pub fn delete_all(&self, query: &Query) -> TableResult<usize> {
        let _open = self.enter()?;
        self.engine.delete_all(query)
    }

    /// Write the metadata (generator state and engine fragment) to disk
    pub fn save_metadata(&self) -> TableResult<()> {
        let _open = self.enter()?;
        self.flush_metadata()
    }

    /// Save the metadata and refuse further operations
    ///
    /// Waits for operations already running. Calling it again does nothing.
    pub fn shutdown(&self) -> TableResult<()> {
        let mut closed = self
            .closed
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *closed {
            return Ok(());
        }
        *closed = true;

        self.flush_metadata()?;
        info!("Table '{}' shut down", self.name);
        Ok(())
    }

    pub fn is_shut_down(&self) -> bool {
        *self
            .closed
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn stats(&self) -> TableResult<TableStats> {
        let _open = self.enter()?;
        Ok(TableStats {
            name: self.name.clone(),
            id_type: self.id_type(),
            id_generator: self.id_generator().to_string(),
            sharded: self.config.is_sharded(),
            engine: self.engine.stats()?,
        })
    }

    /// Hold the shutdown gate open for one operation
    fn enter(&self) -> TableResult<RwLockReadGuard<'_, bool>> {
        let closed = self
            .closed
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *closed {
            return Err(TableError::ShutDown {
                table: self.name.clone(),
            });
        }
        Ok(closed)
    }

    /// One flush at a time per table
    fn flush_metadata(&self) -> TableResult<()> {
        let mut metadata = self.lock_metadata();
        self.engine.save_fragment(metadata.engine_metadata_mut());
        self.factory.save_table_metadata(&metadata)
    }

    fn lock_metadata(&self) -> MutexGuard<'_, TableMetadata> {
        self.metadata
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn encode(&self, id: &IdValue) -> TableResult<String> {
        if id.id_type() != self.codec.id_type() {
            return Err(TableError::UnsupportedIdType {
                generator: self.id_generator().to_string(),
                id_type: id.id_type(),
            });
        }
        Ok(self.codec.encode(id)?)
    }
}
