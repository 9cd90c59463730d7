//! Table metadata
//!
//! The durable bookkeeping of one table: its configuration, the bound id
//! generator with its recovery state, and an opaque fragment owned by the
//! table's engine. Metadata is built and saved only through
//! [`TableMetadataFactory`].

mod factory;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::id::{IdCodec, IdGenerator, IdType};
use crate::table_config::TableConfig;

pub use factory::{metadata_file_name, TableMetadataFactory};

/// Section names of the metadata document
pub(crate) mod sections {
    pub const CONFIG: &str = "config";
    pub const GENERATOR: &str = "generator";
    pub const ENGINE: &str = "engine";

    // Generator section fields
    pub const TAG: &str = "tag";
    pub const STATE: &str = "state";
}

/// In-memory metadata of one table
#[derive(Debug)]
pub struct TableMetadata {
    name: String,
    engine_path: PathBuf,
    config: Option<TableConfig>,
    id_codec: Option<IdCodec>,
    engine_metadata: Map<String, Value>,
    /// Sections carried through untouched by engine-only metadata
    retained: Map<String, Value>,
}

impl TableMetadata {
    pub(crate) fn new(
        name: impl Into<String>,
        engine_path: impl Into<PathBuf>,
        config: Option<TableConfig>,
        id_codec: Option<IdCodec>,
        engine_metadata: Map<String, Value>,
    ) -> Self {
        Self {
            name: name.into(),
            engine_path: engine_path.into(),
            config,
            id_codec,
            engine_metadata,
            retained: Map::new(),
        }
    }

    pub(crate) fn with_retained(mut self, retained: Map<String, Value>) -> Self {
        self.retained = retained;
        self
    }

    /// Table name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Where the engine keeps the table's rows
    pub fn engine_path(&self) -> &Path {
        &self.engine_path
    }

    /// Table configuration; `None` for engine-only metadata
    pub fn config(&self) -> Option<&TableConfig> {
        self.config.as_ref()
    }

    /// Bound id generator and id type; `None` for engine-only metadata
    pub fn id_codec(&self) -> Option<&IdCodec> {
        self.id_codec.as_ref()
    }

    pub fn id_generator(&self) -> Option<&Arc<dyn IdGenerator>> {
        self.id_codec.as_ref().map(IdCodec::generator)
    }

    pub fn id_type(&self) -> Option<IdType> {
        self.id_codec.as_ref().map(IdCodec::id_type)
    }

    /// Whether this metadata was built without config or id generator
    ///
    /// Such metadata only exposes the engine fragment; callers must not
    /// allocate ids through it.
    pub fn is_engine_only(&self) -> bool {
        self.id_codec.is_none()
    }

    /// The engine's opaque state fragment
    pub fn engine_metadata(&self) -> &Map<String, Value> {
        &self.engine_metadata
    }

    pub fn engine_metadata_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.engine_metadata
    }

    pub fn set_engine_metadata(&mut self, fragment: Map<String, Value>) {
        self.engine_metadata = fragment;
    }

    pub(crate) fn retained(&self) -> &Map<String, Value> {
        &self.retained
    }
}
