//! Metadata factory
//!
//! The only component that reads or writes metadata files. It keeps no state
//! about the tables it builds metadata for.
//!
//! An unreadable or unparsable metadata file is treated exactly like a
//! missing one: the table's rows live in separate partition files, so the
//! metadata is regenerated. The id generator's recovery state is lost when
//! that happens, which can lead to duplicate ids; this is logged.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use super::{sections, TableMetadata};
use crate::error::{TableError, TableResult};
use crate::id::{GeneratorRegistry, IdCodec, IdError, IdGenerator, IdType};
use crate::storage::DocumentFiles;
use crate::table_config::TableConfig;

/// File name of a table's metadata document
pub fn metadata_file_name(table: &str) -> String {
    format!("{}.config.json", table)
}

/// Builds, loads and saves [`TableMetadata`]
#[derive(Debug, Clone)]
pub struct TableMetadataFactory {
    files: DocumentFiles,
    registry: Arc<GeneratorRegistry>,
    strategy: Vec<String>,
}

impl TableMetadataFactory {
    /// Create a factory over `metadata_dir`
    ///
    /// `strategy` is the ordered list of generator tags tried for new tables
    /// whose configuration does not name a generator.
    pub fn new(
        metadata_dir: impl Into<PathBuf>,
        registry: Arc<GeneratorRegistry>,
        strategy: Vec<String>,
    ) -> Self {
        Self {
            files: DocumentFiles::new(metadata_dir),
            registry,
            strategy,
        }
    }

    /// Directory the metadata files live in
    pub fn metadata_dir(&self) -> &std::path::Path {
        self.files.base_dir()
    }

    pub fn registry(&self) -> &Arc<GeneratorRegistry> {
        &self.registry
    }

    /// Read the persisted metadata document of a table
    ///
    /// Returns `None` when the file is missing, unreadable or malformed.
    /// Never fails.
    pub fn load_metadata_document(&self, table: &str) -> Option<Map<String, Value>> {
        let file_name = metadata_file_name(table);
        match self.files.read_optional(&file_name) {
            Ok(Some(Value::Object(doc))) => Some(doc),
            Ok(Some(_)) => {
                warn!(
                    "Corrupt metadata file {} in directory {}: root is not an object",
                    file_name, self.files
                );
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!(
                    "Corrupt metadata file {} in directory {}: {}",
                    file_name, self.files, e
                );
                None
            }
        }
    }

    /// The configuration persisted for `table`, if it has readable metadata
    pub fn persisted_config(&self, table: &str) -> Option<TableConfig> {
        let section = self.load_metadata_document(table)?.remove(sections::CONFIG)?;
        serde_json::from_value(section).ok()
    }

    /// Build metadata that carries only the engine fragment
    ///
    /// The result has no configuration and no id generator; do not allocate
    /// ids through it. Saving it keeps the persisted configuration and
    /// generator sections as they were.
    pub fn make_engine_metadata(&self, name: &str, engine_path: impl Into<PathBuf>) -> TableMetadata {
        let mut doc = self.load_metadata_document(name).unwrap_or_default();
        let engine = take_engine_fragment(&mut doc);

        TableMetadata::new(name, engine_path, None, None, engine).with_retained(doc)
    }

    /// Build the metadata of a table, creating it if it does not exist yet
    ///
    /// `config` is `None` to adopt the persisted configuration. A supplied
    /// configuration must equal the persisted one.
    pub fn make_table_metadata(
        &self,
        name: &str,
        engine_path: impl Into<PathBuf>,
        config: Option<TableConfig>,
        id_type: IdType,
    ) -> TableResult<TableMetadata> {
        let engine_path = engine_path.into();
        let exists = self.files.exists(&metadata_file_name(name));

        match self.load_metadata_document(name) {
            Some(doc) => self.make_from_document(name, engine_path, doc, config, id_type),
            None => {
                if exists {
                    warn!(
                        "Regenerating metadata for table '{}'; id generator state was lost and ids may repeat",
                        name
                    );
                }
                self.make_new(name, engine_path, config, id_type)
            }
        }
    }

    fn make_new(
        &self,
        name: &str,
        engine_path: PathBuf,
        config: Option<TableConfig>,
        id_type: IdType,
    ) -> TableResult<TableMetadata> {
        let config = config.unwrap_or_default();
        check_declared_id_type(name, &config, id_type)?;

        let generator = match config.id_generator.as_deref() {
            Some(tag) => {
                let generator = self.create_generator(name, tag)?;
                if !generator.supports(id_type) {
                    return Err(unsupported_conflict(name, tag, id_type));
                }
                generator
            }
            None => self
                .registry
                .select(self.strategy.as_slice(), id_type)
                .map_err(|e| resolution_error(name, e))?
                .ok_or_else(|| TableError::GeneratorResolution {
                    table: name.to_string(),
                    details: format!(
                        "no generator in [{}] supports id type {}",
                        self.strategy.join(", "),
                        id_type
                    ),
                })?,
        };

        info!(
            "Creating metadata for table '{}' ({} ids from '{}' generator)",
            name,
            id_type,
            generator.tag()
        );

        let codec = IdCodec::new(generator, id_type)?;
        Ok(TableMetadata::new(
            name,
            engine_path,
            Some(config),
            Some(codec),
            Map::new(),
        ))
    }

    fn make_from_document(
        &self,
        name: &str,
        engine_path: PathBuf,
        mut doc: Map<String, Value>,
        config: Option<TableConfig>,
        id_type: IdType,
    ) -> TableResult<TableMetadata> {
        let persisted = match doc.remove(sections::CONFIG) {
            Some(section) => Some(serde_json::from_value::<TableConfig>(section).map_err(|e| {
                TableError::ConfigurationConflict {
                    table: name.to_string(),
                    details: format!("persisted configuration cannot be read: {}", e),
                }
            })?),
            None => None,
        };

        let config = match (config, persisted) {
            (Some(supplied), Some(persisted)) if supplied != persisted => {
                return Err(TableError::ConfigurationConflict {
                    table: name.to_string(),
                    details: format!(
                        "supplied configuration {:?} does not match persisted configuration {:?}",
                        supplied, persisted
                    ),
                });
            }
            (Some(supplied), _) => supplied,
            (None, Some(persisted)) => persisted,
            (None, None) => TableConfig::default(),
        };
        check_declared_id_type(name, &config, id_type)?;

        let section = doc
            .remove(sections::GENERATOR)
            .and_then(|v| match v {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .ok_or_else(|| TableError::GeneratorResolution {
                table: name.to_string(),
                details: "metadata has no generator section".to_string(),
            })?;

        let tag = section
            .get(sections::TAG)
            .and_then(Value::as_str)
            .ok_or_else(|| TableError::GeneratorResolution {
                table: name.to_string(),
                details: "generator section has no tag".to_string(),
            })?;

        if let Some(configured) = config.id_generator.as_deref() {
            if configured != tag {
                return Err(TableError::ConfigurationConflict {
                    table: name.to_string(),
                    details: format!(
                        "configuration names generator '{}' but the table was created with '{}'",
                        configured, tag
                    ),
                });
            }
        }

        let generator = self.create_generator(name, tag)?;
        if !generator.supports(id_type) {
            return Err(unsupported_conflict(name, tag, id_type));
        }

        let state = match section.get(sections::STATE) {
            Some(Value::Object(state)) => state.clone(),
            _ => Map::new(),
        };
        generator
            .load_state(&state)
            .map_err(|e| resolution_error(name, e))?;

        let engine = take_engine_fragment(&mut doc);
        debug!("Loaded metadata for table '{}' (generator '{}')", name, tag);

        let codec = IdCodec::new(generator, id_type)?;
        Ok(TableMetadata::new(
            name,
            engine_path,
            Some(config),
            Some(codec),
            engine,
        ))
    }

    /// Write the metadata document of a table atomically
    pub fn save_table_metadata(&self, metadata: &TableMetadata) -> TableResult<()> {
        let mut doc = Map::new();

        if let Some(config) = metadata.config() {
            doc.insert(sections::CONFIG.to_string(), serde_json::to_value(config)?);
        }

        if let Some(generator) = metadata.id_generator() {
            let mut state = Map::new();
            generator.save_state(&mut state);
            doc.insert(
                sections::GENERATOR.to_string(),
                json!({ sections::TAG: generator.tag(), sections::STATE: state }),
            );
        }

        for (key, value) in metadata.retained() {
            doc.entry(key.clone()).or_insert_with(|| value.clone());
        }

        doc.insert(
            sections::ENGINE.to_string(),
            Value::Object(metadata.engine_metadata().clone()),
        );

        self.files
            .write(&metadata_file_name(metadata.name()), &Value::Object(doc))?;
        debug!("Saved metadata for table '{}'", metadata.name());
        Ok(())
    }

    fn create_generator(&self, table: &str, tag: &str) -> TableResult<Arc<dyn IdGenerator>> {
        self.registry
            .create(tag)
            .map_err(|e| resolution_error(table, e))
    }
}

fn take_engine_fragment(doc: &mut Map<String, Value>) -> Map<String, Value> {
    match doc.remove(sections::ENGINE) {
        Some(Value::Object(engine)) => engine,
        _ => Map::new(),
    }
}

fn check_declared_id_type(table: &str, config: &TableConfig, id_type: IdType) -> TableResult<()> {
    match config.id_type {
        Some(declared) if declared != id_type => Err(TableError::ConfigurationConflict {
            table: table.to_string(),
            details: format!(
                "table is configured for {} ids but was opened with {} ids",
                declared, id_type
            ),
        }),
        _ => Ok(()),
    }
}

fn unsupported_conflict(table: &str, tag: &str, id_type: IdType) -> TableError {
    TableError::ConfigurationConflict {
        table: table.to_string(),
        details: format!("id generator '{}' does not support id type {}", tag, id_type),
    }
}

fn resolution_error(table: &str, error: IdError) -> TableError {
    TableError::GeneratorResolution {
        table: table.to_string(),
        details: error.to_string(),
    }
}
