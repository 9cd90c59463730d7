//! Shelf Core Library
//!
//! This crate provides the core of Shelf, an embedded document store that
//! keeps JSON rows in named tables on the local filesystem and splits large
//! tables into range-sharded partition files.
//!
//! # Architecture
//!
//! - **Metadata**: one file per table holding its configuration, the state of
//!   its id generator and its engine's bookkeeping
//! - **Engines**: a single-file engine, and a sharded engine with one file
//!   per key interval
//! - **Id generators**: timestamp, counter and UUID strategies selected per
//!   table and fixed for its lifetime
//!
//! # Quick Start
//!
//! ```text
//! let db = Database::open(Config::load()?)?;
//! let notes = db.table("notes", IdType::Uuid)?;
//!
//! let id = notes.insert(json!({ "title": "Example" }))?;
//! let note = notes.find(&id)?;
//!
//! db.shutdown()?;
//! ```
//!
//! # Modules
//!
//! - `database`: Opens tables and flushes their metadata (main entry point)
//! - `table`: Row operations on one open table
//! - `engine`: Storage engines and the shard range index
//! - `metadata`: Table metadata and its factory
//! - `id`: Id generators
//! - `query`: Row predicates
//! - `storage`: JSON document files and partitions
//! - `config`: Database configuration

pub mod config;
pub mod database;
pub mod engine;
pub mod error;
pub mod id;
pub mod metadata;
pub mod query;
pub mod storage;
pub mod table;
pub mod table_config;

pub use config::Config;
pub use database::Database;
pub use engine::{Engine, EngineFactory, EngineStats, Row};
pub use error::{TableError, TableResult};
pub use id::{GeneratorRegistry, IdCodec, IdError, IdGenerator, IdType, IdValue};
pub use metadata::{TableMetadata, TableMetadataFactory};
pub use query::{CompareOp, FieldPath, KeyRange, Query};
pub use storage::{StorageError, StorageResult};
pub use table::{Table, TableStats};
pub use table_config::{IntervalProvider, ShardKey, ShardsetConfig, TableConfig};
