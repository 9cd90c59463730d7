//! Storage layer
//!
//! File-level building blocks shared by the metadata factory and the
//! engines.
//!
//! ## Layout
//!
//! ```text
//! <data_dir>/
//!   .metadata/<table>.config.json   table metadata
//!   <table>.json                    unsharded table
//!   <table>/<lower-bound>.json      one file per shard interval
//! ```

pub mod error;
pub mod file;
pub mod partition;

pub use error::{StorageError, StorageResult};
pub use file::{atomic_write, document_name, DocumentFiles};
pub use partition::{Partition, Rows};
