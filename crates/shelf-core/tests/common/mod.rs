//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::path::Path;

use shelf_core::{Config, Database, IdType, IntervalProvider, ShardsetConfig, TableConfig};

/// Config rooted at `dir` with the background flusher disabled.
pub fn config(dir: &Path) -> Config {
    Config {
        flush_interval_secs: 0,
        ..Config::with_data_dir(dir)
    }
}

/// Config declaring `table` as sharded on its integer id in buckets of 100
/// starting at 2.
pub fn sharded_by_id(dir: &Path, table: &str) -> Config {
    let mut config = config(dir);
    config.tables.insert(table.to_string(), integer_id_shards());
    config
}

pub fn integer_id_shards() -> TableConfig {
    TableConfig::default()
        .with_id_generator("bigint")
        .sharded(ShardsetConfig::by_id(
            IdType::Integer,
            IntervalProvider::new(2, 100),
        ))
}

pub fn open(config: Config) -> Database {
    Database::open(config).expect("open database")
}

/// File names in `dir`, sorted.
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .expect("read dir")
        .map(|entry| entry.expect("dir entry").file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
