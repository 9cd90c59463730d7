//! Flushing and shutting a database down.

mod common;

use std::fs;
use std::sync::Arc;
use std::thread;

use serde_json::json;
use shelf_core::{IdType, TableError};
use tempfile::TempDir;

use common::{config, integer_id_shards, open};

#[test]
fn tables_cannot_be_opened_after_shutdown() {
    let temp_dir = TempDir::new().unwrap();
    let db = open(config(temp_dir.path()));
    let early = db.table("early", IdType::Integer).unwrap();
    early.insert(json!({ "n": 1 })).unwrap();

    db.shutdown().unwrap();
    assert!(db.is_shut_down());

    assert!(matches!(
        db.table("late", IdType::Integer).unwrap_err(),
        TableError::ShutDown { table } if table == "late"
    ));
    assert!(matches!(
        db.table("early", IdType::Integer).unwrap_err(),
        TableError::ShutDown { .. }
    ));
    assert!(matches!(
        early.insert(json!({ "n": 2 })).unwrap_err(),
        TableError::ShutDown { .. }
    ));
    assert!(matches!(
        db.flush().unwrap_err(),
        TableError::DatabaseShutDown { .. }
    ));

    assert!(!temp_dir.path().join("late.json").exists());
    assert!(!temp_dir.path().join(".metadata").join("late.config.json").exists());

    // A second shutdown, like the one on drop, does nothing
    db.shutdown().unwrap();
}

#[test]
fn tables_opened_during_shutdown_are_shut_down() {
    let temp_dir = TempDir::new().unwrap();
    let db = Arc::new(open(config(temp_dir.path())));

    let openers: Vec<_> = (0..8)
        .map(|i| {
            let db = Arc::clone(&db);
            thread::spawn(move || db.table(&format!("t{}", i), IdType::Integer))
        })
        .collect();
    db.shutdown().unwrap();

    for opener in openers {
        match opener.join().unwrap() {
            Ok(table) => assert!(matches!(
                table.insert(json!({})).unwrap_err(),
                TableError::ShutDown { .. }
            )),
            Err(e) => assert!(matches!(e, TableError::ShutDown { .. })),
        }
    }
}

#[test]
fn flush_saves_every_table_before_reporting_a_failure() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = config(temp_dir.path());
    config.tables.insert("a".to_string(), integer_id_shards());
    config.tables.insert("b".to_string(), integer_id_shards());
    let db = open(config);

    let a = db.table("a", IdType::Integer).unwrap();
    let b = db.table("b", IdType::Integer).unwrap();
    a.insert(json!({ "n": 1 })).unwrap();
    b.insert(json!({ "n": 1 })).unwrap();

    let metadata_dir = temp_dir.path().join(".metadata");
    let b_before = fs::read_to_string(metadata_dir.join("b.config.json")).unwrap();

    // Table a's metadata can no longer be rewritten
    let blocker = metadata_dir.join("a.config.tmp");
    fs::create_dir(&blocker).unwrap();

    assert!(matches!(db.flush().unwrap_err(), TableError::Storage(_)));
    let b_after = fs::read_to_string(metadata_dir.join("b.config.json")).unwrap();
    assert_ne!(b_before, b_after);

    fs::remove_dir(&blocker).unwrap();
    db.flush().unwrap();
}
