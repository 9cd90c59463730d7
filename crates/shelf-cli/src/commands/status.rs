//! Status command handler

use anyhow::Result;
use serde_json::json;

use shelf_core::{Database, TableStats};

use crate::output::{human_size, print_json, Output, OutputFormat};

/// Show the data directory and every table whose id type is known
pub fn show(db: &Database, output: &Output) -> Result<()> {
    let config = db.config();
    let names = db.table_names()?;

    let mut stats: Vec<TableStats> = Vec::new();
    let mut unopened: Vec<&str> = Vec::new();
    for name in &names {
        match db.configured_id_type(name) {
            Some(id_type) => stats.push(db.table(name, id_type)?.stats()?),
            None => unopened.push(name),
        }
    }
    let total_rows: usize = stats.iter().map(|s| s.engine.rows).sum();
    let total_size: u64 = stats.iter().map(|s| s.engine.size_bytes).sum();

    match output.format {
        OutputFormat::Json => print_json(&json!({
            "data_dir": config.data_dir,
            "metadata_dir": config.metadata_path(),
            "tables": stats,
            "unopened": unopened,
            "rows": total_rows,
            "size_bytes": total_size,
        })),
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            println!("SHELF Status");
            println!("============");
            println!();
            println!("Storage:");
            println!("  Location: {}", config.data_dir.display());
            println!("  Metadata: {}", config.metadata_path().display());
            println!("  Size:     {}", human_size(total_size));
            println!();
            println!("Tables ({}):", names.len());
            for s in &stats {
                let engine = if s.sharded {
                    format!("{} partition(s)", s.engine.partitions)
                } else {
                    s.engine.kind.clone()
                };
                println!(
                    "  {:20} {:8} {:>8} row(s)  {}",
                    s.name, s.id_type, s.engine.rows, engine
                );
            }
            for name in &unopened {
                println!("  {:20} (id type unknown)", name);
            }
        }
    }

    Ok(())
}
