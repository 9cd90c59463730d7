//! Table command handlers

use anyhow::{bail, Result};

use shelf_core::{Database, IdType};

use crate::commands::row::open_table;
use crate::output::Output;

/// List every table with metadata in the data directory
pub fn list(db: &Database, output: &Output) -> Result<()> {
    let names = db.table_names()?;
    output.print_table_names(&names);
    Ok(())
}

/// Show a table's stats, or only its engine metadata when its id type is unknown
pub fn info(db: &Database, name: &str, id_type: Option<IdType>, output: &Output) -> Result<()> {
    if !db.table_exists(name) {
        bail!("Table not found: {}", name);
    }

    if id_type.is_none() && db.configured_id_type(name).is_none() {
        let metadata = db.inspect_table(name);
        output.print_engine_fragment(name, metadata.engine_metadata());
        return Ok(());
    }

    let table = open_table(db, name, id_type)?;
    output.print_table_stats(&table.stats()?);
    Ok(())
}
