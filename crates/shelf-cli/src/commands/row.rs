//! Row command handlers

use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use serde_json::Value;

use shelf_core::{CompareOp, Database, FieldPath, IdType, Query, Row, Table};

use crate::output::Output;

/// Insert a row, generating its id unless one is given
pub fn insert(
    db: &Database,
    table: &str,
    id_type: Option<IdType>,
    id: Option<String>,
    data: &str,
    output: &Output,
) -> Result<()> {
    let table = open_table(db, table, id_type)?;
    let data: Value = serde_json::from_str(data).context("Row data is not valid JSON")?;

    let id = match id {
        Some(id) => {
            let id = table.parse_id(&id)?;
            table
                .insert_with_id(&id, data)
                .context("Failed to insert row")?;
            id
        }
        None => table.insert(data).context("Failed to insert row")?,
    };

    if output.is_quiet() {
        println!("{}", id);
    } else {
        output.success(&format!("Inserted row {} into '{}'", id, table.name()));
    }
    Ok(())
}

/// Show a single row
pub fn get(
    db: &Database,
    table: &str,
    id_type: Option<IdType>,
    id: &str,
    output: &Output,
) -> Result<()> {
    let table = open_table(db, table, id_type)?;
    let parsed = table.parse_id(id)?;

    let data = table
        .find(&parsed)?
        .ok_or_else(|| anyhow!("Row not found: {}", id))?;
    output.print_row(&Row::new(id, data));
    Ok(())
}

/// List rows matching every filter, ordered by id
pub fn query(
    db: &Database,
    table: &str,
    id_type: Option<IdType>,
    filters: &[String],
    output: &Output,
) -> Result<()> {
    let table = open_table(db, table, id_type)?;
    let query = build_query(filters)?;

    let mut rows = table.query(&query)?;
    rows.sort_by_cached_key(|row| table.parse_id(&row.id).ok());
    output.print_rows(&rows);
    Ok(())
}

/// Delete a row by id, or every row matching the filters
pub fn delete(
    db: &Database,
    table: &str,
    id_type: Option<IdType>,
    id: Option<String>,
    filters: &[String],
    output: &Output,
) -> Result<()> {
    let table = open_table(db, table, id_type)?;

    match id {
        Some(id) => {
            let parsed = table.parse_id(&id)?;
            table.delete(&parsed).context("Failed to delete row")?;
            output.success(&format!("Deleted row {}", id));
        }
        None if filters.is_empty() => {
            bail!("Give a row id or at least one --where filter");
        }
        None => {
            let deleted = table.delete_all(&build_query(filters)?)?;
            output.success(&format!("Deleted {} row(s)", deleted));
        }
    }
    Ok(())
}

/// Open `name` with the given id type, or the one its configuration records
pub fn open_table(db: &Database, name: &str, id_type: Option<IdType>) -> Result<Arc<Table>> {
    let table = match id_type.or_else(|| db.configured_id_type(name)) {
        Some(id_type) => db.table(name, id_type),
        None => bail!(
            "No id type known for table '{}'. Pass --id-type or set it under [tables.{}] in the config file",
            name,
            name
        ),
    };
    table.with_context(|| format!("Failed to open table '{}'", name))
}

/// Parse an id type name as written in the config file
pub fn parse_id_type(value: &str) -> Result<IdType, String> {
    serde_json::from_value(Value::String(value.to_lowercase())).map_err(|_| {
        format!(
            "unknown id type '{}' (expected string, integer, long, date or uuid)",
            value
        )
    })
}

fn build_query(filters: &[String]) -> Result<Query> {
    let mut parsed = filters.iter().map(|f| parse_filter(f));
    let Some(first) = parsed.next() else {
        return Ok(Query::All);
    };
    parsed.try_fold(first?, |query, next| Ok(query.and(next?)))
}

/// Parse `<field><op><value>`, e.g. `age>=30` or `id=7`
///
/// `id` names the row id; any other field is a path into the row, written
/// either as a JSON pointer or with dots. Values are read as JSON and fall
/// back to a plain string.
fn parse_filter(filter: &str) -> Result<Query> {
    const OPS: [(&str, CompareOp); 6] = [
        (">=", CompareOp::Ge),
        ("<=", CompareOp::Le),
        ("!=", CompareOp::Ne),
        ("=", CompareOp::Eq),
        (">", CompareOp::Gt),
        ("<", CompareOp::Lt),
    ];

    let (at, token, op) = filter
        .char_indices()
        .find_map(|(i, _)| {
            OPS.iter()
                .find(|(token, _)| filter[i..].starts_with(token))
                .map(|(token, op)| (i, *token, *op))
        })
        .ok_or_else(|| anyhow!("Filter '{}' has no comparison operator", filter))?;

    let field = filter[..at].trim();
    let raw = filter[at + token.len()..].trim();
    if field.is_empty() {
        bail!("Filter '{}' has no field", filter);
    }

    let field = match field {
        "id" => FieldPath::Id,
        pointer if pointer.starts_with('/') => FieldPath::pointer(pointer),
        dotted => FieldPath::pointer(format!("/{}", dotted.replace('.', "/"))),
    };
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));

    Ok(Query::compare(field, op, value))
}
