//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use serde::Serialize;
use serde_json::{Map, Value};

use shelf_core::{Row, TableStats};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// Check if output is in quiet mode
    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    /// Print a single row
    pub fn print_row(&self, row: &Row) {
        match self.format {
            OutputFormat::Human => {
                println!("ID:   {}", row.id);
                println!("Data: {}", pretty(&row.data));
            }
            OutputFormat::Json => print_json(row),
            OutputFormat::Quiet => println!("{}", row.id),
        }
    }

    /// Print a list of rows
    pub fn print_rows(&self, rows: &[Row]) {
        match self.format {
            OutputFormat::Human => {
                if rows.is_empty() {
                    println!("No rows found.");
                    return;
                }
                let width = rows.iter().map(|row| row.id.len()).max().unwrap_or(0);
                for row in rows {
                    println!(
                        "{:width$} | {}",
                        row.id,
                        truncate(&row.data.to_string(), 70),
                        width = width
                    );
                }
                println!("\n{} row(s)", rows.len());
            }
            OutputFormat::Json => print_json(&rows),
            OutputFormat::Quiet => {
                for row in rows {
                    println!("{}", row.id);
                }
            }
        }
    }

    /// Print table names
    pub fn print_table_names(&self, names: &[String]) {
        match self.format {
            OutputFormat::Human => {
                if names.is_empty() {
                    println!("No tables found.");
                    return;
                }
                for name in names {
                    println!("{}", name);
                }
                println!("\n{} table(s)", names.len());
            }
            OutputFormat::Json => print_json(&names),
            OutputFormat::Quiet => {
                for name in names {
                    println!("{}", name);
                }
            }
        }
    }

    /// Print the stats of an open table
    pub fn print_table_stats(&self, stats: &TableStats) {
        match self.format {
            OutputFormat::Human => {
                println!("Table:        {}", stats.name);
                println!("Id type:      {}", stats.id_type);
                println!("Id generator: {}", stats.id_generator);
                println!("Engine:       {}", stats.engine.kind);
                if stats.sharded {
                    println!("Partitions:   {}", stats.engine.partitions);
                }
                println!("Rows:         {}", stats.engine.rows);
                println!("Size:         {}", human_size(stats.engine.size_bytes));
            }
            OutputFormat::Json => print_json(stats),
            OutputFormat::Quiet => println!("{}", stats.engine.rows),
        }
    }

    /// Print what the metadata of an unopened table says about its engine
    pub fn print_engine_fragment(&self, table: &str, fragment: &Map<String, Value>) {
        match self.format {
            OutputFormat::Human => {
                println!("Table:  {}", table);
                match fragment.get("kind").and_then(Value::as_str) {
                    Some(kind) => println!("Engine: {}", kind),
                    None => println!("Engine: (unknown)"),
                }
                if let Some(partitions) = fragment.get("partitions").and_then(Value::as_array) {
                    println!("Partitions: {}", partitions.len());
                }
                println!();
                println!("Pass --id-type to open the table and show its rows.");
            }
            OutputFormat::Json => {
                print_json(&serde_json::json!({ "name": table, "engine": fragment }));
            }
            OutputFormat::Quiet => println!("{}", table),
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to serialize output: {}", e),
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Truncate a string to max length, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len - 3).collect();
        format!("{}...", kept)
    }
}

/// Format a byte count
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_flags() {
        assert_eq!(OutputFormat::from_flags(false, false), OutputFormat::Human);
        assert_eq!(OutputFormat::from_flags(true, false), OutputFormat::Json);
        assert_eq!(OutputFormat::from_flags(false, true), OutputFormat::Quiet);
        // Quiet takes precedence
        assert_eq!(OutputFormat::from_flags(true, true), OutputFormat::Quiet);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a long string", 10), "this is...");
        assert_eq!(truncate("ééééééééééé", 5), "éé...");
    }

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(2048), "2.0 KB");
        assert_eq!(human_size(5 * 1024 * 1024), "5.0 MB");
    }
}
