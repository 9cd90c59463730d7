//! SHELF CLI
//!
//! Command-line interface for SHELF - inspect and edit the tables of a data
//! directory.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use shelf_core::{Config, Database, IdType, TableError};

mod commands;
mod output;

use commands::row::parse_id_type;
use output::{Output, OutputFormat};

/// Environment variable holding the log level or a full filter directive
const LOG_ENV: &str = "SHELF_LOG";

#[derive(Parser)]
#[command(name = "shelf")]
#[command(about = "SHELF - Embedded, range-sharded document store")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Config file to use instead of the default
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Data directory, overriding the config file
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect tables
    Table {
        #[command(subcommand)]
        command: TableCommands,
    },
    /// Read and write rows
    Row {
        #[command(subcommand)]
        command: RowCommands,
    },
    /// Show configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Show the data directory and its tables
    Status,
}

#[derive(Subcommand)]
enum TableCommands {
    /// List all tables
    #[command(alias = "ls")]
    List,
    /// Show a table's engine, generator and size
    Info {
        /// Table name
        name: String,
        /// Id type to open the table with
        #[arg(short = 't', long, value_parser = parse_id_type)]
        id_type: Option<IdType>,
    },
}

#[derive(Subcommand)]
enum RowCommands {
    /// Insert a row
    #[command(alias = "add")]
    Insert {
        /// Table name
        table: String,
        /// Row data as a JSON document
        data: String,
        /// Row id; generated when omitted
        #[arg(long)]
        id: Option<String>,
        /// Id type to open the table with
        #[arg(short = 't', long, value_parser = parse_id_type)]
        id_type: Option<IdType>,
    },
    /// Show a row
    Get {
        /// Table name
        table: String,
        /// Row id
        id: String,
        /// Id type to open the table with
        #[arg(short = 't', long, value_parser = parse_id_type)]
        id_type: Option<IdType>,
    },
    /// List rows matching filters
    #[command(alias = "ls")]
    Query {
        /// Table name
        table: String,
        /// Filter such as `age>=30`; repeat to combine
        #[arg(short = 'w', long = "where", value_name = "FILTER")]
        filter: Vec<String>,
        /// Id type to open the table with
        #[arg(short = 't', long, value_parser = parse_id_type)]
        id_type: Option<IdType>,
    },
    /// Delete a row, or every row matching filters
    #[command(alias = "rm")]
    Delete {
        /// Table name
        table: String,
        /// Row id
        id: Option<String>,
        /// Filter such as `age>=30`; repeat to combine
        #[arg(short = 'w', long = "where", value_name = "FILTER", conflicts_with = "id")]
        filter: Vec<String>,
        /// Id type to open the table with
        #[arg(short = 't', long, value_parser = parse_id_type)]
        id_type: Option<IdType>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
}

fn main() -> Result<()> {
    let result = run(Cli::parse());
    if let Some(hint) = result.as_ref().err().and_then(recovery_hint) {
        eprintln!("Hint: {}", hint);
    }
    result
}

fn run(cli: Cli) -> Result<()> {
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    let config = load_config(cli.config.as_ref(), cli.data_dir)?;
    init_logging(&config);

    // Commands that don't need the database
    if let Commands::Config { command } = &cli.command {
        return match command {
            Some(ConfigCommands::Show) | None => {
                commands::config::show(&config, cli.config.as_ref(), &output)
            }
        };
    }

    let db = Database::open(config).context("Failed to open database")?;

    let result = match cli.command {
        Commands::Table { command } => handle_table_command(command, &db, &output),
        Commands::Row { command } => handle_row_command(command, &db, &output),
        Commands::Status => commands::status::show(&db, &output),
        Commands::Config { .. } => unreachable!(), // Handled above
    };

    // Persist generator state even when the command failed
    db.shutdown().context("Failed to shut down database")?;
    result
}

fn handle_table_command(command: TableCommands, db: &Database, output: &Output) -> Result<()> {
    match command {
        TableCommands::List => commands::table::list(db, output),
        TableCommands::Info { name, id_type } => commands::table::info(db, &name, id_type, output),
    }
}

fn handle_row_command(command: RowCommands, db: &Database, output: &Output) -> Result<()> {
    match command {
        RowCommands::Insert {
            table,
            data,
            id,
            id_type,
        } => commands::row::insert(db, &table, id_type, id, &data, output),
        RowCommands::Get { table, id, id_type } => {
            commands::row::get(db, &table, id_type, &id, output)
        }
        RowCommands::Query {
            table,
            filter,
            id_type,
        } => commands::row::query(db, &table, id_type, &filter, output),
        RowCommands::Delete {
            table,
            id,
            filter,
            id_type,
        } => commands::row::delete(db, &table, id_type, id, &filter, output),
    }
}

/// Suggestion for the first table error in the chain that has one
fn recovery_hint(err: &anyhow::Error) -> Option<&'static str> {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<TableError>())
        .find_map(TableError::recovery_suggestion)
}

/// Load the config file, then apply the `--data-dir` override
fn load_config(config_path: Option<&PathBuf>, data_dir: Option<PathBuf>) -> Result<Config> {
    let mut config = match config_path {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;

    if let Some(dir) = data_dir {
        config.data_dir = dir;
    }
    Ok(config)
}

/// Log to the configured file, or to stderr
///
/// `SHELF_LOG` holds either a level (`debug`) applied to both crates or a
/// full filter directive. Logging defaults to warnings only.
fn init_logging(config: &Config) {
    let env_filter = match std::env::var(LOG_ENV) {
        Ok(value) if value.contains('=') => EnvFilter::new(value),
        Ok(level) => EnvFilter::new(format!("shelf_core={},shelf={}", level, level)),
        Err(_) => EnvFilter::new("shelf_core=warn,shelf=warn"),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false);

    match &config.log_file {
        Some(path) => {
            let log_file = match File::options().create(true).append(true).open(path) {
                Ok(f) => f,
                Err(e) => {
                    eprintln!("Warning: Could not open log file {:?}: {}", path, e);
                    return;
                }
            };
            let _ = builder
                .with_ansi(false)
                .with_writer(Mutex::new(log_file))
                .try_init();
            info!("Logging to {:?}", path);
        }
        None => {
            let _ = builder.with_writer(std::io::stderr).try_init();
        }
    }
}
