//! Config command handlers

use std::path::PathBuf;

use anyhow::Result;

use shelf_core::Config;

use crate::output::{print_json, Output, OutputFormat};

/// Show the effective configuration
pub fn show(config: &Config, config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    match output.format {
        OutputFormat::Json => print_json(config),
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            println!("Configuration:");
            println!("  data_dir:              {}", config.data_dir.display());
            println!("  metadata_dir:          {}", config.metadata_path().display());
            println!(
                "  id_generator_strategy: {}",
                config.id_generator_strategy.join(", ")
            );
            match config.flush_interval() {
                Some(interval) => {
                    println!("  flush_interval_secs:   {}", interval.as_secs())
                }
                None => println!("  flush_interval_secs:   (disabled)"),
            }
            println!(
                "  log_file:              {}",
                config
                    .log_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(not set)".to_string())
            );

            if !config.tables.is_empty() {
                println!();
                println!("Tables:");
                for (name, table) in &config.tables {
                    let generator = table.id_generator.as_deref().unwrap_or("(strategy)");
                    let id_type = table
                        .id_type
                        .map(|t| t.to_string())
                        .unwrap_or_else(|| "(any)".to_string());
                    let sharded = if table.is_sharded() { ", sharded" } else { "" };
                    println!("  {}: {} ids, {} generator{}", name, id_type, generator, sharded);
                }
            }
            println!();
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}
