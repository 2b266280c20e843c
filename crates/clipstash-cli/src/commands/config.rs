//! Config command handlers

use std::path::PathBuf;

use anyhow::{Context, Result};

use clipstash_core::Config;

use crate::output::{Output, OutputFormat};

fn or_unset(value: Option<String>) -> String {
    value.unwrap_or_else(|| "(not set)".to_string())
}

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "data_dir": config.data_dir,
                    "backend": config.backend.to_string(),
                    "local_item_limit": config.local_item_limit,
                    "local_ttl": config.local_ttl.map(|t| t.to_string()),
                    "cloud_settle_ms": config.cloud_settle_ms,
                    "log_file": config.log_file
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            println!("Configuration:");
            println!("  data_dir:         {}", config.data_dir.display());
            println!("  backend:          {}", config.backend);
            println!(
                "  local_item_limit: {}",
                or_unset(config.local_item_limit.map(|n| n.to_string()))
            );
            println!(
                "  local_ttl:        {}",
                or_unset(config.local_ttl.map(|t| t.to_string()))
            );
            println!("  cloud_settle_ms:  {}", config.cloud_settle_ms);
            println!(
                "  log_file:         {}",
                or_unset(config.log_file.as_ref().map(|p| p.display().to_string()))
            );
            println!();
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(
    key: String,
    value: String,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    config.set_value(&key, &value)?;

    // Save to the CLI-specified path or default
    let save_path = config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path);
    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));

    Ok(())
}
