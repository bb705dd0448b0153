//! Configuration view and validation commands: `vulcan-visualize config`.

use anyhow::Result;

use vulcan_visualize::config::VisualizeConfig;

use super::super::ConfigCommands;

pub fn cmd_config(config: &VisualizeConfig, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = config.config_file();
    let toml = &config.toml;

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Visualizer Configuration");
            println!("========================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No visualize.toml found at {}", config_path.display());
                println!("Using default configuration.");
            }
            println!();

            println!("[service]");
            println!("  env = \"{}\"", toml.service.env);
            println!("  storage_url = \"{}\"", toml.service.storage_url);
            println!("  content_base = \"{}\"", toml.service.content_base);
            println!("  artifact_url = \"{}\"", toml.service.artifact_url);
            println!();
            println!("[matcher]");
            println!("  lru_capacity = {}", toml.matcher.lru_capacity);
            println!();
            println!("[processing]");
            println!("  max_attempts = {}", toml.processing.max_attempts);
            println!("  concurrency = {}", toml.processing.concurrency);
            println!();
            println!("[logging]");
            println!("  level = \"{}\"", toml.logging.level);
            println!("  format = \"{:?}\"", toml.logging.format);
            if let Some(dir) = &toml.logging.dir {
                println!("  dir = \"{}\"", dir);
            }
            println!();

            if !toml.visualizers.is_empty() {
                println!("Static visualizers: {}", toml.visualizers.len());
                println!();
            }

            // Effective values include env and CLI overrides
            println!("Effective values (with env/CLI overrides):");
            println!("  env = \"{}\"", config.env());
            println!("  database = \"{}\"", config.database_path().display());
            println!("  storage_dir = \"{}\"", config.storage_dir().display());
            println!("  log_level = \"{}\"", config.log_level());
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No visualize.toml found. Using defaults (valid).");
                return Ok(());
            }

            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
    }

    Ok(())
}
