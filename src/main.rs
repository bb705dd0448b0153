use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use vulcan_visualize::config::VisualizeConfig;

mod cmd;

#[derive(Parser)]
#[command(name = "vulcan-visualize")]
#[command(version, about = "Visualizer resolution, rendering and processing for VulcanForge")]
pub struct Cli {
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Environment tag for render queries. Overrides VULCAN_ENV and visualize.toml.
    #[arg(long, global = true)]
    pub env: Option<String>,

    /// Log level (trace, debug, info, warn, error). Overrides VULCAN_LOG.
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create .vulcan/visualize.toml and the stores
    Init {
        /// Overwrite an existing visualize.toml
        #[arg(long)]
        force: bool,
    },
    /// Install a visualizer bundle from a zip archive or directory
    Upload { path: PathBuf },
    /// List registered visualizers
    List {
        /// Include inactive visualizers
        #[arg(long)]
        all: bool,
    },
    /// Show visualizer ids matching a filename
    Find {
        filename: String,
        /// Only the processing map
        #[arg(long)]
        processing: bool,
        /// Resource id for processing status exclusion
        #[arg(long)]
        resource_id: Option<String>,
    },
    /// Render a project file or URL
    Render {
        path: String,
        /// Use this visualizer instead of the best match
        #[arg(short, long)]
        shortname: Option<String>,
        /// Render every matching visualizer as tabs
        #[arg(long)]
        full: bool,
        /// Tab to mark active with --full
        #[arg(long)]
        active: Option<String>,
    },
    /// Render a comparison of two project files or URLs
    Diff {
        path: String,
        other: String,
        #[arg(short, long)]
        shortname: Option<String>,
        #[arg(long)]
        full: bool,
    },
    /// Generate derived files for a project file and wait for them
    Process {
        path: String,
        /// Only this processing visualizer
        #[arg(short, long)]
        shortname: Option<String>,
    },
    /// Remove a visualizer from matching
    Deactivate { shortname: String },
    /// Return a deactivated visualizer to matching
    Activate { shortname: String },
    /// Delete a visualizer with its bundle and derived files
    Delete { shortname: String },
    /// Force every process to rebuild its pattern maps
    Invalidate,
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    if let Commands::Init { force } = &cli.command {
        return cmd::cmd_init(&project_dir, *force);
    }

    let config = VisualizeConfig::with_cli_args(project_dir, cli.env.clone(), cli.log_level.clone())?;
    let _log_guard = vulcan_visualize::logging::init(
        &config.log_level(),
        config.toml.logging.format,
        config.log_dir().as_deref(),
    )?;

    match &cli.command {
        Commands::Init { .. } => {}
        Commands::Config { command } => cmd::cmd_config(&config, command.clone())?,
        Commands::Upload { path } => cmd::cmd_upload(config, path)?,
        Commands::List { all } => cmd::cmd_list(config, *all)?,
        Commands::Find {
            filename,
            processing,
            resource_id,
        } => cmd::cmd_find(config, filename, *processing, resource_id.as_deref())?,
        Commands::Render {
            path,
            shortname,
            full,
            active,
        } => cmd::cmd_render(config, path, shortname.as_deref(), *full, active.as_deref())?,
        Commands::Diff {
            path,
            other,
            shortname,
            full,
        } => cmd::cmd_diff(config, path, other, shortname.as_deref(), *full)?,
        Commands::Process { path, shortname } => {
            cmd::cmd_process(config, path, shortname.as_deref()).await?
        }
        Commands::Deactivate { shortname } => cmd::cmd_set_active(config, shortname, false)?,
        Commands::Activate { shortname } => cmd::cmd_set_active(config, shortname, true)?,
        Commands::Delete { shortname } => cmd::cmd_delete(config, shortname)?,
        Commands::Invalidate => cmd::cmd_invalidate(config)?,
    }

    Ok(())
}
