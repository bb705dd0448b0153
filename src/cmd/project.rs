//! Project initialization command.

use anyhow::{Context, Result};

use vulcan_visualize::config::{CONFIG_DIR, CONFIG_FILE, VisualizeConfig, VisualizeToml};

const STATIC_VISUALIZER_EXAMPLE: &str = r#"
# Static visualizers are registered on every start. Keys follow the bundle manifest.
#
# [[visualizers]]
# name = "Log Redactor"
# visualizer = "on_demand"
# processing_extensions = ["*.log"]
# processor = "substitute"
# substitutions = [["password=\\S+", "password=***"]]
"#;

pub fn cmd_init(project_dir: &std::path::Path, force: bool) -> Result<()> {
    let vulcan_dir = project_dir.join(CONFIG_DIR);
    let config_path = vulcan_dir.join(CONFIG_FILE);

    if config_path.exists() && !force {
        println!("Already initialized: {}", config_path.display());
        println!("Use --force to overwrite visualize.toml.");
        return Ok(());
    }

    std::fs::create_dir_all(&vulcan_dir)
        .with_context(|| format!("Failed to create {}", vulcan_dir.display()))?;
    let mut content =
        toml::to_string_pretty(&VisualizeToml::default()).context("Failed to serialize visualize.toml")?;
    content.push_str(STATIC_VISUALIZER_EXAMPLE);
    std::fs::write(&config_path, content)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    let config = VisualizeConfig::new(project_dir.to_path_buf())?;
    config.ensure_directories()?;

    println!("Initialized visualizer project at {}", config.vulcan_dir.display());
    println!();
    println!("  {}/", CONFIG_DIR);
    println!("  ├── {}   # Service, matcher, processing and logging settings", CONFIG_FILE);
    println!("  ├── visualize.db     # Visualizer configs and processing state");
    println!("  └── storage/         # Bundles and derived files");
    println!();
    println!("Next steps:");
    println!("  1. Run `vulcan-visualize upload <bundle>` to install a visualizer");
    println!("  2. Run `vulcan-visualize render <file>` to render a project file");

    Ok(())
}
