//! Visualizer administration commands.

use std::path::Path;

use anyhow::{Context, Result, bail};

use vulcan_visualize::config::VisualizeConfig;
use vulcan_visualize::service::Services;

pub fn cmd_upload(config: VisualizeConfig, path: &Path) -> Result<()> {
    let services = Services::open(config)?;
    let saved = if path.is_dir() {
        services.admin.upload_directory(path)?
    } else {
        let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        services.admin.upload_bundle(&bytes)?
    };

    println!("Installed '{}' ({}) as id {}", saved.name, saved.shortname, saved.id);
    Ok(())
}

pub fn cmd_list(config: VisualizeConfig, all: bool) -> Result<()> {
    let services = Services::open(config)?;
    let configs = {
        let db = services.db.lock_sync()?;
        if all { db.list_configs()? } else { db.list_active_configs()? }
    };

    if configs.is_empty() {
        println!("No visualizers registered.");
        return Ok(());
    }

    println!("{:<5} {:<24} {:<10} {:>8}  {:<14} NAME", "ID", "SHORTNAME", "ACTIVE", "PRIORITY", "IMPL");
    for c in &configs {
        println!(
            "{:<5} {:<24} {:<10} {:>8}  {:<14} {}",
            c.id,
            c.shortname,
            if c.active { "yes" } else { "no" },
            c.priority,
            c.visualizer,
            c.name
        );
    }
    Ok(())
}

pub fn cmd_set_active(config: VisualizeConfig, shortname: &str, active: bool) -> Result<()> {
    let services = Services::open(config)?;
    let changed = if active {
        services.admin.activate(shortname)?
    } else {
        services.admin.deactivate(shortname)?
    };
    if !changed {
        bail!("No visualizer named '{}'", shortname);
    }

    println!("{} '{}'", if active { "Activated" } else { "Deactivated" }, shortname);
    Ok(())
}

pub fn cmd_delete(config: VisualizeConfig, shortname: &str) -> Result<()> {
    let services = Services::open(config)?;
    if !services.admin.delete(shortname)? {
        bail!("No visualizer named '{}'", shortname);
    }

    println!("Deleted '{}'", shortname);
    Ok(())
}

pub fn cmd_invalidate(config: VisualizeConfig) -> Result<()> {
    let services = Services::open(config)?;
    let token = services.admin.invalidate()?;
    println!("New cache token: {}", token);
    Ok(())
}
