//! Resolution, rendering and processing commands. Output is JSON on stdout.

use anyhow::{Context, Result, bail};
use serde::Serialize;
use serde_json::json;

use vulcan_visualize::api::Resource;
use vulcan_visualize::artifact::Artifact;
use vulcan_visualize::config::VisualizeConfig;
use vulcan_visualize::processing::reprocess;
use vulcan_visualize::service::Services;
use vulcan_visualize::visualizer::QueryParams;

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("Failed to serialize output")?);
    Ok(())
}

pub fn cmd_find(config: VisualizeConfig, filename: &str, processing: bool, resource_id: Option<&str>) -> Result<()> {
    let services = Services::open(config)?;
    let matcher = services.api.matcher();
    let ids = if processing {
        matcher.find_for_processing(filename, resource_id)
    } else {
        matcher.find_for_all(filename, resource_id)
    };

    let db = services.db.lock_sync()?;
    let mut found = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(c) = db.get_config(id)? {
            found.push(json!({
                "id": c.id,
                "shortname": c.shortname,
                "name": c.name,
                "priority": c.priority,
                "visualizer": c.visualizer,
            }));
        }
    }
    print_json(&found)
}

pub fn cmd_render(
    config: VisualizeConfig,
    path: &str,
    shortname: Option<&str>,
    full: bool,
    active: Option<&str>,
) -> Result<()> {
    let services = Services::open(config)?;
    let resource = services.resource(path)?;
    let extra = QueryParams::new();

    if full {
        let shortnames: Option<Vec<&str>> = shortname.map(|s| vec![s]);
        let rendered = services
            .api
            .full_render(&resource, shortnames.as_deref(), active, &extra)?;
        if rendered.is_empty() {
            bail!("No visualizer for {}", resource.filename());
        }
        return print_json(&rendered);
    }

    print_json(&services.api.render(&resource, shortname, &extra)?)
}

pub fn cmd_diff(config: VisualizeConfig, path: &str, other: &str, shortname: Option<&str>, full: bool) -> Result<()> {
    let services = Services::open(config)?;
    let resource = services.resource(path)?;
    let other = services.resource(other)?;
    let extra = QueryParams::new();

    if full {
        let shortnames: Option<Vec<&str>> = shortname.map(|s| vec![s]);
        let rendered = services
            .api
            .full_diff(&resource, &other, shortnames.as_deref(), None, &extra)?;
        return print_json(&rendered);
    }

    print_json(&services.api.diff(&resource, &other, shortname, &extra)?)
}

/// Queue every matching processing visualizer for a file and run the jobs to completion.
pub async fn cmd_process(config: VisualizeConfig, path: &str, shortname: Option<&str>) -> Result<()> {
    let mut services = Services::open(config)?;
    let Resource::Artifact(artifact) = services.resource(path)? else {
        bail!("Only project files can be processed, got {}", path);
    };
    let resource_id = artifact.unique_id();

    let config_ids = match shortname {
        Some(s) => {
            let Some(c) = services.db.lock_sync()?.get_config_by_shortname(s)? else {
                bail!("No visualizer named '{}'", s);
            };
            if !c.has_processing_criteria() {
                bail!("Visualizer '{}' does not process files", s);
            }
            vec![c.id]
        }
        None => services.api.matcher().find_for_processing(&artifact.filename(), None),
    };
    if config_ids.is_empty() {
        bail!("No processing visualizer for {}", artifact.filename());
    }

    let Some(queue) = services.api.context().queue.clone() else {
        bail!("Processing queue is not available");
    };
    for &config_id in &config_ids {
        reprocess(&services.db, &queue, &resource_id, config_id)?;
    }
    services.drain_jobs().await;

    let db = services.db.lock_sync()?;
    let mut results = Vec::with_capacity(config_ids.len());
    for config_id in config_ids {
        let Some(c) = db.get_config(config_id)? else {
            continue;
        };
        let status = db.get_status(&resource_id, config_id)?.map(|s| s.status);
        let files: Vec<_> = db
            .list_processed_files(&resource_id, config_id)?
            .into_iter()
            .map(|f| f.storage_key)
            .collect();
        results.push(json!({
            "shortname": c.shortname,
            "status": status,
            "files": files,
        }));
    }
    print_json(&results)
}
