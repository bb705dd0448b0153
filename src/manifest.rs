//! Visualizer bundles: a `manifest.json` plus a root-relative file tree.
//!
//! The manifest is a flat JSON object. Recognized keys populate the
//! config; implementation option keys land in `options`; anything else is
//! logged and ignored.

use std::io::{Cursor, Read};
use std::path::Path;

use serde_json::{Map, Value};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::errors::ManifestError;
use crate::mapping::{compile_mime_pattern, validate_extension_pattern};
use crate::model::{ProcessingState, VisualizerConfig};

pub const MANIFEST_FILE: &str = "manifest.json";
const SHORTNAME_MAX_LEN: usize = 64;

/// Manifest keys copied into the config's option bag.
pub const OPTION_KEYS: &[&str] = &[
    "entry_point",
    "diff_entry_point",
    "content_url",
    "viewer_url",
    "default_page",
    "max_bytes",
    "language",
    "processor",
    "command",
    "output_extension",
    "query_param",
    "substitutions",
    "timeout_secs",
];

/// A parsed bundle ready to be stored.
#[derive(Debug, Clone)]
pub struct Bundle {
    pub config: VisualizerConfig,
    /// Root-relative path and bytes of every non-manifest file.
    pub files: Vec<(String, Vec<u8>)>,
}

/// Convert a title to a URL-safe slug, limited to `max_len` characters.
pub fn slugify(title: &str, max_len: usize) -> String {
    let slug: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if slug.len() > max_len {
        slug[..slug.floor_char_boundary(max_len)]
            .trim_end_matches('-')
            .to_string()
    } else {
        slug
    }
}

/// `"Foo Visualizer"` becomes `"foo"`.
pub fn derive_shortname(name: &str) -> String {
    slugify(&name.to_lowercase().replace("visualizer", ""), SHORTNAME_MAX_LEN)
}

fn invalid(key: &str, message: impl Into<String>) -> ManifestError {
    ManifestError::InvalidField {
        key: key.to_string(),
        message: message.into(),
    }
}

fn string_field(key: &str, value: &Value) -> Result<String, ManifestError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(invalid(key, "expected a string")),
    }
}

/// Lists accept an array of strings or a single string.
fn list_field(key: &str, value: &Value) -> Result<Vec<String>, ManifestError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Array(items) => items.iter().map(|v| string_field(key, v)).collect(),
        _ => Err(invalid(key, "expected a list of strings")),
    }
}

/// Option values keep strings as-is; structured values are stored as JSON.
fn option_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Build a config from a manifest object.
///
/// `default_visualizer` is used when the manifest has no `visualizer` key.
pub fn parse_manifest_value(value: &Value, default_visualizer: &str) -> Result<VisualizerConfig, ManifestError> {
    let Value::Object(map) = value else {
        return Err(invalid("manifest", "expected a JSON object"));
    };
    let name = match map.get("name") {
        Some(v) => string_field("name", v)?,
        None => return Err(invalid("name", "missing")),
    };
    if name.trim().is_empty() {
        return Err(invalid("name", "must not be empty"));
    }

    let shortname = match map.get("shortname") {
        Some(v) => {
            let raw = string_field("shortname", v)?;
            if slugify(&raw, SHORTNAME_MAX_LEN) != raw {
                return Err(invalid("shortname", format!("'{}' is not URL-safe", raw)));
            }
            raw
        }
        None => derive_shortname(&name),
    };
    if shortname.is_empty() {
        return Err(invalid("shortname", format!("cannot derive a shortname from '{}'", name)));
    }

    let mut config = VisualizerConfig::new(name.trim(), shortname).with_visualizer(default_visualizer);
    apply_fields(&mut config, map)?;
    validate_patterns(&config)?;
    debug!(shortname = %config.shortname, visualizer = %config.visualizer, "Parsed manifest");
    Ok(config)
}

fn apply_fields(config: &mut VisualizerConfig, map: &Map<String, Value>) -> Result<(), ManifestError> {
    for (key, value) in map {
        match key.as_str() {
            "name" | "shortname" => {}
            "mime_types" => config.mime_types = list_field(key, value)?,
            "extensions" => config.extensions = list_field(key, value)?,
            "processing_mime_types" => config.processing_mime_types = list_field(key, value)?,
            "processing_extensions" => config.processing_extensions = list_field(key, value)?,
            "processing_status_exclude" => {
                let statuses = list_field(key, value)?;
                for status in &statuses {
                    status
                        .parse::<ProcessingState>()
                        .map_err(|e| invalid(key, e))?;
                }
                config.processing_status_exclude = statuses;
            }
            "priority" => {
                config.priority = match value {
                    Value::Number(n) => n.as_i64().ok_or_else(|| invalid(key, "expected an integer"))?,
                    Value::String(s) => s
                        .trim()
                        .parse()
                        .map_err(|_| invalid(key, "expected an integer"))?,
                    _ => return Err(invalid(key, "expected an integer")),
                }
            }
            "active" => {
                config.active = value
                    .as_bool()
                    .ok_or_else(|| invalid(key, "expected a boolean"))?
            }
            "description" => config.description = Some(string_field(key, value)?),
            "icon" => config.icon = Some(string_field(key, value)?),
            "visualizer" => config.visualizer = string_field(key, value)?,
            "options" => {
                let Value::Object(options) = value else {
                    return Err(invalid(key, "expected an object"));
                };
                for (k, v) in options {
                    config.options.insert(k.clone(), option_value(v));
                }
            }
            k if OPTION_KEYS.contains(&k) => {
                config.options.insert(k.to_string(), option_value(value));
            }
            other => {
                warn!(shortname = %config.shortname, key = other, "Ignoring unrecognized manifest key");
            }
        }
    }
    Ok(())
}

fn validate_patterns(config: &VisualizerConfig) -> Result<(), ManifestError> {
    for (key, patterns) in [
        ("mime_types", &config.mime_types),
        ("processing_mime_types", &config.processing_mime_types),
    ] {
        for pattern in patterns {
            compile_mime_pattern(pattern).map_err(|e| invalid(key, e.to_string()))?;
        }
    }
    for (key, patterns) in [
        ("extensions", &config.extensions),
        ("processing_extensions", &config.processing_extensions),
    ] {
        for pattern in patterns {
            validate_extension_pattern(pattern).map_err(|e| invalid(key, e.to_string()))?;
        }
    }
    // Mimetype patterns are only consulted for entries carrying the "*" extension.
    for (key, mime_types, extensions) in [
        ("mime_types", &config.mime_types, &config.extensions),
        ("processing_mime_types", &config.processing_mime_types, &config.processing_extensions),
    ] {
        if !mime_types.is_empty() && extensions.is_empty() {
            return Err(invalid(
                key,
                "mimetype patterns need at least one extension pattern; add \"*\" to match on mimetype alone",
            ));
        }
    }
    Ok(())
}

/// Parse raw `manifest.json` bytes.
pub fn parse_manifest(bytes: &[u8], default_visualizer: &str) -> Result<VisualizerConfig, ManifestError> {
    let value: Value = serde_json::from_slice(bytes).map_err(ManifestError::Malformed)?;
    parse_manifest_value(&value, default_visualizer)
}

/// If every entry sits under one top-level directory, strip it.
fn strip_common_root(entries: &mut Vec<(String, Vec<u8>)>) {
    let Some(first) = entries.first() else {
        return;
    };
    let Some((root, _)) = first.0.split_once('/') else {
        return;
    };
    let prefix = format!("{}/", root);
    if entries.iter().all(|(path, _)| path.starts_with(&prefix)) {
        for (path, _) in entries.iter_mut() {
            *path = path[prefix.len()..].to_string();
        }
    }
}

fn into_bundle(mut entries: Vec<(String, Vec<u8>)>, default_visualizer: &str) -> Result<Bundle, ManifestError> {
    if !entries.iter().any(|(p, _)| p == MANIFEST_FILE) {
        strip_common_root(&mut entries);
    }
    let Some(index) = entries.iter().position(|(p, _)| p == MANIFEST_FILE) else {
        return Err(ManifestError::MissingManifest);
    };
    let (_, manifest) = entries.swap_remove(index);
    let config = parse_manifest(&manifest, default_visualizer)?;
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(Bundle { config, files: entries })
}

/// Read a zip archive uploaded by an administrator.
pub fn read_zip_bundle(bytes: &[u8], default_visualizer: &str) -> Result<Bundle, ManifestError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ManifestError::Archive(format!("Failed to read ZIP archive: {}", e)))?;
    let mut entries = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| ManifestError::Archive(format!("Failed to read entry {}: {}", i, e)))?;
        if file.is_dir() {
            continue;
        }
        let Some(path) = file.enclosed_name() else {
            return Err(ManifestError::Archive(format!("Unsafe path in archive: {}", file.name())));
        };
        let path = path
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        let mut data = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut data)?;
        entries.push((path, data));
    }
    into_bundle(entries, default_visualizer)
}

/// Read an unpacked bundle directory.
pub fn read_directory_bundle(dir: &Path, default_visualizer: &str) -> Result<Bundle, ManifestError> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry.map_err(|e| ManifestError::Archive(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(dir) else {
            continue;
        };
        let path = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        entries.push((path, std::fs::read(entry.path())?));
    }
    into_bundle(entries, default_visualizer)
}
