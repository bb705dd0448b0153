//! Persisted records: visualizer configs, processing status and derived files.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Implementation key used when a config does not name one.
pub const DEFAULT_IMPLEMENTATION: &str = "iframe";

/// Matching and instantiation metadata for one registered visualizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualizerConfig {
    pub id: i64,
    pub name: String,
    /// Globally unique, URL-safe identifier.
    pub shortname: String,
    pub active: bool,
    /// Higher is preferred.
    pub priority: i64,
    /// Regex patterns; empty matches any mimetype.
    pub mime_types: Vec<String>,
    /// Glob-like patterns; `"*"` matches every extension.
    pub extensions: Vec<String>,
    pub processing_mime_types: Vec<String>,
    pub processing_extensions: Vec<String>,
    /// Statuses that disqualify a resource from a processing match.
    pub processing_status_exclude: Vec<String>,
    pub icon: Option<String>,
    pub description: Option<String>,
    pub options: BTreeMap<String, String>,
    /// Registry key of the implementation, e.g. `"pdf"` or `"on_demand"`.
    pub visualizer: String,
}

impl VisualizerConfig {
    /// A fresh, unsaved config. `id` is assigned by the store.
    pub fn new(name: impl Into<String>, shortname: impl Into<String>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            shortname: shortname.into(),
            active: true,
            priority: 0,
            mime_types: Vec::new(),
            extensions: Vec::new(),
            processing_mime_types: Vec::new(),
            processing_extensions: Vec::new(),
            processing_status_exclude: Vec::new(),
            icon: None,
            description: None,
            options: BTreeMap::new(),
            visualizer: DEFAULT_IMPLEMENTATION.to_string(),
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_mime_types<I, S>(mut self, mime_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mime_types = mime_types.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_processing<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.processing_extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_visualizer(mut self, key: impl Into<String>) -> Self {
        self.visualizer = key.into();
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// Whether this config participates in the visualization map.
    pub fn has_visualization_criteria(&self) -> bool {
        !self.mime_types.is_empty() || !self.extensions.is_empty()
    }

    /// Whether this config participates in the processing map.
    pub fn has_processing_criteria(&self) -> bool {
        !self.processing_mime_types.is_empty() || !self.processing_extensions.is_empty()
    }
}

/// State of derived-file generation for one resource/visualizer pair.
///
/// `Loading` is entered on enqueue; `Ready` and `Error` are terminal until
/// the resource is reprocessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingState {
    Loading,
    Ready,
    Error,
}

impl ProcessingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "loading" => Ok(Self::Loading),
            "ready" => Ok(Self::Ready),
            "error" => Ok(Self::Error),
            _ => Err(format!("Invalid processing status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingStatus {
    pub resource_id: String,
    pub config_id: i64,
    pub status: ProcessingState,
    pub updated_at: String,
}

/// A derived file produced by a processing visualizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedFile {
    pub id: i64,
    pub resource_id: String,
    pub config_id: i64,
    pub filename: String,
    /// Render query key under which this file's URL is exposed.
    pub query_param: String,
    /// SHA-256 of the source bytes the file was derived from.
    pub source_hash: String,
    /// Object store key holding the bytes.
    pub storage_key: String,
    pub complete: bool,
    pub created_at: String,
}

/// Fields needed to allocate a new derived file record.
#[derive(Debug, Clone)]
pub struct NewProcessedFile {
    pub resource_id: String,
    pub config_id: i64,
    pub filename: String,
    pub query_param: String,
    pub source_hash: String,
    pub storage_key: String,
}
