//! Configuration for the visualizer engine.
//!
//! Settings live in `.vulcan/visualize.toml` and are layered
//! file → environment → CLI.
//!
//! # Configuration File Format
//!
//! ```toml
//! [service]
//! env = "prod"
//! database = ".vulcan/visualize.db"
//! storage_dir = ".vulcan/storage"
//! storage_url = "/storage"
//! content_base = "/visualize"
//! artifact_url = "/files"
//!
//! [matcher]
//! lru_capacity = 1024
//!
//! [processing]
//! max_attempts = 3
//! concurrency = 2
//!
//! [logging]
//! level = "info"
//! format = "json"
//! dir = ".vulcan/logs"
//!
//! [[visualizers]]
//! name = "Markdown"
//! visualizer = "markdown"
//! extensions = ["*.md", "*.markdown"]
//! priority = 5
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::manifest::parse_manifest_value;
use crate::model::DEFAULT_IMPLEMENTATION;
use crate::visualizer::VisualizerRegistry;

pub const CONFIG_DIR: &str = ".vulcan";
pub const CONFIG_FILE: &str = "visualize.toml";

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Service wiring: environment tag, stores and public URLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSection {
    /// Environment tag included in every render query
    #[serde(default = "default_env")]
    pub env: String,
    /// SQLite database path (relative to the project directory)
    #[serde(default)]
    pub database: Option<String>,
    /// Object storage root (relative to the project directory)
    #[serde(default)]
    pub storage_dir: Option<String>,
    /// Public URL prefix of object storage
    #[serde(default = "default_storage_url")]
    pub storage_url: String,
    /// Base path of the content-rendering endpoints
    #[serde(default = "default_content_base")]
    pub content_base: String,
    /// Public URL prefix of project files
    #[serde(default = "default_artifact_url")]
    pub artifact_url: String,
}

fn default_env() -> String {
    "dev".to_string()
}

fn default_storage_url() -> String {
    "/storage".to_string()
}

fn default_content_base() -> String {
    "/visualize".to_string()
}

fn default_artifact_url() -> String {
    "/files".to_string()
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            env: default_env(),
            database: None,
            storage_dir: None,
            storage_url: default_storage_url(),
            content_base: default_content_base(),
            artifact_url: default_artifact_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatcherSection {
    /// Filenames whose match lists are kept per matcher
    #[serde(default = "default_lru_capacity")]
    pub lru_capacity: usize,
}

fn default_lru_capacity() -> usize {
    1024
}

impl Default for MatcherSection {
    fn default() -> Self {
        Self {
            lru_capacity: default_lru_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingSection {
    /// Conversion attempts before a job is marked `error`
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Jobs run at the same time by one worker
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_concurrency() -> usize {
    2
}

impl Default for ProcessingSection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            concurrency: default_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Directory for daily-rolling log files; stderr only when unset
    #[serde(default)]
    pub dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            dir: None,
        }
    }
}

/// Root of `visualize.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VisualizeToml {
    #[serde(default)]
    pub service: ServiceSection,
    #[serde(default)]
    pub matcher: MatcherSection,
    #[serde(default)]
    pub processing: ProcessingSection,
    #[serde(default)]
    pub logging: LoggingSection,
    /// Static visualizers, manifest-shaped, registered at startup
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub visualizers: Vec<toml::Table>,
}

impl VisualizeToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse visualize.toml")
    }

    /// Load from `<dir>/visualize.toml`, or defaults if the file doesn't exist.
    pub fn load_or_default(vulcan_dir: &Path) -> Result<Self> {
        let config_path = vulcan_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize visualize.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Static visualizer entries as JSON manifest values.
    pub fn visualizer_values(&self) -> Result<Vec<serde_json::Value>> {
        self.visualizers
            .iter()
            .map(|table| serde_json::to_value(table).context("Failed to convert [[visualizers]] entry"))
            .collect()
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.matcher.lru_capacity == 0 {
            warnings.push("matcher.lru_capacity is 0: every lookup will walk the pattern maps".to_string());
        }
        if self.processing.max_attempts == 0 {
            warnings.push("processing.max_attempts is 0: one attempt will be made".to_string());
        }
        if self.processing.concurrency == 0 {
            warnings.push("processing.concurrency is 0: one job will run at a time".to_string());
        }
        if !LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            warnings.push(format!(
                "Invalid logging.level '{}'. Valid values: {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            ));
        }

        let registry = VisualizerRegistry::with_builtins();
        let mut seen = HashSet::new();
        let values = match self.visualizer_values() {
            Ok(values) => values,
            Err(e) => {
                warnings.push(format!("{:#}", e));
                return warnings;
            }
        };
        for (index, value) in values.iter().enumerate() {
            match parse_manifest_value(value, DEFAULT_IMPLEMENTATION) {
                Ok(config) => {
                    if !seen.insert(config.shortname.clone()) {
                        warnings.push(format!("Duplicate visualizer shortname '{}'", config.shortname));
                    }
                    if !registry.contains(&config.visualizer) {
                        warnings.push(format!(
                            "Visualizer '{}' uses unknown implementation '{}'. Valid values: {}",
                            config.shortname,
                            config.visualizer,
                            registry.keys().join(", ")
                        ));
                    }
                }
                Err(e) => warnings.push(format!("visualizers[{}]: {}", index, e)),
            }
        }

        warnings
    }
}

/// Effective configuration for one process.
#[derive(Debug, Clone)]
pub struct VisualizeConfig {
    /// Path to the project directory
    pub project_dir: PathBuf,
    /// Path to the .vulcan directory
    pub vulcan_dir: PathBuf,
    /// Parsed visualize.toml
    pub toml: VisualizeToml,
    /// CLI override: environment tag
    pub cli_env: Option<String>,
    /// CLI override: log level
    pub cli_log_level: Option<String>,
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl VisualizeConfig {
    /// Load configuration for a project directory.
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let vulcan_dir = project_dir.join(CONFIG_DIR);
        let toml = VisualizeToml::load_or_default(&vulcan_dir)?;

        Ok(Self {
            project_dir,
            vulcan_dir,
            toml,
            cli_env: None,
            cli_log_level: None,
        })
    }

    /// Load configuration with CLI overrides.
    pub fn with_cli_args(project_dir: PathBuf, env: Option<String>, log_level: Option<String>) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.cli_env = env;
        config.cli_log_level = log_level;
        Ok(config)
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_dir.join(path)
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.vulcan_dir.join(CONFIG_FILE)
    }

    /// Environment tag (CLI → VULCAN_ENV → file).
    pub fn env(&self) -> String {
        self.cli_env
            .clone()
            .or_else(|| env_var("VULCAN_ENV"))
            .unwrap_or_else(|| self.toml.service.env.clone())
    }

    /// Database path (VULCAN_DATABASE → file → `.vulcan/visualize.db`).
    pub fn database_path(&self) -> PathBuf {
        match env_var("VULCAN_DATABASE").or_else(|| self.toml.service.database.clone()) {
            Some(path) => self.resolve(&path),
            None => self.vulcan_dir.join("visualize.db"),
        }
    }

    /// Object storage root (VULCAN_STORAGE_DIR → file → `.vulcan/storage`).
    pub fn storage_dir(&self) -> PathBuf {
        match env_var("VULCAN_STORAGE_DIR").or_else(|| self.toml.service.storage_dir.clone()) {
            Some(path) => self.resolve(&path),
            None => self.vulcan_dir.join("storage"),
        }
    }

    /// Log level (CLI → VULCAN_LOG → file).
    pub fn log_level(&self) -> String {
        self.cli_log_level
            .clone()
            .or_else(|| env_var("VULCAN_LOG"))
            .unwrap_or_else(|| self.toml.logging.level.clone())
    }

    pub fn log_dir(&self) -> Option<PathBuf> {
        self.toml.logging.dir.as_deref().map(|d| self.resolve(d))
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.vulcan_dir).context("Failed to create .vulcan directory")?;
        std::fs::create_dir_all(self.storage_dir()).context("Failed to create storage directory")?;
        if let Some(parent) = self.database_path().parent() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }
        Ok(())
    }

    /// Validate configuration and return warnings.
    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::tempdir;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for key in ["VULCAN_ENV", "VULCAN_DATABASE", "VULCAN_STORAGE_DIR", "VULCAN_LOG"] {
            unsafe { std::env::remove_var(key) };
        }
    }

    #[test]
    fn test_parse_empty_uses_defaults() {
        let toml = VisualizeToml::parse("").unwrap();
        assert_eq!(toml.service.env, "dev");
        assert_eq!(toml.service.content_base, "/visualize");
        assert_eq!(toml.matcher.lru_capacity, 1024);
        assert_eq!(toml.processing.max_attempts, 3);
        assert_eq!(toml.logging.format, LogFormat::Pretty);
        assert!(toml.visualizers.is_empty());
        assert!(toml.validate().is_empty());
    }

    #[test]
    fn test_parse_full() {
        let content = r#"
[service]
env = "prod"
storage_url = "https://cdn.example.com"

[processing]
max_attempts = 5
concurrency = 4

[logging]
format = "json"
dir = "logs"

[[visualizers]]
name = "Markdown Visualizer"
visualizer = "markdown"
extensions = ["*.md"]
priority = 5

[[visualizers]]
name = "Office"
visualizer = "on_demand"
processing_extensions = ["*.docx"]
command = "soffice --headless --convert-to pdf --outdir {outdir} {input}"
"#;
        let toml = VisualizeToml::parse(content).unwrap();
        assert_eq!(toml.service.env, "prod");
        assert_eq!(toml.processing.concurrency, 4);
        assert_eq!(toml.logging.format, LogFormat::Json);
        let values = toml.visualizer_values().unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[0]["priority"], 5);
        assert!(toml.validate().is_empty());
    }

    #[test]
    fn test_validate_reports_warnings() {
        let content = r#"
[matcher]
lru_capacity = 0

[logging]
level = "loud"

[[visualizers]]
name = "A"
visualizer = "hologram"

[[visualizers]]
name = "A"

[[visualizers]]
name = "B"
mime_types = ["("]

[[visualizers]]
name = "C"
mime_types = ["^image/"]
"#;
        let warnings = VisualizeToml::parse(content).unwrap().validate();
        assert!(warnings.iter().any(|w| w.contains("lru_capacity")));
        assert!(warnings.iter().any(|w| w.contains("logging.level")));
        assert!(warnings.iter().any(|w| w.contains("unknown implementation 'hologram'")));
        assert!(warnings.iter().any(|w| w.contains("Duplicate visualizer shortname 'a'")));
        assert!(warnings.iter().any(|w| w.starts_with("visualizers[2]")));
        assert!(warnings.iter().any(|w| w.contains("Valid values: bundle, iframe, image")));
        assert!(
            warnings
                .iter()
                .any(|w| w.starts_with("visualizers[3]") && w.contains("mime_types"))
        );
    }

    #[test]
    fn test_load_or_default_and_save() {
        let dir = tempdir().unwrap();
        let toml = VisualizeToml::load_or_default(dir.path()).unwrap();
        assert_eq!(toml.service.env, "dev");

        let mut toml = toml;
        toml.service.env = "staging".into();
        toml.save(&dir.path().join(CONFIG_FILE)).unwrap();
        let loaded = VisualizeToml::load_or_default(dir.path()).unwrap();
        assert_eq!(loaded.service.env, "staging");
    }

    #[test]
    fn test_paths_default_under_vulcan_dir() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();
        let dir = tempdir().unwrap();
        let config = VisualizeConfig::new(dir.path().to_path_buf()).unwrap();
        let root = dir.path().canonicalize().unwrap();
        assert_eq!(config.database_path(), root.join(".vulcan/visualize.db"));
        assert_eq!(config.storage_dir(), root.join(".vulcan/storage"));
        assert_eq!(config.config_file(), root.join(".vulcan/visualize.toml"));
        config.ensure_directories().unwrap();
        assert!(config.storage_dir().is_dir());
    }

    #[test]
    fn test_layering_file_env_cli() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(CONFIG_DIR)).unwrap();
        std::fs::write(
            dir.path().join(CONFIG_DIR).join(CONFIG_FILE),
            "[service]\nenv = \"file\"\ndatabase = \"data/v.db\"\n[logging]\nlevel = \"warn\"\n",
        )
        .unwrap();
        let root = dir.path().canonicalize().unwrap();

        let config = VisualizeConfig::new(dir.path().to_path_buf()).unwrap();
        assert_eq!(config.env(), "file");
        assert_eq!(config.database_path(), root.join("data/v.db"));
        assert_eq!(config.log_level(), "warn");

        unsafe {
            std::env::set_var("VULCAN_ENV", "from-env");
            std::env::set_var("VULCAN_LOG", "debug");
        }
        assert_eq!(config.env(), "from-env");
        assert_eq!(config.log_level(), "debug");

        let config =
            VisualizeConfig::with_cli_args(dir.path().to_path_buf(), Some("cli".into()), Some("trace".into()))
                .unwrap();
        assert_eq!(config.env(), "cli");
        assert_eq!(config.log_level(), "trace");
        clear_env();
    }
}
