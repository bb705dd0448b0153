//! The artifact abstraction the engine renders and processes.
//!
//! Artifacts are owned by the surrounding forge; the engine only calls
//! these methods and never constructs them outside of tests and the CLI.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

/// A forge-managed resource with stable identity.
pub trait Artifact: Send + Sync {
    /// Display URL of the artifact inside the forge.
    fn url(&self) -> String;
    /// URL serving the artifact's raw bytes.
    fn raw_url(&self) -> String;
    /// Globally unique id, used to key processing status and derived files.
    fn unique_id(&self) -> String;
    /// Reference id for access-control checks by content endpoints.
    fn ref_id(&self) -> String;
    /// Filename used for visualizer matching.
    fn filename(&self) -> String;
    fn read(&self) -> Result<Vec<u8>>;
}

/// Looks artifacts up by unique id for the processing worker.
pub trait ArtifactResolver: Send + Sync {
    fn resolve(&self, unique_id: &str) -> Option<Arc<dyn Artifact>>;
}

/// Resolver over artifacts registered in this process.
#[derive(Clone, Default)]
pub struct MemoryArtifactResolver {
    artifacts: Arc<RwLock<HashMap<String, Arc<dyn Artifact>>>>,
}

impl MemoryArtifactResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, artifact: Arc<dyn Artifact>) {
        let mut artifacts = self.artifacts.write().unwrap_or_else(|e| e.into_inner());
        artifacts.insert(artifact.unique_id(), artifact);
    }
}

impl ArtifactResolver for MemoryArtifactResolver {
    fn resolve(&self, unique_id: &str) -> Option<Arc<dyn Artifact>> {
        let artifacts = self.artifacts.read().unwrap_or_else(|e| e.into_inner());
        artifacts.get(unique_id).cloned()
    }
}

/// Hex-encoded SHA-256, truncated to `len` characters.
pub fn short_hash(bytes: &[u8], len: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let hex = format!("{:x}", hasher.finalize());
    hex[..len.min(hex.len())].to_string()
}

/// A file on local disk, addressed relative to a project root.
#[derive(Debug, Clone)]
pub struct FileArtifact {
    root: PathBuf,
    path: PathBuf,
    base_url: String,
}

impl FileArtifact {
    pub fn new(root: &Path, path: &Path, base_url: &str) -> Result<Self> {
        let root = root
            .canonicalize()
            .with_context(|| format!("Failed to resolve {}", root.display()))?;
        let path = path
            .canonicalize()
            .with_context(|| format!("Failed to resolve {}", path.display()))?;
        Ok(Self {
            root,
            path,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn relative(&self) -> String {
        let rel = self.path.strip_prefix(&self.root).unwrap_or(&self.path);
        rel.components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .filter(|c| c != "/")
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl Artifact for FileArtifact {
    fn url(&self) -> String {
        format!("{}/{}", self.base_url, self.relative())
    }

    fn raw_url(&self) -> String {
        format!("{}/{}?format=raw", self.base_url, self.relative())
    }

    fn unique_id(&self) -> String {
        short_hash(self.path.to_string_lossy().as_bytes(), 24)
    }

    fn ref_id(&self) -> String {
        format!("file:{}", self.relative())
    }

    fn filename(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn read(&self) -> Result<Vec<u8>> {
        std::fs::read(&self.path).with_context(|| format!("Failed to read {}", self.path.display()))
    }
}
