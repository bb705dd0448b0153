//! Config mutations. Every write is paired with a generation token bump.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cache::SharedCache;
use crate::db::DbHandle;
use crate::manifest::{Bundle, parse_manifest_value, read_directory_bundle, read_zip_bundle};
use crate::mapping::invalidate_cache;
use crate::model::VisualizerConfig;
use crate::storage::{ObjectStore, bundle_key, bundle_prefix, processed_prefix};

/// Implementation key assigned to uploaded bundles whose manifest names none.
pub const BUNDLE_IMPLEMENTATION: &str = "bundle";

/// Administrative operations over the visualizer config store.
#[derive(Clone)]
pub struct VisualizerAdmin {
    db: DbHandle,
    storage: Arc<dyn ObjectStore>,
    cache: Arc<dyn SharedCache>,
}

impl VisualizerAdmin {
    pub fn new(db: DbHandle, storage: Arc<dyn ObjectStore>, cache: Arc<dyn SharedCache>) -> Self {
        Self { db, storage, cache }
    }

    fn bump(&self) -> Result<()> {
        invalidate_cache(self.cache.as_ref()).context("Failed to invalidate visualizer cache")?;
        Ok(())
    }

    /// Install a zip bundle, replacing any earlier upload with the same shortname.
    pub fn upload_bundle(&self, zip: &[u8]) -> Result<VisualizerConfig> {
        let bundle = read_zip_bundle(zip, BUNDLE_IMPLEMENTATION)?;
        self.install(bundle)
    }

    /// Install an unpacked bundle directory.
    pub fn upload_directory(&self, dir: &Path) -> Result<VisualizerConfig> {
        let bundle = read_directory_bundle(dir, BUNDLE_IMPLEMENTATION)
            .with_context(|| format!("Failed to read bundle directory {}", dir.display()))?;
        self.install(bundle)
    }

    fn install(&self, bundle: Bundle) -> Result<VisualizerConfig> {
        let Bundle { config, files } = bundle;
        let shortname = config.shortname.clone();

        let removed = self.storage.delete_prefix(&bundle_prefix(&shortname))?;
        if removed > 0 {
            info!(shortname = %shortname, removed, "Replacing previous bundle files");
        }
        for (path, bytes) in &files {
            self.storage
                .put(&bundle_key(&shortname, path), bytes)
                .with_context(|| format!("Failed to store bundle file {}", path))?;
        }

        let saved = self.db.lock_sync()?.upsert_config(&config)?;
        self.bump()?;
        info!(
            shortname = %saved.shortname,
            id = saved.id,
            files = files.len(),
            "Installed visualizer bundle"
        );
        Ok(saved)
    }

    /// Register or update a config without bundle files.
    pub fn register(&self, config: &VisualizerConfig) -> Result<VisualizerConfig> {
        let saved = self.db.lock_sync()?.upsert_config(config)?;
        self.bump()?;
        info!(shortname = %saved.shortname, id = saved.id, "Registered visualizer");
        Ok(saved)
    }

    /// Register configs from manifest-shaped values, such as static config entries.
    ///
    /// An existing row keeps its active flag, and unchanged rows are not
    /// rewritten. The token is bumped only if something changed.
    pub fn register_values(&self, values: &[serde_json::Value]) -> Result<Vec<VisualizerConfig>> {
        let mut saved = Vec::with_capacity(values.len());
        let mut changed = false;
        {
            let db = self.db.lock_sync()?;
            for value in values {
                let mut config = parse_manifest_value(value, crate::model::DEFAULT_IMPLEMENTATION)?;
                if let Some(existing) = db.get_config_by_shortname(&config.shortname)? {
                    config.id = existing.id;
                    config.active = existing.active;
                    if config == existing {
                        saved.push(existing);
                        continue;
                    }
                }
                saved.push(db.upsert_config(&config)?);
                changed = true;
            }
        }
        if changed {
            self.bump()?;
        }
        Ok(saved)
    }

    /// Remove a visualizer from matching. Returns `false` if it does not exist.
    pub fn deactivate(&self, shortname: &str) -> Result<bool> {
        self.set_active(shortname, false)
    }

    pub fn activate(&self, shortname: &str) -> Result<bool> {
        self.set_active(shortname, true)
    }

    fn set_active(&self, shortname: &str, active: bool) -> Result<bool> {
        let changed = self.db.lock_sync()?.set_config_active(shortname, active)?;
        if changed {
            self.bump()?;
            info!(shortname, active, "Changed visualizer state");
        }
        Ok(changed)
    }

    /// Delete a visualizer along with its bundle, derived files and statuses.
    pub fn delete(&self, shortname: &str) -> Result<bool> {
        let Some(config) = self.db.lock_sync()?.get_config_by_shortname(shortname)? else {
            return Ok(false);
        };
        let bundle_files = self.storage.delete_prefix(&bundle_prefix(shortname))?;
        let derived_files = self.storage.delete_prefix(&processed_prefix(shortname))?;
        self.db.lock_sync()?.delete_config(config.id)?;
        self.bump()?;
        info!(shortname, bundle_files, derived_files, "Deleted visualizer");
        Ok(true)
    }

    /// Forget everything derived from a resource that no longer exists.
    pub fn delete_resource(&self, resource_id: &str) -> Result<usize> {
        let files = self.db.lock_sync()?.delete_resource(resource_id)?;
        for file in &files {
            if let Err(e) = self.storage.delete(&file.storage_key) {
                warn!(storage_key = %file.storage_key, error = %e, "Failed to delete derived file");
            }
        }
        Ok(files.len())
    }

    /// Force every matcher to rebuild without changing any config.
    pub fn invalidate(&self) -> Result<String> {
        invalidate_cache(self.cache.as_ref())
    }
}
