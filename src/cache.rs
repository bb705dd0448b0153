//! Shared generation-token cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;

use crate::db::DbHandle;

/// Cross-process key/value cache holding small string values.
///
/// Only the visualizer generation token lives here; every process that
/// mutates visualizer configs writes a fresh token.
pub trait SharedCache: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// Shared cache stored in the `settings` table of the visualizer database.
#[derive(Clone)]
pub struct DbSharedCache {
    db: DbHandle,
}

impl DbSharedCache {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }
}

impl SharedCache for DbSharedCache {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.db.lock_sync()?.get_setting(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.db.lock_sync()?.set_setting(key, value)
    }
}

/// In-process shared cache. Clones share the same map.
#[derive(Clone, Default)]
pub struct MemorySharedCache {
    values: Arc<Mutex<HashMap<String, String>>>,
}

impl MemorySharedCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SharedCache for MemorySharedCache {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self
            .values
            .lock()
            .map_err(|e| anyhow::anyhow!("Cache lock poisoned: {}", e))?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|e| anyhow::anyhow!("Cache lock poisoned: {}", e))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
