//! Wires the stores, matcher, facade and worker together from a config.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::info;

use crate::admin::VisualizerAdmin;
use crate::api::{Resource, VisualizeApi};
use crate::artifact::{Artifact, FileArtifact, MemoryArtifactResolver};
use crate::cache::{DbSharedCache, SharedCache};
use crate::config::VisualizeConfig;
use crate::db::{DbHandle, VisualizeDb};
use crate::mapping::PatternMatcher;
use crate::processing::{ProcessingJob, ProcessingQueue, ProcessingWorker};
use crate::storage::{FsObjectStore, ObjectStore};
use crate::visualizer::{VisualizerContext, VisualizerRegistry};

/// Everything one process needs to resolve, render and process.
pub struct Services {
    pub config: VisualizeConfig,
    pub db: DbHandle,
    pub storage: Arc<dyn ObjectStore>,
    pub admin: VisualizerAdmin,
    pub api: VisualizeApi,
    pub resolver: MemoryArtifactResolver,
    pub worker: ProcessingWorker,
    jobs: UnboundedReceiver<ProcessingJob>,
}

impl Services {
    /// Open the stores named by `config` and register its static visualizers.
    pub fn open(config: VisualizeConfig) -> Result<Self> {
        config.ensure_directories()?;
        let db_path = config.database_path();
        let db = DbHandle::new(
            VisualizeDb::new(&db_path)
                .with_context(|| format!("Failed to open database {}", db_path.display()))?,
        );
        let storage: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(
            config.storage_dir(),
            config.toml.service.storage_url.clone(),
        )?);
        let cache: Arc<dyn SharedCache> = Arc::new(DbSharedCache::new(db.clone()));

        let (queue, jobs) = ProcessingQueue::channel();
        let context = Arc::new(VisualizerContext {
            env: config.env(),
            content_base: config.toml.service.content_base.clone(),
            db: db.clone(),
            storage: storage.clone(),
            queue: Some(queue),
        });
        let matcher = Arc::new(PatternMatcher::new(
            db.clone(),
            cache.clone(),
            config.toml.matcher.lru_capacity,
        ));
        let api = VisualizeApi::new(matcher, VisualizerRegistry::with_builtins(), context);
        let admin = VisualizerAdmin::new(db.clone(), storage.clone(), cache);

        let resolver = MemoryArtifactResolver::new();
        let worker = ProcessingWorker::new(db.clone(), storage.clone(), Arc::new(resolver.clone()))
            .with_max_attempts(config.toml.processing.max_attempts)
            .with_concurrency(config.toml.processing.concurrency);

        let statics = config.toml.visualizer_values()?;
        if !statics.is_empty() {
            let saved = admin
                .register_values(&statics)
                .context("Failed to register [[visualizers]] from visualize.toml")?;
            info!(count = saved.len(), "Registered static visualizers");
        }

        Ok(Self {
            config,
            db,
            storage,
            admin,
            api,
            resolver,
            worker,
            jobs,
        })
    }

    /// A project file as an artifact the worker can resolve.
    pub fn file_artifact(&self, path: &Path) -> Result<Arc<dyn Artifact>> {
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config.project_dir.join(path)
        };
        let artifact: Arc<dyn Artifact> = Arc::new(FileArtifact::new(
            &self.config.project_dir,
            &path,
            &self.config.toml.service.artifact_url,
        )?);
        self.resolver.register(artifact.clone());
        Ok(artifact)
    }

    /// A resource for a CLI argument: URLs stay URLs, anything else is a project file.
    pub fn resource(&self, arg: &str) -> Result<Resource> {
        if arg.contains("://") {
            return Ok(Resource::url(arg));
        }
        Ok(Resource::Artifact(self.file_artifact(Path::new(arg))?))
    }

    /// Run every job queued so far. Returns how many ran.
    pub async fn drain_jobs(&mut self) -> usize {
        self.worker.drain(&mut self.jobs).await
    }
}
