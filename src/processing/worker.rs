//! Queue consumer that builds processors and runs them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, error, info, warn};

use super::processor::{FileProcessor, ProcessingContext, full_run};
use super::queue::ProcessingJob;
use super::single::{CommandConverter, DEFAULT_MAX_ATTEMPTS, SingleFileProcessor, SubstitutionConverter};
use crate::artifact::ArtifactResolver;
use crate::db::DbHandle;
use crate::errors::ProcessingError;
use crate::model::{ProcessingState, VisualizerConfig};
use crate::storage::ObjectStore;

const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 300;
const DEFAULT_QUERY_PARAM: &str = "fileUrl";

/// Builds a processor for a config. The second argument is the retry bound.
pub type ProcessorFactory = fn(&VisualizerConfig, u32) -> Result<Box<dyn FileProcessor>>;

/// Maps a config's `processor` option to a factory.
#[derive(Clone)]
pub struct ProcessorRegistry {
    factories: HashMap<String, ProcessorFactory>,
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn query_param(config: &VisualizerConfig) -> String {
    config
        .option("query_param")
        .unwrap_or(DEFAULT_QUERY_PARAM)
        .to_string()
}

fn convert_processor(config: &VisualizerConfig, attempts: u32) -> Result<Box<dyn FileProcessor>> {
    let Some(command) = config.option("command") else {
        bail!("Visualizer '{}' has no `command` option", config.shortname);
    };
    let timeout_secs = match config.option("timeout_secs") {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("Invalid timeout_secs '{}'", raw))?,
        None => DEFAULT_COMMAND_TIMEOUT_SECS,
    };
    let converter = CommandConverter::new(
        command,
        config.option("output_extension").unwrap_or("pdf"),
        Duration::from_secs(timeout_secs),
    );
    Ok(Box::new(
        SingleFileProcessor::new(Box::new(converter), query_param(config)).with_max_attempts(attempts),
    ))
}

fn substitute_processor(config: &VisualizerConfig, attempts: u32) -> Result<Box<dyn FileProcessor>> {
    let Some(rules) = config.option("substitutions") else {
        bail!("Visualizer '{}' has no `substitutions` option", config.shortname);
    };
    let converter = SubstitutionConverter::from_json(rules, config.option("output_extension").map(str::to_string))?;
    Ok(Box::new(
        SingleFileProcessor::new(Box::new(converter), query_param(config)).with_max_attempts(attempts),
    ))
}

impl ProcessorRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("convert", convert_processor);
        registry.register("substitute", substitute_processor);
        registry
    }

    pub fn register(&mut self, key: &str, factory: ProcessorFactory) {
        self.factories.insert(key.to_string(), factory);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.factories.contains_key(key)
    }

    /// Build the processor named by the config's `processor` option (default `convert`).
    pub fn build(&self, config: &VisualizerConfig, attempts: u32) -> Result<Box<dyn FileProcessor>> {
        let key = config.option("processor").unwrap_or("convert");
        let factory = self
            .factories
            .get(key)
            .ok_or_else(|| anyhow!("Unknown processor '{}' for visualizer '{}'", key, config.shortname))?;
        factory(config, attempts)
    }
}

/// Consumes [`ProcessingJob`]s and drives each through [`full_run`].
#[derive(Clone)]
pub struct ProcessingWorker {
    db: DbHandle,
    storage: Arc<dyn ObjectStore>,
    resolver: Arc<dyn ArtifactResolver>,
    registry: ProcessorRegistry,
    max_attempts: u32,
    concurrency: usize,
}

impl ProcessingWorker {
    pub fn new(db: DbHandle, storage: Arc<dyn ObjectStore>, resolver: Arc<dyn ArtifactResolver>) -> Self {
        Self {
            db,
            storage,
            resolver,
            registry: ProcessorRegistry::with_builtins(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            concurrency: 2,
        }
    }

    pub fn with_registry(mut self, registry: ProcessorRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    async fn fail(&self, job: &ProcessingJob) {
        let resource_id = job.resource_id.clone();
        let config_id = job.config_id;
        if let Err(e) = self
            .db
            .call(move |db| db.set_status(&resource_id, config_id, ProcessingState::Error))
            .await
        {
            warn!(error = %e, "Failed to record processing error status");
        }
    }

    /// Process one job to completion.
    pub async fn handle(&self, job: &ProcessingJob) -> Result<ProcessingState, ProcessingError> {
        let config_id = job.config_id;
        let config = self.db.call(move |db| db.get_config(config_id)).await?;
        let Some(config) = config else {
            // The config was deleted after the job was posted; its status rows went with it.
            warn!(config_id, resource_id = %job.resource_id, "Dropping job for deleted visualizer");
            return Err(ProcessingError::Other(anyhow!("Visualizer config {} no longer exists", config_id)));
        };

        let Some(artifact) = self.resolver.resolve(&job.resource_id) else {
            self.fail(job).await;
            return Err(ProcessingError::SourceUnavailable {
                resource_id: job.resource_id.clone(),
            });
        };

        let mut processor = match self.registry.build(&config, self.max_attempts) {
            Ok(p) => p,
            Err(e) => {
                self.fail(job).await;
                return Err(ProcessingError::Other(e));
            }
        };

        let ctx = ProcessingContext {
            config,
            artifact,
            db: self.db.clone(),
            storage: self.storage.clone(),
        };
        full_run(processor.as_mut(), &ctx).await
    }

    async fn handle_logged(&self, job: ProcessingJob) {
        if let Err(e) = self.handle(&job).await {
            error!(
                resource_id = %job.resource_id,
                config_id = job.config_id,
                error = %e,
                "Processing job failed"
            );
        }
    }

    /// Consume jobs until every sender is dropped, at most `concurrency` at a time.
    pub async fn run(self, mut rx: mpsc::UnboundedReceiver<ProcessingJob>) {
        let permits = Arc::new(Semaphore::new(self.concurrency));
        info!(concurrency = self.concurrency, "Processing worker started");
        while let Some(job) = rx.recv().await {
            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            let worker = self.clone();
            tokio::spawn(async move {
                worker.handle_logged(job).await;
                drop(permit);
            });
        }
        // Wait for in-flight jobs before returning.
        let all = u32::try_from(self.concurrency).unwrap_or(u32::MAX);
        if let Err(e) = permits.acquire_many(all).await {
            warn!(error = %e, "Stopped without waiting for in-flight processing jobs");
        }
        info!("Processing worker stopped");
    }

    /// Process whatever is queued right now, one job at a time. Returns the job count.
    pub async fn drain(&self, rx: &mut mpsc::UnboundedReceiver<ProcessingJob>) -> usize {
        let mut handled = 0;
        while let Ok(job) = rx.try_recv() {
            debug!(resource_id = %job.resource_id, config_id = job.config_id, "Draining job");
            self.handle_logged(job).await;
            handled += 1;
        }
        handled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::MemoryArtifactResolver;
    use crate::processing::{ProcessingQueue, request_processing};
    use crate::storage::MemoryObjectStore;
    use crate::visualizer::test_support::StubArtifact;

    fn redactor() -> VisualizerConfig {
        VisualizerConfig::new("Redacted text", "redacted")
            .with_processing(["*.log"])
            .with_visualizer("on_demand")
            .with_option("processor", "substitute")
            .with_option("substitutions", r#"[["token=\\w+", "token=***"]]"#)
            .with_option("query_param", "redactedUrl")
    }

    fn worker(db: &DbHandle, store: &MemoryObjectStore, resolver: &MemoryArtifactResolver) -> ProcessingWorker {
        ProcessingWorker::new(db.clone(), Arc::new(store.clone()), Arc::new(resolver.clone()))
    }

    #[test]
    fn test_registry_builds_by_option() {
        let registry = ProcessorRegistry::with_builtins();
        assert!(registry.build(&redactor(), 3).is_ok());

        let convert = VisualizerConfig::new("Office", "office").with_option("command", "soffice {input}");
        assert!(registry.build(&convert, 3).is_ok());

        let missing = VisualizerConfig::new("Office", "office");
        assert!(registry.build(&missing, 3).is_err());

        let unknown = VisualizerConfig::new("X", "x").with_option("processor", "nope");
        assert!(registry.build(&unknown, 3).is_err());
    }

    #[tokio::test]
    async fn test_worker_processes_queued_job() {
        let db = DbHandle::in_memory().unwrap();
        let store = MemoryObjectStore::new();
        let resolver = MemoryArtifactResolver::new();
        let config = db.lock_sync().unwrap().upsert_config(&redactor()).unwrap();
        resolver.register(Arc::new(StubArtifact::new("r1", "app.log", b"login token=abc123 ok")));

        let (queue, rx) = ProcessingQueue::channel();
        assert!(request_processing(&db, &queue, "r1", config.id).unwrap());
        drop(queue);
        worker(&db, &store, &resolver).run(rx).await;

        let status = db.lock_sync().unwrap().get_status("r1", config.id).unwrap().unwrap();
        assert_eq!(status.status, ProcessingState::Ready);
        assert_eq!(
            store.get("processed/redacted/r1/app.log").unwrap().unwrap(),
            b"login token=*** ok"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_run_waits_for_every_in_flight_job() {
        let db = DbHandle::in_memory().unwrap();
        let store = MemoryObjectStore::new();
        let resolver = MemoryArtifactResolver::new();
        let config = db.lock_sync().unwrap().upsert_config(&redactor()).unwrap();

        let (queue, rx) = ProcessingQueue::channel();
        for i in 0..5 {
            let id = format!("r{}", i);
            let body = format!("run {} token=secret{}", i, i);
            resolver.register(Arc::new(StubArtifact::new(&id, "app.log", body.as_bytes())));
            assert!(request_processing(&db, &queue, &id, config.id).unwrap());
        }
        drop(queue);
        worker(&db, &store, &resolver).with_concurrency(3).run(rx).await;

        for i in 0..5 {
            let id = format!("r{}", i);
            let status = db.lock_sync().unwrap().get_status(&id, config.id).unwrap().unwrap();
            assert_eq!(status.status, ProcessingState::Ready, "{} not finished", id);
            let key = format!("processed/redacted/{}/app.log", id);
            assert_eq!(
                store.get(&key).unwrap().unwrap(),
                format!("run {} token=***", i).as_bytes()
            );
        }
    }

    #[tokio::test]
    async fn test_unresolvable_artifact_sets_error() {
        let db = DbHandle::in_memory().unwrap();
        let store = MemoryObjectStore::new();
        let resolver = MemoryArtifactResolver::new();
        let config = db.lock_sync().unwrap().upsert_config(&redactor()).unwrap();

        let (queue, mut rx) = ProcessingQueue::channel();
        request_processing(&db, &queue, "ghost", config.id).unwrap();
        let handled = worker(&db, &store, &resolver).drain(&mut rx).await;
        assert_eq!(handled, 1);

        let status = db.lock_sync().unwrap().get_status("ghost", config.id).unwrap().unwrap();
        assert_eq!(status.status, ProcessingState::Error);
    }

    #[tokio::test]
    async fn test_job_for_deleted_config_is_dropped() {
        let db = DbHandle::in_memory().unwrap();
        let store = MemoryObjectStore::new();
        let resolver = MemoryArtifactResolver::new();
        let job = ProcessingJob {
            resource_id: "r1".into(),
            config_id: 999,
        };
        let err = worker(&db, &store, &resolver).handle(&job).await.unwrap_err();
        assert!(err.to_string().contains("999"));
    }
}
