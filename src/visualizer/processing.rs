//! Visualizers backed by asynchronously generated derived files.

use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use super::embed::bundle_entry_url;
use super::{
    PARAM_PROCESSING_RESOURCE_ID, PARAM_PROCESSING_STATUS, PARAM_REF_ID, QueryParams, Visualizer,
    VisualizerContext,
};
use crate::artifact::Artifact;
use crate::model::{ProcessingState, VisualizerConfig};
use crate::processing::request_processing;

/// When derived files are first requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingTrigger {
    /// The first query built for an artifact enqueues processing.
    OnDemand,
    /// Processing is enqueued when the artifact is uploaded.
    OnUpload,
}

/// Renders from derived files and reports their processing status.
///
/// Queries expose `processingStatus`, `processingResourceId`, and one URL
/// per completed derived file keyed by that file's `query_param`.
pub struct ProcessingVisualizer {
    config: VisualizerConfig,
    context: Arc<VisualizerContext>,
    trigger: ProcessingTrigger,
}

impl ProcessingVisualizer {
    pub fn new(config: VisualizerConfig, context: Arc<VisualizerContext>, trigger: ProcessingTrigger) -> Self {
        Self {
            config,
            context,
            trigger,
        }
    }

    /// Current status, enqueueing first-time work for on-demand visualizers.
    fn status_for(&self, resource_id: &str) -> Result<Option<ProcessingState>> {
        let status = self
            .context
            .db
            .lock_sync()?
            .get_status(resource_id, self.config.id)?
            .map(|s| s.status);
        if status.is_some() || self.trigger != ProcessingTrigger::OnDemand {
            return Ok(status);
        }
        let Some(queue) = &self.context.queue else {
            debug!(visualizer = %self.config.shortname, "No processing queue; skipping on-demand request");
            return Ok(None);
        };
        let queued = request_processing(&self.context.db, queue, resource_id, self.config.id)?;
        Ok(queued.then_some(ProcessingState::Loading))
    }
}

impl Visualizer for ProcessingVisualizer {
    fn config(&self) -> &VisualizerConfig {
        &self.config
    }

    fn context(&self) -> &VisualizerContext {
        &self.context
    }

    fn content_url(&self) -> String {
        if let Some(url) = self.config.option("content_url") {
            return url.to_string();
        }
        if self.config.option("entry_point").is_some() {
            return bundle_entry_url(&self.config, &self.context);
        }
        format!(
            "{}/{}/content",
            self.context.content_base.trim_end_matches('/'),
            self.config.shortname
        )
    }

    fn get_query_for_artifact(&self, artifact: &dyn Artifact, extra: &QueryParams) -> Result<QueryParams> {
        let mut query = self.get_query_for_url(&artifact.raw_url(), extra)?;
        query.insert(PARAM_REF_ID.into(), artifact.ref_id());

        let resource_id = artifact.unique_id();
        if let Some(status) = self.status_for(&resource_id)? {
            query.insert(PARAM_PROCESSING_STATUS.into(), status.to_string());
        }
        query.insert(PARAM_PROCESSING_RESOURCE_ID.into(), resource_id.clone());

        let files = self
            .context
            .db
            .lock_sync()?
            .list_processed_files(&resource_id, self.config.id)?;
        for file in files.into_iter().filter(|f| f.complete) {
            query.insert(file.query_param, self.context.storage.url(&file.storage_key));
        }
        Ok(query)
    }

    fn on_upload(&self, artifact: &dyn Artifact) -> Result<bool> {
        if self.trigger != ProcessingTrigger::OnUpload {
            return Ok(false);
        }
        let Some(queue) = &self.context.queue else {
            return Ok(false);
        };
        request_processing(&self.context.db, queue, &artifact.unique_id(), self.config.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbHandle;
    use crate::model::NewProcessedFile;
    use crate::processing::ProcessingQueue;
    use crate::visualizer::test_support::{StubArtifact, context};

    fn setup(trigger: ProcessingTrigger) -> (DbHandle, ProcessingVisualizer, tokio::sync::mpsc::UnboundedReceiver<crate::processing::ProcessingJob>) {
        let db = DbHandle::in_memory().unwrap();
        let cfg = db
            .lock_sync()
            .unwrap()
            .upsert_config(&VisualizerConfig::new("Office", "office").with_processing(["*.docx"]))
            .unwrap();
        let (queue, rx) = ProcessingQueue::channel();
        let vis = ProcessingVisualizer::new(cfg, context(db.clone(), Some(queue)), trigger);
        (db, vis, rx)
    }

    #[test]
    fn test_on_demand_enqueues_once() {
        let (db, vis, mut rx) = setup(ProcessingTrigger::OnDemand);
        let artifact = StubArtifact::new("r1", "a.docx", b"doc");

        let q = vis.get_query_for_artifact(&artifact, &QueryParams::new()).unwrap();
        assert_eq!(q.get(PARAM_PROCESSING_STATUS).map(String::as_str), Some("loading"));
        assert_eq!(q.get(PARAM_PROCESSING_RESOURCE_ID).map(String::as_str), Some("r1"));
        let job = rx.try_recv().unwrap();
        assert_eq!(job.resource_id, "r1");
        assert_eq!(job.config_id, vis.config().id);

        // Second query sees the existing status and does not enqueue again.
        vis.get_query_for_artifact(&artifact, &QueryParams::new()).unwrap();
        assert!(rx.try_recv().is_err());
        assert!(db.lock_sync().unwrap().get_status("r1", vis.config().id).unwrap().is_some());
    }

    #[test]
    fn test_ready_status_exposes_derived_file_urls() {
        let (db, vis, _rx) = setup(ProcessingTrigger::OnDemand);
        let id = vis.config().id;
        {
            let guard = db.lock_sync().unwrap();
            guard.set_status("r1", id, ProcessingState::Ready).unwrap();
            let file = guard
                .insert_processed_file(&NewProcessedFile {
                    resource_id: "r1".into(),
                    config_id: id,
                    filename: "a.pdf".into(),
                    query_param: "pdfUrl".into(),
                    source_hash: "h".into(),
                    storage_key: "processed/office/r1/a.pdf".into(),
                })
                .unwrap();
            guard.mark_processed_file_complete(file.id).unwrap();
        }
        let artifact = StubArtifact::new("r1", "a.docx", b"doc");
        let desc = vis.render_artifact(&artifact, &QueryParams::new()).unwrap();
        assert_eq!(desc.processing_status, Some(ProcessingState::Ready));
        assert_eq!(
            desc.query.get("pdfUrl").map(String::as_str),
            Some("memory://processed/office/r1/a.pdf")
        );
    }

    #[test]
    fn test_on_upload_does_not_enqueue_from_query() {
        let (_db, vis, mut rx) = setup(ProcessingTrigger::OnUpload);
        let artifact = StubArtifact::new("r1", "a.docx", b"doc");
        let q = vis.get_query_for_artifact(&artifact, &QueryParams::new()).unwrap();
        assert!(!q.contains_key(PARAM_PROCESSING_STATUS));
        assert!(rx.try_recv().is_err());

        assert!(vis.on_upload(&artifact).unwrap());
        assert_eq!(rx.try_recv().unwrap().resource_id, "r1");
        // Already loading: a repeated upload notification does not re-enqueue.
        assert!(!vis.on_upload(&artifact).unwrap());
    }
}
