//! The processor contract and the status-owning `full_run` driver.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::artifact::Artifact;
use crate::db::DbHandle;
use crate::errors::ProcessingError;
use crate::model::{ProcessingState, VisualizerConfig};
use crate::storage::ObjectStore;

/// Everything a processor needs for one job.
#[derive(Clone)]
pub struct ProcessingContext {
    pub config: VisualizerConfig,
    pub artifact: Arc<dyn Artifact>,
    pub db: DbHandle,
    pub storage: Arc<dyn ObjectStore>,
}

impl ProcessingContext {
    pub fn resource_id(&self) -> String {
        self.artifact.unique_id()
    }

    pub async fn set_status(&self, status: ProcessingState) -> Result<(), ProcessingError> {
        let resource_id = self.resource_id();
        let config_id = self.config.id;
        self.db
            .call(move |db| db.set_status(&resource_id, config_id, status))
            .await
            .map_err(ProcessingError::Other)
    }
}

/// A derived-file producer. Only `run` is mandatory.
#[async_trait]
pub trait FileProcessor: Send {
    /// Prepare destination records before the duplicate check.
    async fn pre_duplicate_check(&mut self, _ctx: &ProcessingContext) -> Result<(), ProcessingError> {
        Ok(())
    }

    /// Copy output from an identical earlier result. `true` skips `run`.
    async fn check_for_duplicates(&mut self, _ctx: &ProcessingContext) -> Result<bool, ProcessingError> {
        Ok(false)
    }

    /// The transformation itself.
    async fn run(&mut self, ctx: &ProcessingContext) -> Result<(), ProcessingError>;

    /// Remove anything a failed run left behind.
    async fn discard_partial(&mut self, _ctx: &ProcessingContext) {}
}

/// Drive a processor through `loading` to `ready` or `error`.
///
/// On failure the partial output is discarded, the status set to `error`,
/// and the error returned for the caller to log.
pub async fn full_run(
    processor: &mut dyn FileProcessor,
    ctx: &ProcessingContext,
) -> Result<ProcessingState, ProcessingError> {
    let resource_id = ctx.resource_id();
    let shortname = ctx.config.shortname.clone();
    ctx.set_status(ProcessingState::Loading).await?;

    let outcome = async {
        processor.pre_duplicate_check(ctx).await?;
        if processor.check_for_duplicates(ctx).await? {
            info!(visualizer = %shortname, resource_id = %resource_id, "Reused duplicate processing result");
            return Ok(());
        }
        processor.run(ctx).await
    }
    .await;

    match outcome {
        Ok(()) => {
            ctx.set_status(ProcessingState::Ready).await?;
            info!(visualizer = %shortname, resource_id = %resource_id, "Processing complete");
            Ok(ProcessingState::Ready)
        }
        Err(e) => {
            error!(visualizer = %shortname, resource_id = %resource_id, error = %e, "Processing failed");
            processor.discard_partial(ctx).await;
            if let Err(status_err) = ctx.set_status(ProcessingState::Error).await {
                warn!(error = %status_err, "Failed to record processing error status");
            }
            Err(e)
        }
    }
}
