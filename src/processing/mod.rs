//! Asynchronous derived-file generation.
//!
//! The request path only ever calls [`request_processing`] or
//! [`reprocess`]: both record a `loading` status and post a typed
//! [`ProcessingJob`] onto the [`ProcessingQueue`]. A [`ProcessingWorker`]
//! consumes the queue, builds a processor for the job's config and drives
//! it through [`full_run`], which owns the status transitions:
//!
//! ```text
//! loading ──run ok / duplicate found──▶ ready
//!    └──────────run failed────────────▶ error
//! ```

mod processor;
mod queue;
mod single;
mod worker;

pub use processor::{FileProcessor, ProcessingContext, full_run};
pub use queue::{ProcessingJob, ProcessingQueue};
pub use single::{CommandConverter, Converter, SingleFileProcessor, SubstitutionConverter};
pub use worker::{ProcessorRegistry, ProcessingWorker};

use anyhow::Result;
use tracing::{info, warn};

use crate::db::DbHandle;
use crate::model::ProcessingState;

/// Create a `loading` status and enqueue a job, unless a status already exists.
///
/// Returns `true` when a job was posted.
pub fn request_processing(
    db: &DbHandle,
    queue: &ProcessingQueue,
    resource_id: &str,
    config_id: i64,
) -> Result<bool> {
    if !db.lock_sync()?.create_status_if_missing(resource_id, config_id)? {
        return Ok(false);
    }
    post_or_fail(db, queue, resource_id, config_id)
}

/// Reset the status to `loading` and enqueue a job regardless of prior state.
///
/// This is how an operator clears a stuck `loading` or a failed `error`.
pub fn reprocess(
    db: &DbHandle,
    queue: &ProcessingQueue,
    resource_id: &str,
    config_id: i64,
) -> Result<bool> {
    db.lock_sync()?
        .set_status(resource_id, config_id, ProcessingState::Loading)?;
    info!(resource_id, config_id, "Reprocessing requested");
    post_or_fail(db, queue, resource_id, config_id)
}

fn post_or_fail(db: &DbHandle, queue: &ProcessingQueue, resource_id: &str, config_id: i64) -> Result<bool> {
    let posted = queue.post(ProcessingJob {
        resource_id: resource_id.to_string(),
        config_id,
    });
    if !posted {
        // Nothing will ever pick this up; surface it as a retryable error.
        warn!(resource_id, config_id, "Marking processing as failed: queue closed");
        db.lock_sync()?
            .set_status(resource_id, config_id, ProcessingState::Error)?;
    }
    Ok(posted)
}
