//! Typed job channel between the request path and the processing worker.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// One derived-file generation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingJob {
    pub resource_id: String,
    pub config_id: i64,
}

/// Sending half of the processing channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ProcessingQueue {
    tx: mpsc::UnboundedSender<ProcessingJob>,
}

impl ProcessingQueue {
    /// Create a queue and the receiver a [`super::ProcessingWorker`] consumes.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProcessingJob>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Enqueue without waiting. Returns `false` if no worker is listening.
    ///
    /// Posting the same job twice before it completes simply runs it twice;
    /// the duplicate check inside the processor avoids recomputation.
    pub fn post(&self, job: ProcessingJob) -> bool {
        debug!(resource_id = %job.resource_id, config_id = job.config_id, "Posting processing job");
        match self.tx.send(job) {
            Ok(()) => true,
            Err(mpsc::error::SendError(job)) => {
                warn!(
                    resource_id = %job.resource_id,
                    config_id = job.config_id,
                    "Processing worker is gone; job dropped"
                );
                false
            }
        }
    }
}
