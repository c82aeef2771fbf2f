//! Background driver for [`Pipeline`].

use super::batcher::{Pipeline, TickOutcome};
use crate::error::CoreResult;
use crate::worker::{BackgroundWorker, WorkerControl};
use std::sync::Arc;
use tracing::warn;

/// Name of the pipeline worker thread.
pub const PIPELINE_WORKER_NAME: &str = "tagsync-pipeline";

/// Calls [`Pipeline::tick`] every `tick_interval` on a background thread.
///
/// Dropping the handle stops the thread.
#[derive(Debug)]
pub struct PipelineWorker {
    worker: BackgroundWorker,
}

impl PipelineWorker {
    /// Starts the worker.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::WorkerSpawn`] if the thread cannot start.
    pub fn spawn(pipeline: Arc<Pipeline>) -> CoreResult<Self> {
        let interval = pipeline.config().tick_interval;
        let worker = BackgroundWorker::spawn(PIPELINE_WORKER_NAME, interval, move || {
            match pipeline.tick() {
                Ok(TickOutcome::Dropped(count)) => {
                    warn!(count, "pipeline dropped a batch");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "pipeline tick skipped"),
            }
            WorkerControl::Continue
        })?;
        Ok(Self { worker })
    }

    /// Returns true while the thread is running.
    pub fn is_running(&self) -> bool {
        self.worker.is_running()
    }

    /// Runs the next tick without waiting for the interval.
    pub fn wake(&self) {
        self.worker.wake();
    }

    /// Stops and joins the thread.
    pub fn stop(&mut self) {
        self.worker.stop();
    }
}
