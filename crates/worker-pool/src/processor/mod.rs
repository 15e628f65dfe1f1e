//! Job processing: workflow lookup, ordered task execution with retry,
//! and persistence of progress and outcome.

mod job;

pub use job::JobProcessor;

use thiserror::Error;
use workflow_tasks::{JobStatus, TaskError};

use crate::store::StoreError;

/// Errors returned to the worker for a job.
///
/// Ordinary task failures are not errors; they end the job with
/// `JobStatus::Failure`.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// A task could not be run at all.
    #[error(transparent)]
    Task(#[from] TaskError),

    #[error("insert of the job failed: {0}")]
    Insert(#[source] StoreError),

    #[error("unable to set job status to {status}: {source}")]
    Status {
        status: JobStatus,
        #[source]
        source: StoreError,
    },
}
