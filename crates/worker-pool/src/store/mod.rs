//! Job and workflow persistence.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use thiserror::Error;
use workflow_tasks::{Job, JobStatus, TaskResult, Workflow};

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("workflow not found: {name} (version {version})")]
    WorkflowNotFound { name: String, version: u32 },

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("invalid workflow definition {path}: {reason}")]
    InvalidDefinition { path: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Durable storage used by the job processor.
///
/// Shared by all workers; implementations must be safe for concurrent use.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Workflow definition by name and version; version 0 selects the latest.
    async fn get_workflow_by_name(&self, name: &str, version: u32)
        -> Result<Workflow, StoreError>;

    /// Insert or replace a job, returning its ID.
    async fn upsert_job(&self, job: &Job) -> Result<String, StoreError>;

    async fn update_job_status(&self, job: &Job, status: JobStatus) -> Result<(), StoreError>;

    /// Append one task result to the stored job.
    async fn update_job_add_result(&self, job: &Job, result: &TaskResult)
        -> Result<(), StoreError>;
}
