//! Task execution error types.
//!
//! An `Err` from an executor is definitional: the job cannot continue no matter
//! how often the task is retried. Ordinary failures are reported through
//! `TaskResult::success` instead.

use thiserror::Error;

use crate::model::TaskType;

/// Errors that abort a job when a task cannot be run at all.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Task payload is missing or does not match the declared type.
    #[error("Task definition incompatible with specified type ({0})")]
    Definition(TaskType),

    /// No executor registered for the task type.
    #[error("No executor registered for task type: {0}")]
    ExecutorNotFound(TaskType),

    /// Task configuration cannot be turned into a request.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(String),
}

impl From<serde_json::Error> for TaskError {
    fn from(e: serde_json::Error) -> Self {
        TaskError::Json(e.to_string())
    }
}
