//! Workflow Task Library
//!
//! Shared building blocks for running workflow jobs.
//!
//! This crate provides:
//! - Workflow, task and job model (the JSON wire and definition formats)
//! - `${...}` template expansion over job inputs, environment and task output
//! - Task executor trait with a registry keyed by task type
//! - Built-in executors: http, cli, nats

pub mod error;
pub mod model;
pub mod registry;
pub mod result;
pub mod template;
pub mod tools;

pub use error::TaskError;
pub use model::{InputParameter, Job, JobStatus, Task, TaskPayload, TaskType, Workflow};
pub use registry::{ExecutorRegistry, TaskExecutor};
pub use result::TaskResult;
pub use template::Expander;
