//! Workflow definitions and jobs.
//!
//! Workflow definitions use the camelCase definition format, jobs use the
//! snake_case wire format carried in broker messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::TaskError;
use crate::result::TaskResult;

/// Task type, selecting both the payload and the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Http,
    Cli,
    Nats,
    Smtp,
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskType::Http => write!(f, "http"),
            TaskType::Cli => write!(f, "cli"),
            TaskType::Nats => write!(f, "nats"),
            TaskType::Smtp => write!(f, "smtp"),
        }
    }
}

/// Immutable workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    /// Workflow name, the lookup key together with `version`.
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub version: u32,

    #[serde(default)]
    pub schema_version: u32,

    /// Successful runs are not persisted when set.
    #[serde(default)]
    pub ephemeral: bool,

    /// Declared input parameter names.
    #[serde(default)]
    pub input_parameters: Vec<String>,

    /// Tasks in execution order.
    #[serde(default)]
    pub tasks: Vec<Task>,
}

/// A single step of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub name: String,

    #[serde(rename = "type")]
    pub task_type: TaskType,

    /// Attempts beyond the first.
    #[serde(default)]
    pub retries: u8,

    #[serde(default)]
    pub retry_delay_seconds: u64,

    /// Template expressions; the task is skipped if any expands to "".
    #[serde(default)]
    pub requires: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpTask>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cli: Option<CliTask>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nats: Option<NatsTask>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smtp: Option<SmtpTask>,
}

/// Borrowed view of the payload matching a task's declared type.
#[derive(Debug, Clone, Copy)]
pub enum TaskPayload<'a> {
    Http(&'a HttpTask),
    Cli(&'a CliTask),
    Nats(&'a NatsTask),
    Smtp(&'a SmtpTask),
}

impl Task {
    /// Returns the payload for the declared type.
    ///
    /// Fails with `TaskError::Definition` when that payload is absent.
    pub fn payload(&self) -> Result<TaskPayload<'_>, TaskError> {
        let payload = match self.task_type {
            TaskType::Http => self.http.as_ref().map(TaskPayload::Http),
            TaskType::Cli => self.cli.as_ref().map(TaskPayload::Cli),
            TaskType::Nats => self.nats.as_ref().map(TaskPayload::Nats),
            TaskType::Smtp => self.smtp.as_ref().map(TaskPayload::Smtp),
        };
        payload.ok_or(TaskError::Definition(self.task_type))
    }
}

/// HTTP request task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpTask {
    pub uri: String,

    #[serde(default = "default_method")]
    pub method: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    /// Raw body, expanded as a template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,

    /// JSON body; string leaves are expanded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<serde_json::Value>,

    #[serde(default)]
    pub form_data: HashMap<String, String>,

    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Connection timeout in milliseconds.
    #[serde(default)]
    pub connection_timeout: u64,

    /// Read timeout in milliseconds.
    #[serde(default)]
    pub read_timeout: u64,

    /// Accepted status codes; any 2xx when empty.
    #[serde(default)]
    pub status_codes: Vec<u16>,
}

fn default_method() -> String {
    "GET".to_string()
}

/// Process execution task. `command` is argv, no shell is involved.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CliTask {
    pub command: Vec<String>,

    /// Timeout in seconds, 0 for none.
    #[serde(default)]
    pub execution_timeout: u64,
}

/// Publish to a subject under the workflows stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NatsTask {
    pub subject: String,

    #[serde(default)]
    pub data: serde_json::Value,
}

/// Email task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmtpTask {
    pub from: String,

    #[serde(default)]
    pub to: Vec<String>,

    #[serde(default)]
    pub cc: Vec<String>,

    #[serde(default)]
    pub bcc: Vec<String>,

    #[serde(default)]
    pub subject: String,

    #[serde(default)]
    pub body: String,

    #[serde(default)]
    pub html: String,
}

/// Named job input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputParameter {
    pub name: String,
    pub value: String,
}

impl InputParameter {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Pending,
    Done,
    Failure,
}

impl JobStatus {
    /// Returns true once no further tasks may run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failure)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Done => write!(f, "done"),
            JobStatus::Failure => write!(f, "failure"),
        }
    }
}

/// A workflow run, as submitted on the broker and persisted in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    #[serde(default)]
    pub id: String,

    pub workflow_name: String,

    /// Workflow version; 0 selects the latest registered version.
    #[serde(default)]
    pub workflow_version: u32,

    #[serde(default)]
    pub input_parameters: Vec<InputParameter>,

    #[serde(default)]
    pub status: JobStatus,

    /// One entry per executed or skipped task, in execution order.
    #[serde(default)]
    pub results: Vec<TaskResult>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insert_time: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a pending job for the latest version of a workflow.
    pub fn new(workflow_name: impl Into<String>, input_parameters: Vec<InputParameter>) -> Self {
        Self {
            id: String::new(),
            workflow_name: workflow_name.into(),
            workflow_version: 0,
            input_parameters,
            status: JobStatus::Pending,
            results: Vec::new(),
            insert_time: None,
        }
    }

    /// Set the job ID.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// First input parameter with the given name.
    pub fn input(&self, name: &str) -> Option<&str> {
        self.input_parameters
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }
}
