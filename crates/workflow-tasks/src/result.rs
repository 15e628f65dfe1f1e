//! Task execution result types.

use serde::{Deserialize, Serialize};

use crate::model::{Task, TaskType};

/// Outcome of one task in a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub name: String,

    #[serde(rename = "type")]
    pub task_type: TaskType,

    pub success: bool,

    #[serde(default)]
    pub skipped: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cli: Option<CliOutput>,

    #[serde(rename = "request", default, skip_serializing_if = "Option::is_none")]
    pub http_request: Option<HttpRequestRecord>,

    #[serde(rename = "response", default, skip_serializing_if = "Option::is_none")]
    pub http_response: Option<HttpResponseRecord>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nats: Option<NatsOutput>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smtp: Option<SmtpOutput>,
}

/// Captured process execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliOutput {
    pub command: Vec<String>,

    /// Standard output.
    pub output: String,

    /// Standard error, or the spawn/timeout error.
    pub error: String,

    pub exit_code: i32,
}

/// The request as actually sent, after expansion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpRequestRecord {
    pub uri: String,
    pub method: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

/// The received response. `status_code` is 0 when no response arrived.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpResponseRecord {
    pub status_code: u16,
    pub body: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NatsOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SmtpOutput {
    pub sender: String,
    pub recipients: Vec<String>,
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskResult {
    /// Create a bare result with no type-specific output.
    pub fn new(name: impl Into<String>, task_type: TaskType, success: bool) -> Self {
        Self {
            name: name.into(),
            task_type,
            success,
            skipped: false,
            cli: None,
            http_request: None,
            http_response: None,
            nats: None,
            smtp: None,
        }
    }

    /// Result recorded for a task whose requirements were not met.
    pub fn skipped(task: &Task) -> Self {
        Self {
            skipped: true,
            ..Self::new(&task.name, task.task_type, true)
        }
    }

    /// Create a result from a finished process.
    pub fn from_cli(task: &Task, output: CliOutput) -> Self {
        Self {
            cli: Some(output),
            ..Self::new(&task.name, task.task_type, false)
        }
        .with_cli_status()
    }

    /// Create a result from an HTTP exchange.
    pub fn from_http(
        task: &Task,
        success: bool,
        request: HttpRequestRecord,
        response: HttpResponseRecord,
    ) -> Self {
        Self {
            http_request: Some(request),
            http_response: Some(response),
            ..Self::new(&task.name, task.task_type, success)
        }
    }

    /// Text output usable by `TASK.json.PATH` expressions.
    ///
    /// HTTP results yield the response body, CLI results their stdout.
    pub fn text_output(&self) -> Option<&str> {
        match self.task_type {
            TaskType::Http => self.http_response.as_ref().map(|r| r.body.as_str()),
            TaskType::Cli => self.cli.as_ref().map(|c| c.output.as_str()),
            TaskType::Nats | TaskType::Smtp => None,
        }
    }

    fn with_cli_status(mut self) -> Self {
        self.success = self.cli.as_ref().is_some_and(|c| c.exit_code == 0);
        self
    }
}
