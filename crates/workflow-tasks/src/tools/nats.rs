//! NATS publish executor.

use async_nats::jetstream::Context;
use async_trait::async_trait;
use std::sync::Arc;

use crate::error::TaskError;
use crate::model::{NatsTask, Task, TaskPayload, TaskType};
use crate::registry::TaskExecutor;
use crate::result::{NatsOutput, TaskResult};
use crate::template::Expander;

/// Destination for published task messages.
#[async_trait]
pub trait SubjectPublisher: Send + Sync {
    /// Publish and wait for the broker's acknowledgement.
    async fn publish(&self, subject: String, payload: Vec<u8>) -> Result<(), String>;
}

#[async_trait]
impl SubjectPublisher for Context {
    async fn publish(&self, subject: String, payload: Vec<u8>) -> Result<(), String> {
        Context::publish(self, subject, payload.into())
            .await
            .map_err(|e| e.to_string())?
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }
}

/// Executes `nats` tasks by publishing under the workflows stream.
pub struct NatsExecutor {
    publisher: Arc<dyn SubjectPublisher>,
    stream: String,
}

impl NatsExecutor {
    /// Publish through a JetStream context to subjects under `stream`.
    pub fn new(js: Context, stream: impl Into<String>) -> Self {
        Self::with_publisher(Arc::new(js), stream)
    }

    pub fn with_publisher(publisher: Arc<dyn SubjectPublisher>, stream: impl Into<String>) -> Self {
        Self {
            publisher,
            stream: stream.into(),
        }
    }

    fn subject(&self, nats: &NatsTask, expander: &Expander<'_>) -> String {
        format!("{}.{}", self.stream, expander.expand(&nats.subject))
    }

    async fn publish(
        &self,
        task: &Task,
        nats: &NatsTask,
        expander: &Expander<'_>,
    ) -> Result<TaskResult, TaskError> {
        let subject = self.subject(nats, expander);
        let payload = serde_json::to_vec(&expander.expand_value(&nats.data))?;

        tracing::debug!(task = %task.name, subject = %subject, "Publishing task message");

        let error = match self.publisher.publish(subject.clone(), payload).await {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!(task = %task.name, subject = %subject, error = %e, "Publish failed");
                Some(e)
            }
        };

        Ok(TaskResult {
            nats: Some(NatsOutput {
                error: error.clone(),
            }),
            ..TaskResult::new(&task.name, task.task_type, error.is_none())
        })
    }
}

#[async_trait]
impl TaskExecutor for NatsExecutor {
    fn task_type(&self) -> TaskType {
        TaskType::Nats
    }

    async fn execute(
        &self,
        task: &Task,
        expander: &Expander<'_>,
    ) -> Result<TaskResult, TaskError> {
        match task.payload()? {
            TaskPayload::Nats(nats) => self.publish(task, nats, expander).await,
            _ => Err(TaskError::Definition(task.task_type)),
        }
    }
}
