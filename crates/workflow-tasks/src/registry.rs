//! Task executor registry and dispatch.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::TaskError;
use crate::model::{Task, TaskType};
use crate::result::TaskResult;
use crate::template::Expander;

/// Executor for one task type.
///
/// Returns `Ok` with `success == false` for ordinary failures, which the
/// caller may retry. `Err` means the task cannot run at all.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// The task type this executor handles.
    fn task_type(&self) -> TaskType;

    /// Run one attempt of `task`, expanding its templates with `expander`.
    async fn execute(
        &self,
        task: &Task,
        expander: &Expander<'_>,
    ) -> Result<TaskResult, TaskError>;
}

/// Executors keyed by task type.
#[derive(Default, Clone)]
pub struct ExecutorRegistry {
    executors: HashMap<TaskType, Arc<dyn TaskExecutor>>,
}

impl ExecutorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor, replacing any previous one for its type.
    pub fn register<E: TaskExecutor + 'static>(&mut self, executor: E) {
        self.executors
            .insert(executor.task_type(), Arc::new(executor));
    }

    pub fn get(&self, task_type: TaskType) -> Option<Arc<dyn TaskExecutor>> {
        self.executors.get(&task_type).cloned()
    }

    pub fn has(&self, task_type: TaskType) -> bool {
        self.executors.contains_key(&task_type)
    }

    /// Registered task types.
    pub fn list(&self) -> Vec<TaskType> {
        self.executors.keys().copied().collect()
    }

    /// Dispatch `task` to the executor for its type.
    pub async fn execute(
        &self,
        task: &Task,
        expander: &Expander<'_>,
    ) -> Result<TaskResult, TaskError> {
        let executor = self
            .get(task.task_type)
            .ok_or(TaskError::ExecutorNotFound(task.task_type))?;
        executor.execute(task, expander).await
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("executors", &self.list())
            .finish()
    }
}
