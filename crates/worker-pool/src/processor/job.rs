//! Job processor.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use workflow_tasks::{
    ExecutorRegistry, Expander, Job, JobStatus, Task, TaskError, TaskResult,
};

use super::ProcessError;
use crate::store::DataStore;

/// Runs the tasks of a job's workflow and records the outcome.
pub struct JobProcessor {
    store: Arc<dyn DataStore>,
    registry: Arc<ExecutorRegistry>,
    persist_ephemeral: bool,
}

impl JobProcessor {
    pub fn new(store: Arc<dyn DataStore>, registry: Arc<ExecutorRegistry>) -> Self {
        Self {
            store,
            registry,
            persist_ephemeral: false,
        }
    }

    /// Persist runs of ephemeral workflows as if they were regular ones.
    pub fn with_persist_ephemeral(mut self, persist: bool) -> Self {
        self.persist_ephemeral = persist;
        self
    }

    /// Process `job` to a terminal status.
    ///
    /// Task failures end the job with `JobStatus::Failure` and are not
    /// errors. `cancel` only interrupts retry delays.
    pub async fn process_job(
        &self,
        job: &mut Job,
        cancel: &CancellationToken,
    ) -> Result<(), ProcessError> {
        let workflow = match self
            .store
            .get_workflow_by_name(&job.workflow_name, job.workflow_version)
            .await
        {
            Ok(workflow) => workflow,
            Err(e) => {
                tracing::warn!(
                    job_id = %job.id,
                    workflow = %job.workflow_name,
                    version = job.workflow_version,
                    error = %e,
                    "Workflow of job does not exist"
                );
                return self.finish(job, JobStatus::Failure).await;
            }
        };

        let persist = !workflow.ephemeral || self.persist_ephemeral;

        if persist {
            job.status = JobStatus::Pending;
            let id = self
                .store
                .upsert_job(job)
                .await
                .map_err(ProcessError::Insert)?;
            if job.id.is_empty() {
                job.id = id;
            }
        }

        tracing::info!(job_id = %job.id, workflow = %workflow.name, "Job started");

        let mut success = true;
        for task in &workflow.tasks {
            tracing::info!(job_id = %job.id, task = %task.name, "Task started");

            let result = match self.run_task(task, job, cancel).await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(
                        job_id = %job.id,
                        task = %task.name,
                        error = %e,
                        "Task cannot be executed"
                    );
                    job.status = JobStatus::Failure;
                    if let Err(store_err) =
                        self.store.update_job_status(job, JobStatus::Failure).await
                    {
                        tracing::warn!(job_id = %job.id, error = %store_err, "Unable to set job status to failure");
                    }
                    return Err(e.into());
                }
            };

            let task_success = result.success;
            job.results.push(result);

            if persist || !task_success {
                if let Some(result) = job.results.last() {
                    if let Err(e) = self.store.update_job_add_result(job, result).await {
                        tracing::error!(job_id = %job.id, task = %task.name, error = %e, "Error uploading results");
                    }
                }
            }

            if !task_success {
                tracing::warn!(job_id = %job.id, task = %task.name, "Task failed");
                success = false;
                break;
            }
        }

        let status = if success {
            JobStatus::Done
        } else {
            JobStatus::Failure
        };

        if persist {
            self.finish(job, status).await?;
        } else {
            job.status = status;
        }

        tracing::info!(job_id = %job.id, status = %status, "Job done");
        Ok(())
    }

    /// Set and store the final status.
    async fn finish(&self, job: &mut Job, status: JobStatus) -> Result<(), ProcessError> {
        job.status = status;
        self.store
            .update_job_status(job, status)
            .await
            .map_err(|source| ProcessError::Status { status, source })
    }

    /// Run one task, retrying unsuccessful attempts.
    async fn run_task(
        &self,
        task: &Task,
        job: &Job,
        cancel: &CancellationToken,
    ) -> Result<TaskResult, TaskError> {
        let expander = Expander::for_job(job);

        if task.requires.iter().any(|r| expander.expand(r).is_empty()) {
            tracing::debug!(job_id = %job.id, task = %task.name, "Requirements not met, skipping task");
            return Ok(TaskResult::skipped(task));
        }

        task.payload()?;

        let max_attempts = u32::from(task.retries) + 1;
        let mut attempt = 1;
        loop {
            let result = self.registry.execute(task, &expander).await?;
            if result.success || attempt >= max_attempts {
                return Ok(result);
            }

            tracing::warn!(
                job_id = %job.id,
                task = %task.name,
                attempt,
                max_attempts,
                delay_secs = task.retry_delay_seconds,
                "Task attempt failed, retrying"
            );

            if cancel.is_cancelled() {
                return Ok(result);
            }
            if task.retry_delay_seconds > 0 {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        tracing::info!(job_id = %job.id, task = %task.name, "Retry cancelled");
                        return Ok(result);
                    }
                    _ = tokio::time::sleep(Duration::from_secs(task.retry_delay_seconds)) => {}
                }
            }
            attempt += 1;
        }
    }
}
