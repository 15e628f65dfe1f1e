//! In-memory data store.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tokio::sync::RwLock;
use workflow_tasks::{Job, JobStatus, TaskResult, Workflow};

use super::{DataStore, StoreError};

/// Workflows and jobs held in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    workflows: RwLock<HashMap<String, BTreeMap<u32, Workflow>>>,
    jobs: RwLock<HashMap<String, Job>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a workflow definition, replacing the same name and version.
    pub async fn insert_workflow(&self, workflow: Workflow) {
        self.workflows
            .write()
            .await
            .entry(workflow.name.clone())
            .or_default()
            .insert(workflow.version, workflow);
    }

    /// Register every `*.json` workflow definition in `dir`.
    ///
    /// Returns the number of definitions loaded.
    pub async fn load_workflows_dir(&self, dir: &Path) -> Result<usize, StoreError> {
        let mut entries = tokio::fs::read_dir(dir).await?;
        let mut loaded = 0;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let raw = tokio::fs::read(&path).await?;
            let workflow: Workflow =
                serde_json::from_slice(&raw).map_err(|e| StoreError::InvalidDefinition {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?;

            tracing::debug!(
                workflow = %workflow.name,
                version = workflow.version,
                path = %path.display(),
                "Loaded workflow definition"
            );
            self.insert_workflow(workflow).await;
            loaded += 1;
        }

        Ok(loaded)
    }

    /// Stored copy of a job.
    pub async fn get_job(&self, id: &str) -> Option<Job> {
        self.jobs.read().await.get(id).cloned()
    }

    pub async fn job_count(&self) -> usize {
        self.jobs.read().await.len()
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn get_workflow_by_name(
        &self,
        name: &str,
        version: u32,
    ) -> Result<Workflow, StoreError> {
        let workflows = self.workflows.read().await;
        let versions = workflows.get(name);
        let workflow = match version {
            0 => versions.and_then(|v| v.values().next_back()),
            _ => versions.and_then(|v| v.get(&version)),
        };

        workflow.cloned().ok_or_else(|| StoreError::WorkflowNotFound {
            name: name.to_string(),
            version,
        })
    }

    async fn upsert_job(&self, job: &Job) -> Result<String, StoreError> {
        let mut stored = job.clone();
        if stored.id.is_empty() {
            stored.id = uuid::Uuid::new_v4().to_string();
        }
        stored.insert_time.get_or_insert_with(Utc::now);

        let id = stored.id.clone();
        self.jobs.write().await.insert(id.clone(), stored);
        Ok(id)
    }

    async fn update_job_status(&self, job: &Job, status: JobStatus) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        let stored = jobs.entry(job.id.clone()).or_insert_with(|| job.clone());
        stored.status = status;
        Ok(())
    }

    async fn update_job_add_result(
        &self,
        job: &Job,
        result: &TaskResult,
    ) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&job.id) {
            Some(stored) => stored.results.push(result.clone()),
            // Jobs of ephemeral workflows are first stored on failure.
            None => {
                jobs.insert(job.id.clone(), job.clone());
            }
        }
        Ok(())
    }
}
