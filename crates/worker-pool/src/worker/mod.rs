//! Worker group.
//!
//! A fixed set of workers shares one message source. Each worker receives
//! a job message, processes it while a heartbeat sidecar keeps the message
//! alive, and acknowledges it. The group exposes two shutdown barriers: the
//! first worker exit and the exit of the last worker.

mod exit;
mod sidecar;

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use workflow_tasks::Job;

use crate::nats::BrokerError;
use crate::processor::JobProcessor;
use exit::{ExitGuard, ExitTracker};
use sidecar::Sidecar;

pub type WorkerId = u32;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("worker group has already shut down")]
    ShutDown,
}

/// An inbound message that can be acknowledged.
#[async_trait]
pub trait Delivery: Send + Sync + 'static {
    fn payload(&self) -> &[u8];

    /// Positive acknowledgement; the message will not be redelivered.
    async fn ack(&self) -> Result<(), BrokerError>;

    /// Reject the message permanently.
    async fn term(&self) -> Result<(), BrokerError>;

    /// Extend the ack deadline.
    async fn in_progress(&self) -> Result<(), BrokerError>;
}

/// Source of job messages shared by all workers of a group.
#[async_trait]
pub trait MessageSource: Send + Sync + 'static {
    type Message: Delivery;

    /// Next message; `None` when nothing arrived in time.
    ///
    /// An error ends the calling worker.
    async fn next_message(&self) -> Result<Option<Self::Message>, BrokerError>;
}

/// Pool of workers over one message source.
pub struct WorkerGroup<S: MessageSource> {
    source: Arc<S>,
    processor: Arc<JobProcessor>,
    notify_period: Duration,
    next_id: AtomicU32,
    exits: Arc<ExitTracker>,
}

impl<S: MessageSource> WorkerGroup<S> {
    pub fn new(source: Arc<S>, processor: Arc<JobProcessor>, notify_period: Duration) -> Self {
        Self {
            source,
            processor,
            notify_period,
            next_id: AtomicU32::new(1),
            exits: Arc::new(ExitTracker::new()),
        }
    }

    /// Spawn `count` workers that run until `cancel` fires or their source fails.
    ///
    /// Fails once every previously spawned worker has exited, since the
    /// all-exited barrier has then fired for good.
    pub fn spawn_workers(
        &self,
        count: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<JoinHandle<()>>, PoolError> {
        if !self.exits.register(count) {
            return Err(PoolError::ShutDown);
        }

        let handles = (0..count)
            .map(|_| {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                let guard = ExitGuard::new(id, self.exits.clone());
                let worker = Worker {
                    source: self.source.clone(),
                    processor: self.processor.clone(),
                    notify_period: self.notify_period,
                    cancel: cancel.clone(),
                };

                tokio::spawn(
                    async move {
                        let _guard = guard;
                        worker.run().await;
                    }
                    .instrument(tracing::info_span!("worker", worker_id = id)),
                )
            })
            .collect();
        Ok(handles)
    }

    /// Resolves once any worker has exited.
    pub async fn first_exit(&self) {
        self.exits.first_exit().cancelled().await;
    }

    /// Resolves once every spawned worker has exited.
    pub async fn all_exited(&self) {
        self.exits.all_exited().cancelled().await;
    }

    /// ID of the worker that exited first.
    pub fn term_id(&self) -> Option<WorkerId> {
        self.exits.term_id()
    }

    pub fn live_workers(&self) -> usize {
        self.exits.live()
    }
}

struct Worker<S: MessageSource> {
    source: Arc<S>,
    processor: Arc<JobProcessor>,
    notify_period: Duration,
    cancel: CancellationToken,
}

impl<S: MessageSource> Worker<S> {
    async fn run(self) {
        tracing::info!("Worker started");
        let (sidecar, heartbeat) = Sidecar::spawn(self.notify_period, self.cancel.clone());

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    tracing::debug!("Worker cancelled");
                    break;
                }
                next = self.source.next_message() => next,
            };

            match next {
                Ok(Some(msg)) => self.handle(&sidecar, Arc::new(msg)).await,
                Ok(None) => continue,
                Err(e) => {
                    tracing::error!(error = %e, "Receiving jobs failed, worker exiting");
                    break;
                }
            }
        }

        drop(sidecar);
        if let Err(e) = heartbeat.await {
            tracing::warn!(error = %e, "Heartbeat sidecar failed");
        }
        tracing::info!("Worker stopped");
    }

    async fn handle(&self, sidecar: &Sidecar<S::Message>, msg: Arc<S::Message>) {
        sidecar.busy(msg.clone()).await;

        let mut job: Job = match serde_json::from_slice(msg.payload()) {
            Ok(job) => job,
            Err(e) => {
                tracing::warn!(error = %e, "Invalid job message, terminating it");
                sidecar.idle().await;
                if let Err(e) = msg.term().await {
                    tracing::warn!(error = %e, "Failed to terminate message");
                }
                return;
            }
        };

        tracing::debug!(job_id = %job.id, workflow = %job.workflow_name, "Received job");

        if let Err(e) = self.processor.process_job(&mut job, &self.cancel).await {
            tracing::error!(job_id = %job.id, error = %e, "Job processing failed");
        }

        sidecar.idle().await;
        if let Err(e) = msg.ack().await {
            tracing::warn!(job_id = %job.id, error = %e, "Failed to ack message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::Mutex;
    use tokio::time::Instant;
    use workflow_tasks::result::CliOutput;
    use workflow_tasks::{
        ExecutorRegistry, Expander, JobStatus, Task, TaskError, TaskExecutor, TaskResult,
        TaskType, Workflow,
    };

    const PERIOD: Duration = Duration::from_secs(10);

    #[derive(Default)]
    struct Counters {
        acks: AtomicUsize,
        terms: AtomicUsize,
        beats: AtomicUsize,
        acked_at: Mutex<Vec<Instant>>,
    }

    impl Counters {
        fn acks(&self) -> usize {
            self.acks.load(Ordering::SeqCst)
        }

        fn terms(&self) -> usize {
            self.terms.load(Ordering::SeqCst)
        }

        fn beats(&self) -> usize {
            self.beats.load(Ordering::SeqCst)
        }
    }

    struct FakeDelivery {
        payload: Vec<u8>,
        counters: Arc<Counters>,
        hang: bool,
    }

    #[async_trait]
    impl Delivery for FakeDelivery {
        fn payload(&self) -> &[u8] {
            &self.payload
        }

        async fn ack(&self) -> Result<(), BrokerError> {
            self.counters.acked_at.lock().unwrap().push(Instant::now());
            self.counters.acks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn term(&self) -> Result<(), BrokerError> {
            self.counters.terms.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn in_progress(&self) -> Result<(), BrokerError> {
            self.counters.beats.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                std::future::pending::<()>().await;
            }
            Ok(())
        }
    }

    /// Queue of scripted receive outcomes; behaves like an idle pull
    /// consumer once drained.
    #[derive(Default)]
    struct FakeSource {
        queue: Mutex<VecDeque<Result<Vec<u8>, BrokerError>>>,
        counters: Arc<Counters>,
        /// Deliveries whose heartbeats never complete.
        hang: AtomicBool,
    }

    impl FakeSource {
        fn push_job(&self, job: &Job) {
            self.push_raw(serde_json::to_vec(job).unwrap());
        }

        fn push_raw(&self, payload: Vec<u8>) {
            self.queue.lock().unwrap().push_back(Ok(payload));
        }

        fn push_error(&self) {
            self.queue
                .lock()
                .unwrap()
                .push_back(Err(BrokerError::Receive("connection closed".to_string())));
        }
    }

    #[async_trait]
    impl MessageSource for FakeSource {
        type Message = FakeDelivery;

        async fn next_message(&self) -> Result<Option<FakeDelivery>, BrokerError> {
            let next = self.queue.lock().unwrap().pop_front();
            match next {
                Some(Ok(payload)) => Ok(Some(FakeDelivery {
                    payload,
                    counters: self.counters.clone(),
                    hang: self.hang.load(Ordering::SeqCst),
                })),
                Some(Err(e)) => Err(e),
                None => {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    Ok(None)
                }
            }
        }
    }

    /// CLI executor that takes three and a half notify periods.
    struct SlowExecutor;

    #[async_trait]
    impl TaskExecutor for SlowExecutor {
        fn task_type(&self) -> TaskType {
            TaskType::Cli
        }

        async fn execute(
            &self,
            task: &Task,
            _expander: &Expander<'_>,
        ) -> Result<TaskResult, TaskError> {
            tokio::time::sleep(PERIOD * 3 + PERIOD / 2).await;
            Ok(TaskResult::from_cli(
                task,
                CliOutput {
                    command: vec!["sleep".to_string()],
                    ..Default::default()
                },
            ))
        }
    }

    async fn setup(tasks: serde_json::Value) -> (WorkerGroup<FakeSource>, Arc<FakeSource>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let workflow: Workflow = serde_json::from_value(serde_json::json!({
            "name": "rotate_keys",
            "version": 1,
            "tasks": tasks
        }))
        .unwrap();
        store.insert_workflow(workflow).await;

        let mut registry = ExecutorRegistry::new();
        registry.register(SlowExecutor);
        let processor = Arc::new(JobProcessor::new(store.clone(), Arc::new(registry)));

        let source = Arc::new(FakeSource::default());
        (
            WorkerGroup::new(source.clone(), processor, PERIOD),
            source,
            store,
        )
    }

    async fn wait_for(condition: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(600), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        })
        .await
        .unwrap();
    }

    /// Paused-clock timers fire on millisecond ticks.
    fn assert_near(actual: Duration, expected: Duration) {
        let skew = if actual > expected {
            actual - expected
        } else {
            expected - actual
        };
        assert!(
            skew <= Duration::from_millis(5),
            "expected {:?}, got {:?}",
            expected,
            actual
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_workers_process_and_ack_jobs() {
        let (group, source, store) = setup(serde_json::json!([])).await;
        for i in 0..5 {
            source.push_job(&Job::new("rotate_keys", vec![]).with_id(format!("job-{}", i)));
        }

        let cancel = CancellationToken::new();
        let handles = group.spawn_workers(2, &cancel).unwrap();
        assert_eq!(group.live_workers(), 2);

        let counters = source.counters.clone();
        wait_for(|| counters.acks() == 5).await;

        cancel.cancel();
        group.all_exited().await;
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(counters.terms(), 0);
        for i in 0..5 {
            let job = store.get_job(&format!("job-{}", i)).await.unwrap();
            assert_eq!(job.status, JobStatus::Done);
        }
        assert_eq!(group.live_workers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_message_is_terminated() {
        let (group, source, store) = setup(serde_json::json!([])).await;
        source.push_raw(b"not a job".to_vec());
        source.push_job(&Job::new("rotate_keys", vec![]).with_id("job-1"));

        let cancel = CancellationToken::new();
        group.spawn_workers(1, &cancel).unwrap();

        let counters = source.counters.clone();
        wait_for(|| counters.acks() == 1).await;
        cancel.cancel();
        group.all_exited().await;

        assert_eq!(counters.terms(), 1);
        assert_eq!(store.get_job("job-1").await.unwrap().status, JobStatus::Done);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeats_during_long_job() {
        let (group, source, _store) = setup(serde_json::json!([
            {"name": "slow", "type": "cli", "cli": {"command": ["sleep"]}}
        ]))
        .await;
        source.push_job(&Job::new("rotate_keys", vec![]).with_id("job-1"));

        let cancel = CancellationToken::new();
        group.spawn_workers(1, &cancel).unwrap();

        let counters = source.counters.clone();
        wait_for(|| counters.acks() == 1).await;
        cancel.cancel();
        group.all_exited().await;

        assert_eq!(counters.beats(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_processing_error_still_acks() {
        let (group, source, store) = setup(serde_json::json!([
            {"name": "mail", "type": "smtp", "smtp": {"from": "ops@example.com"}}
        ]))
        .await;
        source.push_job(&Job::new("rotate_keys", vec![]).with_id("job-1"));

        let cancel = CancellationToken::new();
        group.spawn_workers(1, &cancel).unwrap();

        let counters = source.counters.clone();
        wait_for(|| counters.acks() == 1).await;
        cancel.cancel();
        group.all_exited().await;

        assert_eq!(store.get_job("job-1").await.unwrap().status, JobStatus::Failure);
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_error_ends_worker() {
        let (group, source, _store) = setup(serde_json::json!([])).await;
        source.push_error();

        let cancel = CancellationToken::new();
        let handles = group.spawn_workers(3, &cancel).unwrap();

        group.first_exit().await;
        assert!(group.term_id().is_some());
        assert_eq!(group.live_workers(), 2);
        assert!(!cancel.is_cancelled());

        cancel.cancel();
        group.all_exited().await;
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(group.live_workers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_every_worker() {
        let (group, _source, _store) = setup(serde_json::json!([])).await;

        let cancel = CancellationToken::new();
        let mut handles = group.spawn_workers(2, &cancel).unwrap();
        handles.extend(group.spawn_workers(2, &cancel).unwrap());
        assert_eq!(group.live_workers(), 4);

        cancel.cancel();
        group.all_exited().await;
        for handle in handles {
            handle.await.unwrap();
        }

        let term_id = group.term_id().unwrap();
        assert!((1..=4).contains(&term_id));
        // Barriers stay fired.
        group.first_exit().await;
        group.all_exited().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_after_all_exited_is_refused() {
        let (group, source, _store) = setup(serde_json::json!([])).await;
        source.push_error();

        let cancel = CancellationToken::new();
        group.spawn_workers(1, &cancel).unwrap();
        group.all_exited().await;

        assert!(matches!(
            group.spawn_workers(1, &cancel),
            Err(PoolError::ShutDown)
        ));
        assert_eq!(group.live_workers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_heartbeat_does_not_stall_worker() {
        let (group, source, _store) = setup(serde_json::json!([
            {"name": "slow", "type": "cli", "cli": {"command": ["sleep"]}}
        ]))
        .await;
        source.hang.store(true, Ordering::SeqCst);
        source.push_job(&Job::new("rotate_keys", vec![]).with_id("job-1"));
        source.push_job(&Job::new("rotate_keys", vec![]).with_id("job-2"));

        let start = Instant::now();
        let cancel = CancellationToken::new();
        group.spawn_workers(1, &cancel).unwrap();

        let counters = source.counters.clone();
        wait_for(|| counters.acks() == 2).await;
        cancel.cancel();
        group.all_exited().await;

        let job_time = PERIOD * 3 + PERIOD / 2;
        let acked_at = counters.acked_at.lock().unwrap().clone();
        // The idle notice fits the channel; the next busy notice gives up
        // after an eighth of a period while the sidecar is stuck.
        assert_near(acked_at[0] - start, job_time);
        assert_near(acked_at[1] - start, job_time * 2 + PERIOD / 8);
        // Each stuck heartbeat is abandoned after one period.
        assert_eq!(counters.beats(), 2);
    }
}
