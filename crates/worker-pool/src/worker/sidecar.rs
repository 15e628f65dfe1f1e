//! Heartbeat sidecar.
//!
//! Keeps the in-flight message of a worker alive by sending in-progress
//! signals every notify period, so long jobs are not redelivered.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::Delivery;

enum Notice<M> {
    Busy(Arc<M>),
    Idle,
}

/// Handle the main loop uses to report what it is working on.
pub(crate) struct Sidecar<M> {
    tx: mpsc::Sender<Notice<M>>,
    period: Duration,
}

impl<M: Delivery> Sidecar<M> {
    /// Start the sidecar task. It exits on cancellation or when the
    /// handle is dropped.
    pub(crate) fn spawn(period: Duration, cancel: CancellationToken) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(1);
        let handle = tokio::spawn(run(rx, period, cancel).in_current_span());
        (Self { tx, period }, handle)
    }

    /// Start heartbeats for `msg`, waiting at most an eighth of the period.
    pub(crate) async fn busy(&self, msg: Arc<M>) {
        self.notify(Notice::Busy(msg), self.period / 8).await;
    }

    /// Stop heartbeats, waiting at most one period.
    pub(crate) async fn idle(&self) {
        self.notify(Notice::Idle, self.period).await;
    }

    async fn notify(&self, notice: Notice<M>, limit: Duration) {
        match timeout(limit, self.tx.send(notice)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => tracing::debug!("Heartbeat sidecar is gone"),
            Err(_) => tracing::warn!(timeout = ?limit, "Heartbeat sidecar notification timed out"),
        }
    }
}

async fn run<M: Delivery>(
    mut rx: mpsc::Receiver<Notice<M>>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut current: Option<Arc<M>> = None;
    let deadline = tokio::time::sleep(period);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            notice = rx.recv() => match notice {
                Some(Notice::Busy(msg)) => {
                    current = Some(msg);
                    deadline.as_mut().reset(Instant::now() + period);
                }
                Some(Notice::Idle) => current = None,
                None => break,
            },
            _ = &mut deadline, if current.is_some() => {
                if let Some(msg) = &current {
                    match timeout(period, msg.in_progress()).await {
                        Ok(Ok(())) => tracing::trace!("Heartbeat sent"),
                        Ok(Err(e)) => tracing::warn!(error = %e, "Heartbeat failed"),
                        Err(_) => tracing::warn!("Heartbeat timed out"),
                    }
                }
                deadline.as_mut().reset(Instant::now() + period);
            }
        }
    }
    tracing::debug!("Heartbeat sidecar stopped");
}
