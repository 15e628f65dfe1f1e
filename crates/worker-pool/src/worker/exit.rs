//! Shutdown barriers for a worker group.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use super::WorkerId;

/// Tracks live workers and fires the first-exit and all-exited signals.
///
/// Both signals fire once and stay observable afterwards.
#[derive(Debug, Default)]
pub(crate) struct ExitTracker {
    live: AtomicUsize,
    /// Worker that exited first; also serialises exit accounting.
    term_id: Mutex<Option<WorkerId>>,
    first_exit: CancellationToken,
    all_exited: CancellationToken,
}

impl ExitTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Count `n` workers as live before they start.
    ///
    /// Refused once all registered workers have exited.
    pub(crate) fn register(&self, n: usize) -> bool {
        let _exits = self.term_id.lock().unwrap_or_else(|e| e.into_inner());
        if self.all_exited.is_cancelled() {
            return false;
        }
        self.live.fetch_add(n, Ordering::SeqCst);
        true
    }

    /// Record the exit of worker `id`. Returns true for the first exit.
    pub(crate) fn exit(&self, id: WorkerId) -> bool {
        let mut term_id = self.term_id.lock().unwrap_or_else(|e| e.into_inner());

        let first = term_id.is_none();
        if first {
            *term_id = Some(id);
            self.first_exit.cancel();
        }

        let previous = self.live.fetch_sub(1, Ordering::SeqCst);
        if previous == 1 {
            self.all_exited.cancel();
        }

        tracing::debug!(worker_id = id, first, live = previous - 1, "Worker exit recorded");
        first
    }

    pub(crate) fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub(crate) fn term_id(&self) -> Option<WorkerId> {
        *self.term_id.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn first_exit(&self) -> &CancellationToken {
        &self.first_exit
    }

    pub(crate) fn all_exited(&self) -> &CancellationToken {
        &self.all_exited
    }
}

/// Records a worker's exit when dropped, including on panic.
pub(crate) struct ExitGuard {
    id: WorkerId,
    tracker: Arc<ExitTracker>,
}

impl ExitGuard {
    pub(crate) fn new(id: WorkerId, tracker: Arc<ExitTracker>) -> Self {
        Self { id, tracker }
    }
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        if self.tracker.exit(self.id) {
            tracing::info!(worker_id = self.id, "First worker exited");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;

    #[test]
    fn test_single_worker_fires_both() {
        let tracker = ExitTracker::new();
        assert!(tracker.register(1));
        assert!(tracker.exit(1));
        assert!(tracker.first_exit().is_cancelled());
        assert!(tracker.all_exited().is_cancelled());
        assert_eq!(tracker.term_id(), Some(1));
    }

    #[test]
    fn test_random_exit_order() {
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let n = 8;
            let tracker = ExitTracker::new();
            assert!(tracker.register(n));

            let mut ids: Vec<WorkerId> = (1..=n as WorkerId).collect();
            ids.shuffle(&mut rng);

            let (last, rest) = ids.split_last().unwrap();
            let mut firsts = 0;
            for id in rest {
                if tracker.exit(*id) {
                    firsts += 1;
                }
                assert!(tracker.first_exit().is_cancelled());
                assert!(!tracker.all_exited().is_cancelled());
            }
            assert!(!tracker.exit(*last));
            assert_eq!(firsts, 1);
            assert!(tracker.all_exited().is_cancelled());
            assert_eq!(tracker.term_id(), Some(ids[0]));
            assert_eq!(tracker.live(), 0);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_exits() {
        for _ in 0..50 {
            let n = 16;
            let tracker = Arc::new(ExitTracker::new());
            assert!(tracker.register(n));
            let firsts = Arc::new(AtomicUsize::new(0));

            let mut ids: Vec<WorkerId> = (1..=n as WorkerId).collect();
            ids.shuffle(&mut rand::thread_rng());

            let handles: Vec<_> = ids
                .into_iter()
                .map(|id| {
                    let tracker = tracker.clone();
                    let firsts = firsts.clone();
                    tokio::spawn(async move {
                        tokio::task::yield_now().await;
                        if tracker.exit(id) {
                            firsts.fetch_add(1, Ordering::SeqCst);
                        }
                    })
                })
                .collect();

            tokio::time::timeout(
                std::time::Duration::from_secs(5),
                tracker.all_exited().cancelled(),
            )
            .await
            .unwrap();
            for handle in handles {
                handle.await.unwrap();
            }

            assert_eq!(firsts.load(Ordering::SeqCst), 1);
            let term_id = tracker.term_id().unwrap();
            assert!((1..=n as WorkerId).contains(&term_id));
        }
    }

    #[test]
    fn test_guard_records_exit_on_panic() {
        let tracker = Arc::new(ExitTracker::new());
        assert!(tracker.register(2));

        let guarded = tracker.clone();
        let result = std::thread::spawn(move || {
            let _guard = ExitGuard::new(7, guarded);
            panic!("worker failed");
        })
        .join();
        assert!(result.is_err());

        assert_eq!(tracker.term_id(), Some(7));
        assert!(!tracker.all_exited().is_cancelled());

        drop(ExitGuard::new(8, tracker.clone()));
        assert!(tracker.all_exited().is_cancelled());
    }

    #[test]
    fn test_register_refused_after_all_exited() {
        let tracker = ExitTracker::new();
        assert!(tracker.register(2));
        assert!(tracker.exit(1));
        assert!(tracker.register(1));
        assert!(!tracker.exit(2));
        assert!(!tracker.exit(3));
        assert!(tracker.all_exited().is_cancelled());

        assert!(!tracker.register(1));
        assert_eq!(tracker.live(), 0);
    }
}
