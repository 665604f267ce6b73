//! The worker thread main loop.

use std::{
    sync::{atomic::Ordering, Arc},
    time::{Duration, Instant},
};

use log::debug;

use crate::pool::{Inner, PoolMode, Shared, State};

/// How often an over-baseline cached worker wakes from its idle wait to
/// check whether it should retire.
const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A worker thread which belongs to a thread pool and executes tasks.
pub(crate) struct Worker {
    id: u64,
    shared: Arc<Shared>,
}

impl Worker {
    pub(crate) fn new(id: u64, shared: Arc<Shared>) -> Self {
        Self { id, shared }
    }

    pub(crate) fn run(self) {
        let mut last_active = Instant::now();

        loop {
            let mut inner = self.shared.inner.lock().unwrap();

            // Idle wait. The shutdown check comes before the dequeue so that
            // tasks still queued once draining begins are discarded, not run.
            let submission = loop {
                if inner.state != State::Running {
                    debug!("worker {} exiting: pool is shutting down", self.id);
                    self.retire(&mut inner);
                    return;
                }

                if let Some(submission) = inner.queue.pop_front() {
                    break submission;
                }

                let over_baseline = self.shared.current_workers.load(Ordering::SeqCst)
                    > inner.initial_workers;

                if inner.mode == PoolMode::Cached && over_baseline {
                    let (guard, result) = self
                        .shared
                        .not_empty
                        .wait_timeout(inner, IDLE_POLL_INTERVAL)
                        .unwrap();
                    inner = guard;

                    // Only retire if no task slipped in while the wait was
                    // timing out; otherwise loop around and dequeue it.
                    if result.timed_out()
                        && inner.queue.is_empty()
                        && last_active.elapsed() >= inner.idle_timeout
                        && self.shared.current_workers.load(Ordering::SeqCst)
                            > inner.initial_workers
                    {
                        debug!(
                            "worker {} retiring after {:?} idle",
                            self.id, inner.idle_timeout
                        );
                        self.retire(&mut inner);
                        return;
                    }
                } else {
                    inner = self.shared.not_empty.wait(inner).unwrap();
                }
            };

            self.shared
                .queue_size
                .store(inner.queue.len(), Ordering::SeqCst);
            self.shared.idle_workers.fetch_sub(1, Ordering::SeqCst);
            self.shared.not_full.notify_one();

            // Leave a wakeup behind for a sibling if there is more work.
            if !inner.queue.is_empty() {
                self.shared.not_empty.notify_one();
            }

            drop(inner);

            let panicked = submission.execute();

            self.shared.completed_tasks.fetch_add(1, Ordering::SeqCst);
            if panicked {
                self.shared.panicked_tasks.fetch_add(1, Ordering::SeqCst);
            }

            self.shared.idle_workers.fetch_add(1, Ordering::SeqCst);
            last_active = Instant::now();
        }
    }

    /// Deregister this worker and wake the shutdown waiter. Both retirement
    /// paths run while the worker is counted idle and holding the pool lock.
    fn retire(&self, inner: &mut Inner) {
        inner.registry.remove(&self.id);
        self.shared.current_workers.fetch_sub(1, Ordering::SeqCst);
        self.shared.idle_workers.fetch_sub(1, Ordering::SeqCst);
        self.shared.exit.notify_all();
    }
}
