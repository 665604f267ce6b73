use std::{
    sync::{Condvar, Mutex},
    time::Instant,
};

/// A counting rendezvous primitive with an initial count of zero.
///
/// Used to block a submitter until the worker running its task has delivered
/// a result. `signal` keeps all state inside the mutex guard, so it stays
/// safe even when called during process teardown where condition variable
/// destruction order is unspecified.
pub(crate) struct Latch {
    count: Mutex<usize>,
    cvar: Condvar,
}

impl Latch {
    pub(crate) fn new() -> Self {
        Self {
            count: Mutex::new(0),
            cvar: Condvar::new(),
        }
    }

    /// Block until the count is positive, then take one unit.
    pub(crate) fn wait(&self) {
        let mut count = self.count.lock().unwrap();

        while *count == 0 {
            count = self.cvar.wait(count).unwrap();
        }

        *count -= 1;
    }

    /// Block until the count is positive or the deadline passes.
    ///
    /// Returns `true` if a unit was taken.
    pub(crate) fn wait_deadline(&self, deadline: Instant) -> bool {
        let mut count = self.count.lock().unwrap();

        while *count == 0 {
            if let Some(timeout) = deadline.checked_duration_since(Instant::now()) {
                count = self.cvar.wait_timeout(count, timeout).unwrap().0;
            } else {
                return false;
            }
        }

        *count -= 1;

        true
    }

    /// Add one unit and wake all waiters.
    pub(crate) fn signal(&self) {
        let mut count = self.count.lock().unwrap();
        *count += 1;
        self.cvar.notify_all();
    }
}
