//! Task abstraction, the queue entry pairing a task with its result slot,
//! and the submitter-side handle used to retrieve that result.

use std::{
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use crate::{latch::Latch, value::Value};

/// A unit of work that produces one [`Value`].
///
/// Implement this trait for your own task types and hand them to
/// [`ThreadPool::submit`](crate::ThreadPool::submit) behind an `Arc`. The
/// pool never inspects a task; it only invokes [`run`](Task::run) on some
/// worker thread.
///
/// For one-shot closures, [`ThreadPool::submit_fn`](crate::ThreadPool::submit_fn)
/// wraps the closure in a [`ClosureTask`] for you.
///
/// # Examples
///
/// ```
/// use threadmill::{Task, Value};
///
/// struct Square(i64);
///
/// impl Task for Square {
///     fn run(&self) -> Value {
///         Value::new(self.0 * self.0)
///     }
/// }
/// ```
pub trait Task: Send + Sync {
    /// Run the task to completion, producing its result.
    ///
    /// Called exactly once per submission by a worker thread. A panic raised
    /// here is absorbed by the worker; the submitter receives an empty
    /// [`Value`] instead.
    fn run(&self) -> Value;
}

/// Adapter that lets a one-shot closure act as a [`Task`].
///
/// The closure is kept in a slot behind a mutex so that it can be consumed
/// through a shared reference. Running the task a second time yields an
/// empty [`Value`], but the pool never does so for a single submission.
pub struct ClosureTask {
    closure: Mutex<Option<Box<dyn FnOnce() -> Value + Send>>>,
}

impl ClosureTask {
    /// Wrap a closure, erasing the type of the value it produces.
    pub fn new<T, F>(closure: F) -> Self
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        Self {
            closure: Mutex::new(Some(Box::new(move || Value::new(closure())))),
        }
    }
}

impl Task for ClosureTask {
    fn run(&self) -> Value {
        match self.closure.lock().unwrap().take() {
            Some(closure) => closure(),
            None => Value::empty(),
        }
    }
}

/// Rendezvous state shared between one queued task and its [`ResultHandle`].
pub(crate) struct ResultState {
    slot: Mutex<Option<Value>>,
    latch: Latch,
}

impl ResultState {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            latch: Latch::new(),
        }
    }

    /// Store the produced value and release the waiting submitter.
    fn set(&self, value: Value) {
        *self.slot.lock().unwrap() = Some(value);
        self.latch.signal();
    }

    fn take(&self) -> Value {
        self.slot.lock().unwrap().take().unwrap_or_default()
    }
}

/// A task queued in the pool, paired with the state its result lands in.
///
/// The submission owns the task for as long as it sits in the queue or is
/// executing; the handle only shares the result state. Pairing the two here
/// instead of inside the task keeps the ownership graph acyclic.
pub(crate) struct Submission {
    task: Arc<dyn Task>,
    result: Arc<ResultState>,
}

impl Submission {
    pub(crate) fn new(task: Arc<dyn Task>, result: Arc<ResultState>) -> Self {
        Self { task, result }
    }

    /// Run the task and deliver its value to the submitter.
    ///
    /// A panicking task delivers an empty value; the worker thread survives.
    /// Returns whether the task panicked.
    pub(crate) fn execute(self) -> bool {
        let (value, panicked) = match catch_unwind(AssertUnwindSafe(|| self.task.run())) {
            Ok(value) => (value, false),
            Err(_) => (Value::empty(), true),
        };

        self.result.set(value);

        panicked
    }
}

/// The submitter-side receiver for the result of one submitted task.
///
/// A handle is returned by every call to
/// [`ThreadPool::submit`](crate::ThreadPool::submit). A *valid* handle will
/// be signalled by the worker that executes the bound task; an *invalid*
/// handle (the submission was rejected, or the pool was not running) yields
/// an empty [`Value`] without blocking.
///
/// # Examples
///
/// ```
/// use threadmill::ThreadPool;
///
/// let pool = ThreadPool::builder().size(2).build();
///
/// let handle = pool.submit_fn(|| 2 + 2);
///
/// assert!(handle.is_valid());
/// assert_eq!(handle.get().extract::<i32>().unwrap(), 4);
/// ```
pub struct ResultHandle {
    state: Arc<ResultState>,
    valid: bool,
}

impl ResultHandle {
    pub(crate) fn valid(state: Arc<ResultState>) -> Self {
        Self { state, valid: true }
    }

    pub(crate) fn invalid(state: Arc<ResultState>) -> Self {
        Self {
            state,
            valid: false,
        }
    }

    /// Check whether the submission behind this handle was accepted.
    ///
    /// When this returns `false`, [`get`](ResultHandle::get) returns an
    /// empty [`Value`] immediately.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Check whether the result has already been delivered.
    ///
    /// If this returns `true`, then calling [`get`](ResultHandle::get) will
    /// not block.
    pub fn is_ready(&self) -> bool {
        self.state.slot.lock().unwrap().is_some()
    }

    /// Block the current thread until the task's result arrives, then move
    /// it out.
    ///
    /// An invalid handle returns an empty [`Value`] without blocking. A
    /// valid handle whose task was discarded by a pool shutdown is never
    /// signalled; use [`get_timeout`](ResultHandle::get_timeout) when that
    /// is a possibility.
    pub fn get(self) -> Value {
        if !self.valid {
            return Value::empty();
        }

        self.state.latch.wait();
        self.state.take()
    }

    /// Block the current thread until the task's result arrives or a
    /// timeout is reached.
    pub fn get_timeout(self, timeout: Duration) -> Result<Value, Self> {
        self.get_deadline(Instant::now() + timeout)
    }

    /// Block the current thread until the task's result arrives or the
    /// given deadline passes.
    pub fn get_deadline(self, deadline: Instant) -> Result<Value, Self> {
        if !self.valid {
            return Ok(Value::empty());
        }

        if self.state.latch.wait_deadline(deadline) {
            Ok(self.state.take())
        } else {
            Err(self)
        }
    }
}

impl fmt::Debug for ResultHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultHandle")
            .field("valid", &self.valid)
            .field("ready", &self.is_ready())
            .finish()
    }
}
