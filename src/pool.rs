use std::{
    collections::{HashMap, VecDeque},
    fmt,
    ops::Range,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, Condvar, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

use core_affinity::CoreId;
use log::debug;

use crate::{
    error::AlreadyRunningError,
    task::{ClosureTask, ResultHandle, ResultState, Submission, Task},
    worker::Worker,
};

/// Default bound on the number of queued tasks.
const DEFAULT_QUEUE_LIMIT: usize = 1024;

/// Default bounded wait before a submission is rejected.
const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Default idle time after which an over-baseline cached worker retires.
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Sizing discipline for a [`ThreadPool`].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum PoolMode {
    /// A constant worker count for the pool's lifetime.
    #[default]
    Fixed,

    /// The worker count grows up to a cap in response to queue pressure and
    /// shrinks back to the baseline after sustained idleness.
    Cached,
}

/// A value describing a size constraint for a thread pool.
///
/// See [`Builder::size`] for details.
pub trait SizeConstraint {
    /// Get the baseline number of threads to be in the thread pool.
    fn min(&self) -> usize;

    /// Get the maximum number of threads to be in the thread pool.
    fn max(&self) -> usize;
}

impl SizeConstraint for usize {
    fn min(&self) -> usize {
        *self
    }

    fn max(&self) -> usize {
        *self
    }
}

impl SizeConstraint for Range<usize> {
    fn min(&self) -> usize {
        self.start
    }

    fn max(&self) -> usize {
        self.end
    }
}

/// A builder for constructing a customized thread pool.
///
/// Unlike the two-step [`ThreadPool::new`] + [`start`](ThreadPool::start)
/// flow, [`build`](Builder::build) returns a pool that is already running.
#[derive(Debug, Default)]
pub struct Builder {
    name: Option<String>,
    size: Option<(usize, usize)>,
    stack_size: Option<usize>,
    queue_limit: Option<usize>,
    submit_timeout: Option<Duration>,
    idle_timeout: Option<Duration>,
}

impl Builder {
    /// Set a custom thread name for threads spawned by this thread pool.
    ///
    /// # Panics
    ///
    /// Panics if the name contains null bytes (`\0`).
    pub fn name<T: Into<String>>(mut self, name: T) -> Self {
        let name = name.into();

        if name.as_bytes().contains(&0) {
            panic!("thread pool name must not contain null bytes");
        }

        self.name = Some(name);
        self
    }

    /// Set the number of threads to be managed by this thread pool.
    ///
    /// If a `usize` is supplied, the pool will have a fixed number of
    /// threads. If a range is supplied, the lower bound will be the baseline
    /// pool size while the upper bound will be a maximum size the pool is
    /// allowed to burst up to when the baseline threads are busy.
    ///
    /// If not set, a fixed size matching the number of CPU cores is used.
    ///
    /// # Examples
    ///
    /// ```
    /// // Create a thread pool with exactly 2 threads.
    /// # use threadmill::ThreadPool;
    /// let pool = ThreadPool::builder().size(2).build();
    /// ```
    ///
    /// ```
    /// // Create a thread pool with 2 resident threads that can grow to 8
    /// // when there is more work than idle threads.
    /// # use threadmill::ThreadPool;
    /// let pool = ThreadPool::builder().size(2..8).build();
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if an invalid range is supplied with a lower bound larger than
    /// the upper bound, or if the lower bound is 0.
    pub fn size<S: SizeConstraint>(mut self, size: S) -> Self {
        let (min, max) = (size.min(), size.max());

        if min > max {
            panic!("thread pool baseline size cannot be larger than maximum size");
        }

        if min == 0 {
            panic!("thread pool baseline size must be non-zero");
        }

        self.size = Some((min, max));
        self
    }

    /// Set the size of the stack (in bytes) for threads in this thread pool.
    ///
    /// The actual stack size may be greater than this value if the platform
    /// enforces a larger minimum stack size.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    /// Set the maximum number of pending tasks the pool will hold.
    ///
    /// When the queue is at this limit, submissions block for up to the
    /// configured submit timeout and are then rejected with an invalid
    /// [`ResultHandle`]. Defaults to 1024.
    ///
    /// # Panics
    ///
    /// Panics if the limit is 0.
    pub fn queue_limit(mut self, limit: usize) -> Self {
        if limit == 0 {
            panic!("thread pool queue limit must be non-zero");
        }

        self.queue_limit = Some(limit);
        self
    }

    /// Set how long a submission may wait for queue space before it is
    /// rejected. Defaults to 1 second.
    pub fn submit_timeout(mut self, timeout: Duration) -> Self {
        self.submit_timeout = Some(timeout);
        self
    }

    /// Set a timeout for idle worker threads.
    ///
    /// If the pool has more than the baseline number of threads and threads
    /// remain idle for more than this duration, they will be terminated
    /// until the baseline thread count is reached. Only meaningful for
    /// [`PoolMode::Cached`] pools. Defaults to 60 seconds.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Create a thread pool according to the configuration set with this
    /// builder and start its baseline workers.
    pub fn build(self) -> ThreadPool {
        let mut pool = ThreadPool::new();

        pool.thread_name = self.name;
        pool.stack_size = self.stack_size;

        let (initial, mode, cap) = match self.size {
            Some((min, max)) if min == max => (min, PoolMode::Fixed, None),
            Some((min, max)) => (min, PoolMode::Cached, Some(max)),
            None => (num_cpus::get().max(1), PoolMode::Fixed, None),
        };

        {
            let mut inner = pool.shared.inner.lock().unwrap();

            inner.mode = mode;
            inner.max_workers = cap;

            if let Some(limit) = self.queue_limit {
                inner.max_queue_len = limit;
            }

            if let Some(timeout) = self.submit_timeout {
                inner.submit_timeout = timeout;
            }

            if let Some(timeout) = self.idle_timeout {
                inner.idle_timeout = timeout;
            }
        }

        let result = pool.start_with(initial);
        assert!(result.is_ok());

        pool
    }
}

/// A pool of worker threads that execute submitted tasks and hand their
/// results back through [`ResultHandle`]s.
///
/// A pool is constructed in a configurable state, optionally reconfigured,
/// and then [`start`](ThreadPool::start)ed; or built already running with
/// [`builder`](ThreadPool::builder). Dropping the pool blocks until every
/// worker has observed the shutdown and exited; tasks still queued at that
/// point are discarded without being run.
///
/// # Examples
///
/// ```
/// use threadmill::{PoolMode, ThreadPool};
///
/// let mut pool = ThreadPool::new();
/// pool.set_mode(PoolMode::Cached).unwrap();
/// pool.set_max_workers(8).unwrap();
/// pool.start_with(2).unwrap();
///
/// let handle = pool.submit_fn(|| 2 + 2);
///
/// assert_eq!(handle.get().extract::<i32>().unwrap(), 4);
/// ```
pub struct ThreadPool {
    thread_name: Option<String>,
    stack_size: Option<usize>,
    core_ids: Option<Vec<CoreId>>,
    shared: Arc<Shared>,
}

impl Default for ThreadPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadPool {
    /// Create a new, not yet started thread pool with the default
    /// configuration: fixed mode, a queue bound of 1024 tasks, a 1 second
    /// submission timeout and a 60 second cached-mode idle timeout.
    pub fn new() -> Self {
        Self {
            thread_name: None,
            stack_size: None,
            core_ids: core_affinity::get_core_ids(),
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: State::Configured,
                    mode: PoolMode::default(),
                    initial_workers: 0,
                    max_workers: None,
                    max_queue_len: DEFAULT_QUEUE_LIMIT,
                    submit_timeout: DEFAULT_SUBMIT_TIMEOUT,
                    idle_timeout: DEFAULT_IDLE_TIMEOUT,
                    queue: VecDeque::new(),
                    registry: HashMap::new(),
                    next_worker_id: 0,
                }),
                not_full: Condvar::new(),
                not_empty: Condvar::new(),
                exit: Condvar::new(),
                queue_size: AtomicUsize::new(0),
                current_workers: AtomicUsize::new(0),
                idle_workers: AtomicUsize::new(0),
                completed_tasks: AtomicU64::new(0),
                panicked_tasks: AtomicU64::new(0),
            }),
        }
    }

    /// Get a builder for creating a customized thread pool.
    #[inline]
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Set the sizing discipline of the pool.
    ///
    /// Returns an error if the pool has already been started.
    pub fn set_mode(&mut self, mode: PoolMode) -> Result<(), AlreadyRunningError> {
        self.configure(|inner| inner.mode = mode)
    }

    /// Set the maximum number of pending tasks the pool will hold.
    ///
    /// Returns an error if the pool has already been started.
    ///
    /// # Panics
    ///
    /// Panics if the limit is 0.
    pub fn set_max_queue_len(&mut self, limit: usize) -> Result<(), AlreadyRunningError> {
        if limit == 0 {
            panic!("thread pool queue limit must be non-zero");
        }

        self.configure(|inner| inner.max_queue_len = limit)
    }

    /// Set the worker cap a [`PoolMode::Cached`] pool may grow to.
    ///
    /// If unset, the cap defaults to twice the baseline worker count.
    /// Returns an error if the pool has already been started.
    ///
    /// # Panics
    ///
    /// Panics if the cap is 0.
    pub fn set_max_workers(&mut self, max: usize) -> Result<(), AlreadyRunningError> {
        if max == 0 {
            panic!("thread pool worker cap must be non-zero");
        }

        self.configure(|inner| inner.max_workers = Some(max))
    }

    /// Set how long a submission may wait for queue space before it is
    /// rejected.
    ///
    /// Returns an error if the pool has already been started.
    pub fn set_submit_timeout(&mut self, timeout: Duration) -> Result<(), AlreadyRunningError> {
        self.configure(|inner| inner.submit_timeout = timeout)
    }

    /// Set how long an over-baseline cached worker may stay idle before it
    /// retires.
    ///
    /// Returns an error if the pool has already been started.
    pub fn set_idle_timeout(&mut self, timeout: Duration) -> Result<(), AlreadyRunningError> {
        self.configure(|inner| inner.idle_timeout = timeout)
    }

    fn configure<F: FnOnce(&mut Inner)>(&mut self, apply: F) -> Result<(), AlreadyRunningError> {
        let mut inner = self.shared.inner.lock().unwrap();

        if inner.state != State::Configured {
            return Err(AlreadyRunningError::new());
        }

        apply(&mut inner);

        Ok(())
    }

    /// Start the pool with one baseline worker per CPU core.
    pub fn start(&mut self) -> Result<(), AlreadyRunningError> {
        self.start_with(num_cpus::get().max(1))
    }

    /// Start the pool with the given number of baseline workers.
    ///
    /// Returns an error if the pool has already been started.
    ///
    /// # Panics
    ///
    /// Panics if `initial` is 0, or if a cached pool's worker cap is smaller
    /// than `initial`.
    pub fn start_with(&mut self, initial: usize) -> Result<(), AlreadyRunningError> {
        if initial == 0 {
            panic!("thread pool must start with at least one worker");
        }

        let mut inner = self.shared.inner.lock().unwrap();

        if inner.state != State::Configured {
            return Err(AlreadyRunningError::new());
        }

        inner.initial_workers = initial;

        if inner.mode == PoolMode::Cached {
            let cap = *inner.max_workers.get_or_insert(initial * 2);

            if cap < initial {
                panic!("thread pool worker cap cannot be smaller than the baseline");
            }
        }

        inner.state = State::Running;

        for _ in 0..initial {
            self.spawn_worker(&mut inner);
        }

        Ok(())
    }

    /// Get the number of worker threads currently in the pool.
    pub fn threads(&self) -> usize {
        self.shared.current_workers.load(Ordering::SeqCst)
    }

    /// Get the number of worker threads currently waiting for work.
    pub fn idle_threads(&self) -> usize {
        self.shared.idle_workers.load(Ordering::SeqCst)
    }

    /// Get the number of tasks queued for execution, but not yet started.
    ///
    /// This number will always be less than or equal to the configured
    /// queue limit.
    pub fn queued_tasks(&self) -> usize {
        self.shared.queue_size.load(Ordering::SeqCst)
    }

    /// Get the number of tasks completed (successfully or otherwise) by this
    /// pool since it was created.
    pub fn completed_tasks(&self) -> u64 {
        self.shared.completed_tasks.load(Ordering::SeqCst)
    }

    /// Get the number of tasks that have panicked since the pool was
    /// created.
    pub fn panicked_tasks(&self) -> u64 {
        self.shared.panicked_tasks.load(Ordering::SeqCst)
    }

    /// Submit a task for execution, returning the handle its result will be
    /// delivered through.
    ///
    /// If the queue is full, the call blocks until space frees up, bounded
    /// by the configured submit timeout (1 second by default). If the
    /// timeout elapses, or the pool is not running, the returned handle is
    /// *invalid*: [`ResultHandle::get`] yields an empty
    /// [`Value`](crate::Value) immediately. This is the only backpressure
    /// signal; `submit` never fails otherwise.
    ///
    /// In a [`PoolMode::Cached`] pool, a submission that finds more queued
    /// tasks than idle workers grows the pool by one worker, up to the cap.
    ///
    /// A task must not submit into its own pool and block on the handle
    /// while the queue is at capacity in a single-worker pool, as it would
    /// wait on itself.
    pub fn submit(&self, task: Arc<dyn Task>) -> ResultHandle {
        let state = Arc::new(ResultState::new());
        let mut inner = self.shared.inner.lock().unwrap();

        if inner.state != State::Running {
            return ResultHandle::invalid(state);
        }

        let deadline = Instant::now() + inner.submit_timeout;

        while inner.queue.len() >= inner.max_queue_len {
            if let Some(timeout) = deadline.checked_duration_since(Instant::now()) {
                inner = self.shared.not_full.wait_timeout(inner, timeout).unwrap().0;
            } else {
                debug!(
                    "submission rejected: queue still full after {:?}",
                    inner.submit_timeout
                );
                return ResultHandle::invalid(state);
            }

            if inner.state != State::Running {
                return ResultHandle::invalid(state);
            }
        }

        inner
            .queue
            .push_back(Submission::new(task, Arc::clone(&state)));
        self.shared
            .queue_size
            .store(inner.queue.len(), Ordering::SeqCst);
        self.shared.not_empty.notify_one();

        // Elastic growth: one more worker when the backlog outgrows the
        // idle set and the cap allows it.
        if inner.mode == PoolMode::Cached {
            let current = self.shared.current_workers.load(Ordering::SeqCst);
            let idle = self.shared.idle_workers.load(Ordering::SeqCst);
            let can_grow = inner.max_workers.map_or(false, |cap| current < cap);

            if inner.queue.len() > idle && can_grow {
                self.spawn_worker(&mut inner);
            }
        }

        ResultHandle::valid(state)
    }

    /// Submit a one-shot closure for execution.
    ///
    /// Convenience wrapper around [`submit`](ThreadPool::submit) for
    /// closures; the produced value is type-erased for transport and
    /// recovered with [`Value::extract`](crate::Value::extract).
    ///
    /// # Examples
    ///
    /// ```
    /// let pool = threadmill::ThreadPool::builder().size(4).build();
    ///
    /// let handle = pool.submit_fn(|| (1..=10u64).sum::<u64>());
    ///
    /// assert_eq!(handle.get().extract::<u64>().unwrap(), 55);
    /// ```
    pub fn submit_fn<T, F>(&self, closure: F) -> ResultHandle
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.submit(Arc::new(ClosureTask::new(closure)))
    }

    /// Shut down the pool.
    ///
    /// Equivalent to dropping it: blocks until every worker has finished its
    /// in-flight task and exited. Tasks still waiting in the queue are
    /// discarded and their handles are never signalled.
    pub fn shutdown(self) {
        drop(self);
    }

    /// Spawn an additional worker into the pool.
    ///
    /// Called with the pool lock held; the new worker's first action is to
    /// take that same lock, so it cannot observe the pool before its own
    /// registration is complete.
    fn spawn_worker(&self, inner: &mut Inner) {
        let id = inner.next_worker_id;
        inner.next_worker_id += 1;

        // Configure the thread based on the thread pool configuration.
        let mut builder = thread::Builder::new();

        if let Some(name) = self.thread_name.as_ref() {
            builder = builder.name(name.clone());
        }

        if let Some(size) = self.stack_size {
            builder = builder.stack_size(size);
        }

        // Pin workers to cores in a deterministic round-robin fashion, but
        // only when the baseline is at least as large as the core count.
        let mut core_id = None;

        if let Some(core_ids) = self.core_ids.as_ref() {
            if !core_ids.is_empty() && inner.initial_workers >= core_ids.len() {
                core_id = Some(core_ids[(id as usize) % core_ids.len()]);
            }
        }

        self.shared.current_workers.fetch_add(1, Ordering::SeqCst);
        self.shared.idle_workers.fetch_add(1, Ordering::SeqCst);

        let worker = Worker::new(id, Arc::clone(&self.shared));

        let handle = builder
            .spawn(move || {
                if let Some(core_id) = core_id {
                    core_affinity::set_for_current(core_id);
                }

                worker.run();
            })
            .expect("failed to spawn worker thread");

        inner.registry.insert(id, handle);
        debug!("worker {} spawned", id);
    }
}

impl Drop for ThreadPool {
    /// Shut down the pool: discard queued tasks, wake every idle worker and
    /// block until all of them have deregistered themselves.
    fn drop(&mut self) {
        let mut inner = self.shared.inner.lock().unwrap();

        if inner.state == State::Configured {
            return;
        }

        inner.state = State::Draining;

        if !inner.queue.is_empty() {
            debug!("discarding {} queued tasks at shutdown", inner.queue.len());
        }

        self.shared.not_empty.notify_all();
        self.shared.not_full.notify_all();

        while !inner.registry.is_empty() {
            inner = self.shared.exit.wait(inner).unwrap();
        }

        inner.queue.clear();
        self.shared.queue_size.store(0, Ordering::SeqCst);
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("threads", &self.threads())
            .field("queued_tasks", &self.queued_tasks())
            .field("completed_tasks", &self.completed_tasks())
            .finish()
    }
}

/// Pool state shared by the owner and the worker threads.
///
/// One mutex guards the queue, the registry and the configuration; the
/// atomic counters mirror queue and worker totals so they can be read
/// without taking it. They are only written while the lock is held, except
/// for the idle count a worker re-raises after finishing a task.
pub(crate) struct Shared {
    pub(crate) inner: Mutex<Inner>,
    pub(crate) not_full: Condvar,
    pub(crate) not_empty: Condvar,
    pub(crate) exit: Condvar,
    pub(crate) queue_size: AtomicUsize,
    pub(crate) current_workers: AtomicUsize,
    pub(crate) idle_workers: AtomicUsize,
    pub(crate) completed_tasks: AtomicU64,
    pub(crate) panicked_tasks: AtomicU64,
}

pub(crate) struct Inner {
    pub(crate) state: State,
    pub(crate) mode: PoolMode,
    pub(crate) initial_workers: usize,
    pub(crate) max_workers: Option<usize>,
    pub(crate) max_queue_len: usize,
    pub(crate) submit_timeout: Duration,
    pub(crate) idle_timeout: Duration,
    pub(crate) queue: VecDeque<Submission>,
    pub(crate) registry: HashMap<u64, thread::JoinHandle<()>>,
    pub(crate) next_worker_id: u64,
}

/// Lifecycle of a pool. The terminal "stopped" point is reached inside
/// `Draining` once the registry has emptied.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum State {
    Configured,
    Running,
    Draining,
}
