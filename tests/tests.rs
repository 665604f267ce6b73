use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

use threadmill::{PoolMode, Task, ThreadPool, Value};

fn single_thread() -> ThreadPool {
    ThreadPool::builder().size(1).build()
}

/// Poll a condition until it holds or the timeout passes.
fn eventually(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;

    while Instant::now() < deadline {
        if condition() {
            return true;
        }

        thread::sleep(Duration::from_millis(10));
    }

    condition()
}

#[test]
#[should_panic(expected = "thread pool name must not contain null bytes")]
fn name_with_null_bytes_panics() {
    ThreadPool::builder().name("uh\0oh").build();
}

#[test]
#[should_panic(expected = "thread pool baseline size cannot be larger than maximum size")]
fn invalid_size_panics() {
    ThreadPool::builder().size(2..1);
}

#[test]
#[should_panic(expected = "thread pool baseline size must be non-zero")]
fn zero_baseline_panics() {
    ThreadPool::builder().size(0..4);
}

#[test]
#[should_panic(expected = "thread pool queue limit must be non-zero")]
fn zero_queue_limit_panics() {
    ThreadPool::builder().queue_limit(0);
}

#[test]
#[should_panic(expected = "thread pool must start with at least one worker")]
fn zero_initial_workers_panics() {
    let mut pool = ThreadPool::new();
    let _ = pool.start_with(0);
}

#[test]
#[should_panic(expected = "thread pool worker cap cannot be smaller than the baseline")]
fn cap_below_baseline_panics() {
    let mut pool = ThreadPool::new();
    pool.set_mode(PoolMode::Cached).unwrap();
    pool.set_max_workers(2).unwrap();
    let _ = pool.start_with(4);
}

#[test]
fn submit_and_get() {
    let pool = single_thread();

    let result = pool.submit_fn(|| 2 + 2).get();

    assert_eq!(result.extract::<i32>().unwrap(), 4);
}

#[test]
fn start_with_default_parallelism() {
    let mut pool = ThreadPool::new();
    pool.start().unwrap();

    assert!(pool.threads() >= 1);

    let result = pool.submit_fn(|| 21u32 * 2).get();

    assert_eq!(result.extract::<u32>().unwrap(), 42);
}

struct SumRange(u64, u64);

impl Task for SumRange {
    fn run(&self) -> Value {
        Value::new((self.0..=self.1).sum::<u64>())
    }
}

#[test]
fn summation_over_four_workers() {
    let pool = ThreadPool::builder().size(4).build();

    let handles = vec![
        pool.submit(Arc::new(SumRange(1, 2_500_000))),
        pool.submit(Arc::new(SumRange(2_500_001, 5_000_000))),
        pool.submit(Arc::new(SumRange(5_000_001, 7_500_000))),
        pool.submit(Arc::new(SumRange(7_500_001, 10_000_000))),
    ];

    let total: u64 = handles
        .into_iter()
        .map(|handle| handle.get().extract::<u64>().unwrap())
        .sum();

    assert_eq!(total, 50_000_005_000_000);
}

#[test]
fn values_round_trip() {
    #[derive(Debug, PartialEq)]
    struct Point {
        x: i32,
        y: i32,
    }

    let pool = ThreadPool::builder().size(2).build();

    let text = pool.submit_fn(|| String::from("hello")).get();
    assert_eq!(text.extract::<String>().unwrap(), "hello");

    let bytes = pool.submit_fn(|| vec![1u8, 2, 3]).get();
    assert_eq!(bytes.extract::<Vec<u8>>().unwrap(), vec![1, 2, 3]);

    let point = pool.submit_fn(|| Point { x: -3, y: 7 }).get();
    assert_eq!(point.extract::<Point>().unwrap(), Point { x: -3, y: 7 });
}

#[test]
fn type_mismatch_is_recoverable() {
    let pool = single_thread();

    let value = pool.submit_fn(|| 42i32).get();

    let err = value.extract::<String>().unwrap_err();
    let value = err.into_inner();

    assert_eq!(value.extract::<i32>().unwrap(), 42);
}

#[test]
fn tasks_run_in_submission_order() {
    let pool = single_thread();
    let order = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = (0..10)
        .map(|i| {
            let order = order.clone();
            pool.submit_fn(move || order.lock().unwrap().push(i))
        })
        .collect();

    for handle in handles {
        handle.get();
    }

    assert_eq!(*order.lock().unwrap(), (0..10).collect::<Vec<_>>());
}

#[test]
fn submit_before_start_is_invalid() {
    let pool = ThreadPool::new();

    let handle = pool.submit_fn(|| 2 + 2);

    assert!(!handle.is_valid());
    assert!(handle.get().is_empty());
}

#[test]
fn configuration_is_frozen_after_start() {
    let mut pool = ThreadPool::new();
    pool.start_with(1).unwrap();

    assert!(pool.set_mode(PoolMode::Cached).is_err());
    assert!(pool.set_max_queue_len(16).is_err());
    assert!(pool.set_max_workers(8).is_err());
    assert!(pool.set_submit_timeout(Duration::from_millis(100)).is_err());
    assert!(pool.set_idle_timeout(Duration::from_millis(100)).is_err());
    assert!(pool.start_with(2).is_err());
}

#[test]
fn full_queue_submission_times_out() {
    let mut pool = ThreadPool::new();
    pool.set_max_queue_len(2).unwrap();
    pool.set_submit_timeout(Duration::from_millis(300)).unwrap();
    pool.start_with(1).unwrap();

    // Occupy the only worker, then fill the queue.
    let blocker = pool.submit_fn(|| thread::sleep(Duration::from_millis(800)));
    thread::sleep(Duration::from_millis(100));

    let fillers = vec![
        pool.submit_fn(|| ()),
        pool.submit_fn(|| ()),
    ];
    assert!(fillers.iter().all(|handle| handle.is_valid()));

    let started = Instant::now();
    let rejected = pool.submit_fn(|| ());
    let elapsed = started.elapsed();

    assert!(!rejected.is_valid());
    assert!(elapsed >= Duration::from_millis(250));
    assert!(elapsed < Duration::from_millis(700));

    // An invalid handle yields an empty value without blocking.
    let started = Instant::now();
    assert!(rejected.get().is_empty());
    assert!(started.elapsed() < Duration::from_millis(50));

    blocker.get();
    for handle in fillers {
        handle.get();
    }
}

#[test]
fn panicking_task_delivers_empty_value() {
    let pool = single_thread();

    let value = pool.submit_fn(|| panic!("oh no!")).get();

    assert!(value.is_empty());
    assert_eq!(pool.panicked_tasks(), 1);

    // The worker survives the panic.
    let result = pool.submit_fn(|| 2 + 2).get();
    assert_eq!(result.extract::<i32>().unwrap(), 4);
    assert_eq!(pool.completed_tasks(), 2);
}

#[test]
fn fixed_pool_keeps_constant_size() {
    let mut pool = ThreadPool::new();
    pool.set_idle_timeout(Duration::from_millis(100)).unwrap();
    pool.start_with(3).unwrap();

    assert_eq!(pool.threads(), 3);

    let handles: Vec<_> = (0..12)
        .map(|_| pool.submit_fn(|| thread::sleep(Duration::from_millis(50))))
        .collect();

    for handle in handles {
        handle.get();
    }

    // No growth under pressure, no shrink after idleness.
    thread::sleep(Duration::from_millis(300));
    assert_eq!(pool.threads(), 3);
    assert_eq!(pool.idle_threads(), 3);
}

#[test]
fn cached_pool_grows_and_shrinks() {
    let mut pool = ThreadPool::new();
    pool.set_mode(PoolMode::Cached).unwrap();
    pool.set_max_workers(8).unwrap();
    pool.set_max_queue_len(100).unwrap();
    pool.set_idle_timeout(Duration::from_millis(500)).unwrap();
    pool.start_with(2).unwrap();

    assert_eq!(pool.threads(), 2);

    let handles: Vec<_> = (0..20)
        .map(|_| pool.submit_fn(|| thread::sleep(Duration::from_millis(300))))
        .collect();

    // Queue pressure grows the pool to its cap, and never beyond it.
    assert!(eventually(Duration::from_secs(5), || pool.threads() == 8));
    assert!(pool.threads() <= 8);

    for handle in handles {
        handle.get();
    }

    // Sustained idleness retires the over-baseline workers.
    assert!(eventually(Duration::from_secs(10), || pool.threads() == 2));
    assert_eq!(pool.idle_threads(), 2);
}

#[test]
fn batch_takes_a_round_per_worker_set() {
    let pool = ThreadPool::builder().size(2).build();

    let started = Instant::now();

    let handles: Vec<_> = (0..6)
        .map(|_| pool.submit_fn(|| thread::sleep(Duration::from_millis(200))))
        .collect();

    for handle in handles {
        handle.get();
    }

    let elapsed = started.elapsed();

    // 6 tasks of 200ms over 2 workers is 3 rounds.
    assert!(elapsed >= Duration::from_millis(600));
    assert!(elapsed < Duration::from_secs(3));
}

#[test]
fn shutdown_discards_queued_tasks() {
    let completed = Arc::new(AtomicUsize::new(0));

    let pool = ThreadPool::builder().size(4).build();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let completed = completed.clone();
            pool.submit_fn(move || {
                thread::sleep(Duration::from_millis(300));
                completed.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    // Let the workers pick up their first tasks, then shut down.
    thread::sleep(Duration::from_millis(100));
    drop(pool);

    // Destruction waited for the in-flight tasks but discarded the rest.
    let ran = completed.load(Ordering::SeqCst);
    assert!(ran >= 1);
    assert!(ran <= 4);

    // No worker is left running anything.
    thread::sleep(Duration::from_millis(400));
    assert_eq!(completed.load(Ordering::SeqCst), ran);

    // Handles for discarded tasks are never signalled.
    let last = handles.into_iter().last().unwrap();
    assert!(last.is_valid());
    assert!(last.get_timeout(Duration::from_millis(100)).is_err());
}

#[test]
fn get_timeout_expires_then_recovers() {
    let pool = single_thread();

    let handle = pool.submit_fn(|| {
        thread::sleep(Duration::from_millis(300));
        7u8
    });

    let handle = handle
        .get_timeout(Duration::from_millis(50))
        .expect_err("task cannot have finished yet");

    assert_eq!(handle.get().extract::<u8>().unwrap(), 7);
}

#[test]
fn handle_reports_readiness() {
    let pool = single_thread();

    let handle = pool.submit_fn(|| 9i64);

    assert!(eventually(Duration::from_secs(2), || handle.is_ready()));

    let started = Instant::now();
    assert_eq!(handle.get().extract::<i64>().unwrap(), 9);
    assert!(started.elapsed() < Duration::from_millis(50));
}

#[test]
fn thread_name_applies_to_workers() {
    let pool = ThreadPool::builder().name("mill").size(1).build();

    let name = pool
        .submit_fn(|| thread::current().name().unwrap().to_owned())
        .get();

    assert_eq!(name.extract::<String>().unwrap(), "mill");
}

#[test]
fn shutdown_is_idempotent_on_unstarted_pools() {
    // Dropping a pool that never started must not block.
    let pool = ThreadPool::new();
    drop(pool);

    ThreadPool::builder().size(1).build().shutdown();
}
