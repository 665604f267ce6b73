//! A thread pool designed for background value computation.
//!
//! Tasks submitted to a [`ThreadPool`] run on a set of pooled OS threads,
//! and each submission returns a [`ResultHandle`] that the submitter can
//! block on to receive the task's [`Value`]. Two sizing disciplines are
//! offered:
//!
//! - [`PoolMode::Fixed`]: a constant number of workers for the pool's
//!   lifetime.
//! - [`PoolMode::Cached`]: a baseline of resident workers that grows up to a
//!   cap while the queue outpaces the idle set, and shrinks back once the
//!   extra workers have been idle long enough.
//!
//! Submissions are bounded: when the task queue is full, `submit` waits a
//! limited time for space and then hands back an *invalid* handle rather
//! than failing. Dropping the pool stops it, waiting for in-flight tasks to
//! finish and discarding the rest of the queue.
//!
//! # Examples
//!
//! ```
//! use threadmill::ThreadPool;
//!
//! let pool = ThreadPool::builder().size(4).build();
//!
//! let task = pool.submit_fn(|| {
//!     // some expensive computation
//!     2 + 2
//! });
//!
//! // do something in the meantime
//!
//! // now block on the result
//! let sum: i32 = task.get().extract().unwrap();
//! assert_eq!(sum, 4);
//! ```
//!
//! Custom task types implement [`Task`] and are submitted behind an `Arc`:
//!
//! ```
//! use std::sync::Arc;
//! use threadmill::{Task, ThreadPool, Value};
//!
//! struct Sum(u64, u64);
//!
//! impl Task for Sum {
//!     fn run(&self) -> Value {
//!         Value::new((self.0..=self.1).sum::<u64>())
//!     }
//! }
//!
//! let pool = ThreadPool::builder().size(2).build();
//!
//! let handle = pool.submit(Arc::new(Sum(1, 100)));
//!
//! assert_eq!(handle.get().extract::<u64>().unwrap(), 5050);
//! ```

mod error;
mod latch;
mod pool;
mod task;
mod value;
mod worker;

pub use error::{AlreadyRunningError, TypeMismatchError};
pub use pool::{Builder, PoolMode, SizeConstraint, ThreadPool};
pub use task::{ClosureTask, ResultHandle, Task};
pub use value::Value;
