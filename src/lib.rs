//! Promises for a single-threaded cooperative scheduler.
//!
//! A [`Promise`] settles once, to a value, an error, or cancellation.
//! Callbacks chained with [`Promise::then`] and friends always run on a later
//! tick of the [`Scheduler`], and a promise resolved with another promise or
//! any [`Thenable`] adopts that thenable's outcome. [`Deferred`] hands the
//! resolver out to the caller, [`Promise::all`] and [`Promise::race`] combine
//! promises, and `.await` suspends a task until a promise settles.
//!
//! ```
//! use coop_promise::{Deferred, Promise, Scheduler};
//!
//! let scheduler = Scheduler::new();
//! let handle = scheduler.handle();
//! let deferred = Deferred::<u32>::new(&handle);
//! let doubled = deferred.promise().then(|v| Ok(v * 2));
//!
//! deferred.resolve(21).unwrap();
//! let answer = scheduler.block_on(async move { doubled.await }).unwrap();
//! assert_eq!(answer, Ok(42));
//! ```

mod await_bridge;
mod combinators;
mod deferred;
mod error;
mod promise;
mod scheduler;
mod state;
mod thenable;

pub use await_bridge::{await_thenable, Await};
pub use deferred::{defer, Deferred};
pub use error::{Error, Reason};
pub use promise::{Promise, Resolver};
pub use scheduler::{yield_now, Scheduler, SchedulerConfig, SchedulerHandle, TaskId, YieldNow};
pub use state::State;
pub use thenable::{is_thenable, IntoResolution, OnFulfilled, OnRejected, Resolution, Thenable};
