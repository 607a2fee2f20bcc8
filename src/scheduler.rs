//! Single-threaded cooperative scheduler.
//!
//! Exactly one unit of work runs at a time. A unit of work is a future; it
//! runs until it returns `Poll::Pending`, and is polled again only after its
//! waker fires. Woken tasks are polled in the order they were woken, which
//! gives promise reactions their deterministic "next tick" ordering.
//!
//! The scheduler is created, driven and shut down explicitly. Promises hold a
//! [`SchedulerHandle`], a weak reference, so a dropped scheduler never keeps
//! its tasks alive through the promises they own.
//!
//! # Examples
//!
//! ```
//! use coop_promise::{Scheduler, yield_now};
//! use std::{cell::RefCell, rc::Rc};
//!
//! let scheduler = Scheduler::new();
//! let log = Rc::new(RefCell::new(Vec::new()));
//! for name in ["a", "b"] {
//!     let log = log.clone();
//!     scheduler.spawn(async move {
//!         log.borrow_mut().push(format!("{name}1"));
//!         yield_now().await;
//!         log.borrow_mut().push(format!("{name}2"));
//!     }).unwrap();
//! }
//! scheduler.run_until_stalled();
//! assert_eq!(*log.borrow(), ["a1", "b1", "a2", "b2"]);
//! ```

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::num::NonZeroUsize;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use futures::future::LocalBoxFuture;
use futures::task::{waker, ArcWake};
use futures::FutureExt;
use tracing::{debug, debug_span, trace, warn};

use crate::Error;

/// Identifier of a unit of work, unique per scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Label attached to the scheduler's log events.
    pub name: String,
    /// Upper bound on polls performed by one `run_until_stalled` call.
    pub max_polls_per_run: Option<NonZeroUsize>,
    /// Number of task slots allocated up front.
    pub initial_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            name: "scheduler".to_string(),
            max_polls_per_run: None,
            initial_capacity: 64,
        }
    }
}

impl SchedulerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Caps every `run_until_stalled` call at `max` polls. The budget is
    /// never zero, so each run makes progress when work is ready.
    pub fn with_max_polls_per_run(mut self, max: NonZeroUsize) -> Self {
        self.max_polls_per_run = Some(max);
        self
    }

    pub fn with_initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }
}

type ReadyQueue = Arc<Mutex<VecDeque<TaskId>>>;

struct TaskWaker {
    id: TaskId,
    queued: AtomicBool,
    ready: ReadyQueue,
}

impl ArcWake for TaskWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        if arc_self.queued.swap(true, Ordering::AcqRel) {
            return;
        }
        arc_self
            .ready
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(arc_self.id);
    }
}

struct Task {
    future: LocalBoxFuture<'static, ()>,
    waker: Arc<TaskWaker>,
}

struct Shared {
    config: SchedulerConfig,
    tasks: RefCell<HashMap<TaskId, Task>>,
    ready: ReadyQueue,
    next_id: Cell<u64>,
    shutdown: Cell<bool>,
}

impl Shared {
    fn spawn(&self, future: LocalBoxFuture<'static, ()>) -> Result<TaskId, Error> {
        if self.shutdown.get() {
            warn!(scheduler = %self.config.name, "spawn after shutdown refused");
            return Err(Error::SchedulerShutdown);
        }
        let id = TaskId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        let waker = Arc::new(TaskWaker {
            id,
            queued: AtomicBool::new(false),
            ready: self.ready.clone(),
        });
        self.tasks.borrow_mut().insert(
            id,
            Task {
                future,
                waker: waker.clone(),
            },
        );
        ArcWake::wake_by_ref(&waker);
        trace!(scheduler = %self.config.name, task = %id, "spawned");
        Ok(id)
    }

    fn pop_ready(&self) -> Option<TaskId> {
        self.ready
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    fn has_ready(&self) -> bool {
        !self
            .ready
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Polls one task; `false` when the id no longer names a live task.
    fn poll_task(&self, id: TaskId) -> bool {
        // The task leaves the table while it runs so it can spawn freely.
        let Some(mut task) = self.tasks.borrow_mut().remove(&id) else {
            return false;
        };
        task.waker.queued.store(false, Ordering::Release);
        let task_waker = waker(task.waker.clone());
        let mut cx = Context::from_waker(&task_waker);
        trace!(scheduler = %self.config.name, task = %id, "polling");
        match task.future.as_mut().poll(&mut cx) {
            Poll::Ready(()) => {
                trace!(scheduler = %self.config.name, task = %id, "completed");
            }
            Poll::Pending if self.shutdown.get() => {}
            Poll::Pending => {
                self.tasks.borrow_mut().insert(id, task);
            }
        }
        true
    }

    fn shutdown(&self) {
        if self.shutdown.replace(true) {
            return;
        }
        let tasks = std::mem::take(&mut *self.tasks.borrow_mut());
        self.ready
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        debug!(
            scheduler = %self.config.name,
            dropped = tasks.len(),
            "scheduler shut down"
        );
        drop(tasks);
    }
}

/// Owner of the run queue. Dropping it drops every unfinished task.
pub struct Scheduler {
    shared: Rc<Shared>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        let tasks = HashMap::with_capacity(config.initial_capacity);
        let ready = VecDeque::with_capacity(config.initial_capacity);
        Self {
            shared: Rc::new(Shared {
                config,
                tasks: RefCell::new(tasks),
                ready: Arc::new(Mutex::new(ready)),
                next_id: Cell::new(0),
                shutdown: Cell::new(false),
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            shared: Rc::downgrade(&self.shared),
        }
    }

    pub fn spawn<F>(&self, future: F) -> Result<TaskId, Error>
    where
        F: Future<Output = ()> + 'static,
    {
        self.shared.spawn(future.boxed_local())
    }

    /// Polls ready tasks in wake order until none is ready or the configured
    /// poll budget is spent. Returns the number of polls performed.
    pub fn run_until_stalled(&self) -> usize {
        let shared = &self.shared;
        let _span = debug_span!("run", scheduler = %shared.config.name).entered();
        let mut polls = 0;
        loop {
            if let Some(max) = shared.config.max_polls_per_run {
                if polls >= max.get() {
                    debug!(polls, "poll budget exhausted");
                    break;
                }
            }
            let Some(id) = shared.pop_ready() else {
                break;
            };
            if shared.poll_task(id) {
                polls += 1;
            }
        }
        trace!(polls, pending = shared.tasks.borrow().len(), "stalled");
        polls
    }

    /// Drives `future` to completion on this scheduler.
    ///
    /// Other tasks run interleaved with it. Fails with [`Error::Stalled`]
    /// when nothing is left to poll and the future is still suspended.
    pub fn block_on<F>(&self, future: F) -> Result<F::Output, Error>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let slot = Rc::new(RefCell::new(None));
        let output = slot.clone();
        self.spawn(async move {
            let value = future.await;
            *output.borrow_mut() = Some(value);
        })?;
        loop {
            let polls = self.run_until_stalled();
            if let Some(value) = slot.borrow_mut().take() {
                return Ok(value);
            }
            if self.shared.shutdown.get() {
                return Err(Error::SchedulerShutdown);
            }
            if polls == 0 && !self.shared.has_ready() {
                debug!(scheduler = %self.shared.config.name, "block_on stalled");
                return Err(Error::Stalled);
            }
        }
    }

    /// Drops every unfinished task and refuses further work.
    pub fn shutdown(&self) {
        self.shared.shutdown();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.get()
    }

    /// Number of tasks spawned and not yet completed.
    pub fn pending_tasks(&self) -> usize {
        self.shared.tasks.borrow().len()
    }
}

/// Clonable capability to put work on a scheduler.
///
/// Every operation fails with [`Error::SchedulerShutdown`] once the
/// scheduler was shut down or dropped.
#[derive(Clone)]
pub struct SchedulerHandle {
    shared: Weak<Shared>,
}

impl fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.shared.upgrade() {
            Some(shared) => f
                .debug_struct("SchedulerHandle")
                .field("name", &shared.config.name)
                .field("shutdown", &shared.shutdown.get())
                .finish(),
            None => f.write_str("SchedulerHandle(<dropped>)"),
        }
    }
}

impl SchedulerHandle {
    /// Runs `future` as a new cooperatively scheduled unit of work.
    pub fn spawn<F>(&self, future: F) -> Result<TaskId, Error>
    where
        F: Future<Output = ()> + 'static,
    {
        let shared = self.shared.upgrade().ok_or(Error::SchedulerShutdown)?;
        shared.spawn(future.boxed_local())
    }

    /// Runs `f` as a new unit of work on a later tick.
    pub fn schedule<F>(&self, f: F) -> Result<TaskId, Error>
    where
        F: FnOnce() + 'static,
    {
        self.spawn(async move { f() })
    }

    pub fn is_alive(&self) -> bool {
        self.shared
            .upgrade()
            .is_some_and(|shared| !shared.shutdown.get())
    }

    pub fn same_scheduler(&self, other: &SchedulerHandle) -> bool {
        Weak::ptr_eq(&self.shared, &other.shared)
    }
}

/// Returns a future that suspends the current task for exactly one tick.
pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

#[derive(Debug)]
#[must_use = "futures do nothing unless awaited"]
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}
