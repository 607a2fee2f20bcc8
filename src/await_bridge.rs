//! Suspends a cooperative task until a thenable settles.
//!
//! The bridge is a single-consumer slot: the thenable's continuations fill
//! it and wake the suspended task, and the task takes the outcome on its
//! next poll. A rejection comes back as `Err`, so `?` propagates it exactly
//! like a failing synchronous call.
//!
//! # Examples
//!
//! ```
//! use coop_promise::{Promise, Reason, Scheduler};
//!
//! let scheduler = Scheduler::new();
//! let handle = scheduler.handle();
//! let fulfilled = Promise::<i32>::resolved(&handle, 42);
//! let rejected = Promise::<i32>::rejected(&handle, Reason::msg("boom"));
//!
//! let outcome = scheduler.block_on(async move {
//!     let value = fulfilled.await?;
//!     assert_eq!(value, 42);
//!     rejected.await
//! });
//! assert_eq!(outcome.unwrap(), Err(Reason::msg("boom")));
//! ```

use std::cell::RefCell;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use tracing::trace;

use crate::{Error, Promise, Reason, Resolution, Thenable};

#[derive(Debug)]
enum WakerState {
    Fresh,
    Tainted,
}

struct Slot<T, E> {
    outcome: Option<Result<T, E>>,
    waker: Result<Waker, WakerState>,
}

/// Future resolving to a thenable's outcome.
#[must_use = "futures do nothing unless awaited"]
pub struct Await<T, E = Reason> {
    slot: Rc<RefCell<Slot<T, E>>>,
}

impl<T, E> fmt::Debug for Await<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.slot.borrow();
        f.debug_struct("Await")
            .field("ready", &slot.outcome.is_some())
            .field("waker", &slot.waker)
            .finish()
    }
}

impl<T, E> Await<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    fn subscribe(thenable: Box<dyn Thenable<T, E>>) -> Self {
        let slot = Rc::new(RefCell::new(Slot {
            outcome: None,
            waker: Err(WakerState::Fresh),
        }));
        watch(&slot, thenable);
        Self { slot }
    }

    /// Awaits a resolution of unknown shape; a plain value fails with
    /// [`Error::NotThenable`].
    pub fn from_resolution(resolution: Resolution<T, E>) -> Result<Self, Error> {
        resolution.into_thenable().map(Self::subscribe)
    }
}

fn watch<T, E>(slot: &Rc<RefCell<Slot<T, E>>>, thenable: Box<dyn Thenable<T, E>>)
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    let cancelled = slot.clone();
    thenable.on_cancel(Box::new(move || {
        deliver(&cancelled, Err(E::from(Error::Cancelled)));
    }));
    let fulfilled = slot.clone();
    let rejected = slot.clone();
    thenable.then(
        Box::new(move |resolution: Resolution<T, E>| match resolution {
            Resolution::Value(value) => deliver(&fulfilled, Ok(value)),
            Resolution::Promise(promise) => watch(&fulfilled, Box::new(promise)),
            Resolution::Thenable(thenable) => watch(&fulfilled, thenable),
        }),
        Box::new(move |error: E| deliver(&rejected, Err(error))),
    );
}

fn deliver<T, E>(slot: &RefCell<Slot<T, E>>, outcome: Result<T, E>) {
    let waker = {
        let mut slot = slot.borrow_mut();
        if slot.outcome.is_some() || matches!(slot.waker, Err(WakerState::Tainted)) {
            trace!("await slot already filled");
            return;
        }
        slot.outcome = Some(outcome);
        std::mem::replace(&mut slot.waker, Err(WakerState::Tainted))
    };
    if let Ok(waker) = waker {
        waker.wake()
    }
}

impl<T, E> Future for Await<T, E> {
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.slot.borrow_mut();
        match slot.outcome.take() {
            Some(outcome) => Poll::Ready(outcome),
            None => match slot.waker {
                Err(WakerState::Tainted) => panic!("`Await` polled after completion"),
                _ => {
                    slot.waker = Ok(cx.waker().clone());
                    Poll::Pending
                }
            },
        }
    }
}

/// Suspends the calling task until `thenable` settles.
pub fn await_thenable<T, E, Th>(thenable: Th) -> Await<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
    Th: Thenable<T, E>,
{
    Await::subscribe(Box::new(thenable))
}

impl<T, E> IntoFuture for Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    type Output = Result<T, E>;
    type IntoFuture = Await<T, E>;

    fn into_future(self) -> Self::IntoFuture {
        await_thenable(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Scheduler;

    #[test]
    fn plain_value_is_not_awaitable() {
        let value: Resolution<u8, Reason> = Resolution::Value(3);
        assert!(matches!(
            Await::from_resolution(value),
            Err(Error::NotThenable)
        ));
    }

    #[test]
    fn slot_keeps_the_first_outcome() {
        let slot = RefCell::new(Slot::<u8, Reason> {
            outcome: None,
            waker: Err(WakerState::Fresh),
        });
        deliver(&slot, Ok(1));
        deliver(&slot, Err(Reason::msg("late")));
        assert!(matches!(slot.borrow().outcome, Some(Ok(1))));
    }

    #[test]
    fn pending_promise_suspends_the_task() {
        let scheduler = Scheduler::new();
        let handle = scheduler.handle();
        let (promise, resolver) = Promise::<u8>::with_resolver(&handle);
        let seen = Rc::new(RefCell::new(None));
        let out = seen.clone();
        scheduler
            .spawn(async move {
                *out.borrow_mut() = Some(promise.await);
            })
            .unwrap();
        scheduler.run_until_stalled();
        assert!(seen.borrow().is_none());
        assert_eq!(scheduler.pending_tasks(), 1);

        resolver.resolve(5).unwrap();
        scheduler.run_until_stalled();
        assert_eq!(*seen.borrow(), Some(Ok(5)));
    }
}
