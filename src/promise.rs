//! The promise settlement algorithm.
//!
//! A [`Promise`] is a handle onto one settlement core holding the state, the
//! settled value or error, and a FIFO queue of reactions. Settling drains the
//! queue; each reaction of the settled channel is scheduled as its own unit
//! of work, so callbacks always run on a later tick than the settlement that
//! triggered them.
//!
//! Every `then` returns a new child promise resolved from the callback's
//! result. A callback returning a promise or another thenable makes the
//! child adopt that thenable's eventual outcome.
//!
//! # Examples
//!
//! ```
//! use coop_promise::{Promise, Reason, Scheduler};
//!
//! let scheduler = Scheduler::new();
//! let handle = scheduler.handle();
//! let promise = Promise::<i32>::new(&handle, |resolver| {
//!     resolver.resolve(1).map_err(Reason::from)
//! })
//! .then(|value| Ok(value + 2))
//! .then(|value| Ok(value * 10));
//!
//! assert!(promise.is_pending());
//! scheduler.run_until_stalled();
//! assert_eq!(promise.value(), Some(30));
//! ```

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use tracing::{debug, trace, warn};

use crate::thenable::{IntoResolution, OnFulfilled, OnRejected, Resolution, Thenable};
use crate::{Error, Reason, SchedulerHandle, State};

type Callback<V> = Box<dyn FnOnce(V)>;

enum Reaction<T, E> {
    Fulfilled(Callback<T>),
    Rejected(Callback<E>),
}

struct Core<T, E> {
    state: State,
    value: Option<T>,
    error: Option<E>,
    reactions: VecDeque<Reaction<T, E>>,
    /// Locked in by a resolve call, including adoption of a thenable.
    resolved: bool,
    on_cancel: Option<Box<dyn FnOnce()>>,
    cancel_hooks: Vec<Box<dyn FnOnce()>>,
}

impl<T, E> Core<T, E> {
    fn new() -> Self {
        Self {
            state: State::Pending,
            value: None,
            error: None,
            reactions: VecDeque::new(),
            resolved: false,
            on_cancel: None,
            cancel_hooks: Vec::new(),
        }
    }
}

/// A value that becomes available, fails, or is abandoned later.
pub struct Promise<T, E = Reason> {
    core: Rc<RefCell<Core<T, E>>>,
    scheduler: SchedulerHandle,
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            scheduler: self.scheduler.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.core.borrow();
        f.debug_struct("Promise")
            .field("state", &core.state)
            .field("reactions", &core.reactions.len())
            .finish()
    }
}

impl<T, E> Promise<T, E> {
    pub fn state(&self) -> State {
        self.core.borrow().state
    }

    pub fn is_pending(&self) -> bool {
        self.state().is_pending()
    }

    pub fn is_fulfilled(&self) -> bool {
        self.state().is_fulfilled()
    }

    pub fn is_rejected(&self) -> bool {
        self.state().is_rejected()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state().is_cancelled()
    }

    /// Whether both handles point at the same promise.
    pub fn ptr_eq(&self, other: &Promise<T, E>) -> bool {
        Rc::ptr_eq(&self.core, &other.core)
    }

    pub fn scheduler(&self) -> &SchedulerHandle {
        &self.scheduler
    }

    /// Moves a pending promise to `Cancelled`.
    ///
    /// The cleanup callback runs exactly once and every queued reaction is
    /// abandoned. A thenable this promise already adopted keeps running; its
    /// outcome is ignored. No-op on a settled promise.
    pub fn cancel(&self) {
        let (on_cancel, hooks, abandoned) = {
            let mut core = self.core.borrow_mut();
            if !core.state.is_pending() {
                trace!(state = %core.state, "cancel of settled promise ignored");
                return;
            }
            core.state = State::Cancelled;
            let abandoned = std::mem::take(&mut core.reactions).len();
            (
                core.on_cancel.take(),
                std::mem::take(&mut core.cancel_hooks),
                abandoned,
            )
        };
        debug!(abandoned, "promise cancelled");
        if let Some(on_cancel) = on_cancel {
            on_cancel();
        }
        for hook in hooks {
            hook();
        }
    }

    /// Runs `hook` when this promise is cancelled; right away if it already
    /// is, never if it settles otherwise.
    pub(crate) fn watch_cancel(&self, hook: Box<dyn FnOnce()>) {
        let state = {
            let mut core = self.core.borrow_mut();
            if core.state.is_pending() {
                core.cancel_hooks.push(hook);
                return;
            }
            core.state
        };
        if state.is_cancelled() {
            hook();
        }
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    /// Creates a pending promise and schedules `executor` as a new unit of
    /// work. An `Err` returned by the executor rejects the promise.
    pub fn new<F>(scheduler: &SchedulerHandle, executor: F) -> Self
    where
        F: FnOnce(Resolver<T, E>) -> Result<(), E> + 'static,
    {
        let (promise, resolver) = Self::with_resolver(scheduler);
        promise.run_executor(resolver, executor);
        promise
    }

    /// Like [`Promise::new`], with `on_cancel` run once if the promise is
    /// cancelled while pending.
    pub fn cancellable<F, C>(scheduler: &SchedulerHandle, executor: F, on_cancel: C) -> Self
    where
        F: FnOnce(Resolver<T, E>) -> Result<(), E> + 'static,
        C: FnOnce() + 'static,
    {
        let (promise, resolver) = Self::with_resolver(scheduler);
        promise.core.borrow_mut().on_cancel = Some(Box::new(on_cancel));
        promise.run_executor(resolver, executor);
        promise
    }

    /// Runs `f` on a later tick and resolves with whatever it returns.
    pub fn spawn<F, R>(scheduler: &SchedulerHandle, f: F) -> Self
    where
        F: FnOnce() -> R + 'static,
        R: IntoResolution<T, E>,
    {
        Self::new(scheduler, move |resolver| {
            resolver.complete(f().into_resolution());
            Ok(())
        })
    }

    pub fn resolved(scheduler: &SchedulerHandle, value: T) -> Self {
        let (promise, _) = Self::with_resolver(scheduler);
        promise.fulfill(value);
        promise
    }

    pub fn rejected(scheduler: &SchedulerHandle, error: E) -> Self {
        let (promise, _) = Self::with_resolver(scheduler);
        promise.reject_now(error);
        promise
    }

    /// A promise for `resolution`: the promise itself, an already fulfilled
    /// promise for a plain value, or one adopting a foreign thenable.
    pub fn from_resolution(scheduler: &SchedulerHandle, resolution: Resolution<T, E>) -> Self {
        match resolution {
            Resolution::Promise(promise) => promise,
            Resolution::Value(value) => Self::resolved(scheduler, value),
            Resolution::Thenable(thenable) => {
                let (promise, _) = Self::with_resolver(scheduler);
                promise.adopt(thenable);
                promise
            }
        }
    }

    pub(crate) fn with_resolver(scheduler: &SchedulerHandle) -> (Self, Resolver<T, E>) {
        let promise = Self {
            core: Rc::new(RefCell::new(Core::new())),
            scheduler: scheduler.clone(),
        };
        let resolver = Resolver {
            promise: promise.clone(),
        };
        (promise, resolver)
    }

    fn run_executor<F>(&self, resolver: Resolver<T, E>, executor: F)
    where
        F: FnOnce(Resolver<T, E>) -> Result<(), E> + 'static,
    {
        let fallback = resolver.clone();
        let scheduled = self.scheduler.schedule(move || {
            if let Err(error) = executor(resolver) {
                if let Err(err) = fallback.reject(error) {
                    debug!(error = %err, "executor failure after settlement ignored");
                }
            }
        });
        if let Err(err) = scheduled {
            warn!(error = %err, "executor dropped");
            self.reject_now(E::from(err));
        }
    }

    /// The fulfilled value, if any.
    pub fn value(&self) -> Option<T> {
        self.core.borrow().value.clone()
    }

    /// The rejection reason, if any.
    pub fn error(&self) -> Option<E> {
        self.core.borrow().error.clone()
    }

    /// Chains `on_fulfilled`; a rejection passes through unchanged.
    pub fn then<U, F, R>(&self, on_fulfilled: F) -> Promise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> R + 'static,
        R: IntoResolution<U, E>,
    {
        let (child, resolver) = Promise::with_resolver(&self.scheduler);
        let rejecter = resolver.clone();
        self.react(
            Box::new(move |value| resolver.complete(on_fulfilled(value).into_resolution())),
            Box::new(move |error| rejecter.complete(Err(error))),
        );
        child
    }

    /// Chains a callback for each channel.
    pub fn then_or_else<U, F, R, G, S>(&self, on_fulfilled: F, on_rejected: G) -> Promise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> R + 'static,
        R: IntoResolution<U, E>,
        G: FnOnce(E) -> S + 'static,
        S: IntoResolution<U, E>,
    {
        let (child, resolver) = Promise::with_resolver(&self.scheduler);
        let rejecter = resolver.clone();
        self.react(
            Box::new(move |value| resolver.complete(on_fulfilled(value).into_resolution())),
            Box::new(move |error| rejecter.complete(on_rejected(error).into_resolution())),
        );
        child
    }

    /// Chains `on_rejected`; a fulfilment passes through unchanged.
    pub fn catch<G, S>(&self, on_rejected: G) -> Promise<T, E>
    where
        G: FnOnce(E) -> S + 'static,
        S: IntoResolution<T, E>,
    {
        let (child, resolver) = Promise::with_resolver(&self.scheduler);
        let rejecter = resolver.clone();
        self.react(
            Box::new(move |value| resolver.complete(Ok(Resolution::Value(value)))),
            Box::new(move |error| rejecter.complete(on_rejected(error).into_resolution())),
        );
        child
    }

    /// Runs `on_settled` on either channel and passes the outcome through.
    ///
    /// If `on_settled` fails, the chain rejects with its error instead.
    pub fn finally<F>(&self, on_settled: F) -> Promise<T, E>
    where
        F: FnOnce() -> Result<(), E> + 'static,
    {
        let (child, resolver) = Promise::with_resolver(&self.scheduler);
        let rejecter = resolver.clone();
        let callback = Rc::new(Cell::new(Some(on_settled)));
        let on_error = callback.clone();
        self.react(
            Box::new(move |value| {
                let outcome = run_once(callback.as_ref()).map(|()| Resolution::Value(value));
                resolver.complete(outcome);
            }),
            Box::new(move |error| {
                let outcome = run_once(on_error.as_ref()).and(Err(error));
                rejecter.complete(outcome);
            }),
        );
        child
    }

    /// Queues one reaction per channel and dispatches at once if settled.
    pub(crate) fn react(&self, on_fulfilled: Callback<T>, on_rejected: Callback<E>) {
        {
            let mut core = self.core.borrow_mut();
            if core.state.is_cancelled() {
                trace!("reaction on cancelled promise abandoned");
                return;
            }
            core.reactions.push_back(Reaction::Fulfilled(on_fulfilled));
            core.reactions.push_back(Reaction::Rejected(on_rejected));
        }
        self.settle();
    }

    fn fulfill(&self, value: T) {
        {
            let mut core = self.core.borrow_mut();
            if core.state.is_settled() {
                return;
            }
            core.value = Some(value);
            core.state = State::Fulfilled;
            core.on_cancel = None;
            core.cancel_hooks.clear();
        }
        debug!(state = %State::Fulfilled, "promise settled");
        self.settle();
    }

    fn reject_now(&self, error: E) {
        {
            let mut core = self.core.borrow_mut();
            if core.state.is_settled() {
                return;
            }
            core.error = Some(error);
            core.state = State::Rejected;
            core.on_cancel = None;
            core.cancel_hooks.clear();
        }
        debug!(state = %State::Rejected, "promise settled");
        self.settle();
    }

    /// Drains the reaction queue once the state is terminal.
    ///
    /// Reactions of the other channel can never fire after this point and
    /// leave the queue with the rest.
    fn settle(&self) {
        let (state, reactions) = {
            let mut core = self.core.borrow_mut();
            if core.state.is_pending() || core.reactions.is_empty() {
                return;
            }
            (core.state, std::mem::take(&mut core.reactions))
        };
        trace!(%state, reactions = reactions.len(), "dispatching reactions");
        for reaction in reactions {
            match (state, reaction) {
                (State::Fulfilled, Reaction::Fulfilled(callback)) => {
                    if let Some(value) = self.value() {
                        self.dispatch(move || callback(value));
                    }
                }
                (State::Rejected, Reaction::Rejected(callback)) => {
                    if let Some(error) = self.error() {
                        self.dispatch(move || callback(error));
                    }
                }
                _ => {}
            }
        }
    }

    fn dispatch(&self, job: impl FnOnce() + 'static) {
        if let Err(err) = self.scheduler.schedule(job) {
            warn!(error = %err, "reaction dropped");
        }
    }

    fn resolve_inner(&self, resolution: Resolution<T, E>) -> Result<(), Error> {
        match resolution {
            Resolution::Value(value) => {
                self.fulfill(value);
                Ok(())
            }
            Resolution::Promise(promise) if promise.ptr_eq(self) => Err(Error::SelfResolution),
            Resolution::Promise(promise) => {
                self.adopt(Box::new(promise));
                Ok(())
            }
            Resolution::Thenable(thenable) => {
                self.adopt(thenable);
                Ok(())
            }
        }
    }

    /// Subscribes to `thenable` with this promise's own continuations.
    fn adopt(&self, thenable: Box<dyn Thenable<T, E>>) {
        self.core.borrow_mut().resolved = true;
        trace!("adopting thenable");
        let called = Rc::new(Cell::new(false));
        let on_cancel = self.clone();
        thenable.on_cancel(Box::new(move || {
            debug!("adopted thenable cancelled");
            on_cancel.cancel();
        }));
        let (fulfilled, fulfilled_called) = (self.clone(), called.clone());
        let (rejected, rejected_called) = (self.clone(), called);
        thenable.then(
            Box::new(move |resolution| {
                if fulfilled_called.replace(true) {
                    trace!("second thenable outcome ignored");
                    return;
                }
                fulfilled.settle_adopted(Ok(resolution));
            }),
            Box::new(move |error| {
                if rejected_called.replace(true) {
                    trace!("second thenable outcome ignored");
                    return;
                }
                rejected.settle_adopted(Err(error));
            }),
        );
    }

    fn settle_adopted(&self, outcome: Result<Resolution<T, E>, E>) {
        if !self.is_pending() {
            trace!(state = %self.state(), "adopted outcome ignored");
            return;
        }
        match outcome {
            Ok(resolution) => {
                if let Err(err) = self.resolve_inner(resolution) {
                    self.reject_now(E::from(err));
                }
            }
            Err(error) => self.reject_now(error),
        }
    }
}

fn run_once<E>(callback: &Cell<Option<impl FnOnce() -> Result<(), E>>>) -> Result<(), E> {
    callback.take().map_or(Ok(()), |callback| callback())
}

impl<T, E> Thenable<T, E> for Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    fn then(self: Box<Self>, on_fulfilled: OnFulfilled<T, E>, on_rejected: OnRejected<E>) {
        self.react(
            Box::new(move |value| on_fulfilled(Resolution::Value(value))),
            on_rejected,
        );
    }

    fn on_cancel(&self, hook: Box<dyn FnOnce()>) {
        self.watch_cancel(hook);
    }
}

/// The resolve/reject capabilities of one promise.
///
/// Handed to executors; clones share the same promise.
pub struct Resolver<T, E = Reason> {
    promise: Promise<T, E>,
}

impl<T, E> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Resolver<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("promise", &self.promise)
            .finish()
    }
}

impl<T, E> Resolver<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    pub fn resolve(&self, value: T) -> Result<(), Error> {
        self.resolve_with(Resolution::Value(value))
    }

    /// Resolves with a value, a promise or a foreign thenable.
    ///
    /// A thenable locks the promise in: it stays pending and adopts the
    /// thenable's outcome. Resolving a promise with itself fails.
    pub fn resolve_with(&self, resolution: impl Into<Resolution<T, E>>) -> Result<(), Error> {
        if !self.accepts()? {
            return Ok(());
        }
        self.promise.resolve_inner(resolution.into())
    }

    pub fn reject(&self, error: E) -> Result<(), Error> {
        if self.accepts()? {
            self.promise.reject_now(error);
        }
        Ok(())
    }

    /// Whether a resolve or reject call would still apply.
    pub fn is_pending(&self) -> bool {
        let core = self.promise.core.borrow();
        core.state.is_pending() && !core.resolved
    }

    pub fn promise(&self) -> &Promise<T, E> {
        &self.promise
    }

    /// `Ok(false)` once cancelled: settlement is silently dropped then.
    fn accepts(&self) -> Result<bool, Error> {
        let core = self.promise.core.borrow();
        match core.state {
            State::Cancelled => {
                debug!("settlement of cancelled promise ignored");
                Ok(false)
            }
            State::Pending if core.resolved => Err(Error::AlreadyResolved),
            State::Pending => Ok(true),
            state => Err(Error::AlreadySettled(state)),
        }
    }

    /// Applies a callback's outcome. Only self-resolution has somewhere to
    /// go; it becomes the rejection reason.
    pub(crate) fn complete(&self, outcome: Result<Resolution<T, E>, E>) {
        let result = match outcome {
            Ok(resolution) => self.resolve_with(resolution),
            Err(error) => self.reject(error),
        };
        match result {
            Ok(()) => {}
            Err(Error::SelfResolution) => {
                if let Err(err) = self.reject(E::from(Error::SelfResolution)) {
                    debug!(error = %err, "self-resolution not reported");
                }
            }
            Err(err) => debug!(error = %err, "callback outcome ignored"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Scheduler;

    #[test]
    fn executor_runs_on_a_later_tick() {
        let scheduler = Scheduler::new();
        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        let promise = Promise::<u8>::new(&scheduler.handle(), move |resolver| {
            flag.set(true);
            resolver.resolve(1).map_err(Reason::from)
        });
        assert!(!ran.get());
        assert!(promise.is_pending());
        scheduler.run_until_stalled();
        assert!(ran.get());
        assert_eq!(promise.value(), Some(1));
    }

    #[test]
    fn executor_error_rejects() {
        let scheduler = Scheduler::new();
        let promise = Promise::<u8>::new(&scheduler.handle(), |_| Err(Reason::msg("foo")));
        scheduler.run_until_stalled();
        assert!(promise.is_rejected());
        assert_eq!(promise.error(), Some(Reason::msg("foo")));
    }

    #[test]
    fn executor_error_after_settlement_is_ignored() {
        let scheduler = Scheduler::new();
        let promise = Promise::<u8>::new(&scheduler.handle(), |resolver| {
            resolver.resolve(3).map_err(Reason::from)?;
            Err(Reason::msg("late"))
        });
        scheduler.run_until_stalled();
        assert_eq!(promise.value(), Some(3));
    }

    #[test]
    fn reactions_never_run_synchronously() {
        let scheduler = Scheduler::new();
        let seen = Rc::new(Cell::new(0));
        let out = seen.clone();
        let promise = Promise::<u8>::resolved(&scheduler.handle(), 9);
        let _child = promise.then(move |v| {
            out.set(v);
            Ok(())
        });
        assert_eq!(seen.get(), 0);
        scheduler.run_until_stalled();
        assert_eq!(seen.get(), 9);
    }

    #[test]
    fn second_settlement_is_reported() {
        let scheduler = Scheduler::new();
        let (promise, resolver) = Promise::<u8>::with_resolver(&scheduler.handle());
        resolver.resolve(1).unwrap();
        assert_eq!(resolver.resolve(2), Err(Error::AlreadySettled(State::Fulfilled)));
        assert_eq!(
            resolver.reject(Reason::msg("x")),
            Err(Error::AlreadySettled(State::Fulfilled))
        );
        assert_eq!(promise.value(), Some(1));
        assert!(!resolver.is_pending());
    }

    #[test]
    fn self_resolution_fails_without_settling() {
        let scheduler = Scheduler::new();
        let (promise, resolver) = Promise::<u8>::with_resolver(&scheduler.handle());
        assert_eq!(resolver.resolve_with(promise.clone()), Err(Error::SelfResolution));
        assert!(promise.is_pending());
        assert!(resolver.is_pending());
    }

    #[test]
    fn locked_in_promise_refuses_other_outcomes() {
        let scheduler = Scheduler::new();
        let handle = scheduler.handle();
        let (inner, inner_resolver) = Promise::<u8>::with_resolver(&handle);
        let (outer, resolver) = Promise::<u8>::with_resolver(&handle);
        resolver.resolve_with(inner).unwrap();
        assert_eq!(resolver.resolve(5), Err(Error::AlreadyResolved));
        assert!(outer.is_pending());
        inner_resolver.resolve(6).unwrap();
        scheduler.run_until_stalled();
        assert_eq!(outer.value(), Some(6));
    }

    #[test]
    fn mismatched_channel_reactions_are_dropped() {
        let scheduler = Scheduler::new();
        let promise = Promise::<u8>::rejected(&scheduler.handle(), Reason::msg("no"));
        let _child = promise.then(|v| Ok(v + 1));
        assert!(promise.core.borrow().reactions.is_empty());
        scheduler.run_until_stalled();
        assert_eq!(scheduler.pending_tasks(), 0);
    }
}
