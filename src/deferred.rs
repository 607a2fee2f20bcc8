//! A one-shot resolver living outside the promise's executor.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::{Error, Promise, Reason, Resolution, Resolver, SchedulerHandle};

struct Completion<T, E> {
    completed: bool,
    /// Outcome recorded before the executor captured the resolver.
    outcome: Option<Result<Resolution<T, E>, E>>,
    resolver: Option<Resolver<T, E>>,
}

/// Completes its promise exactly once, from anywhere.
///
/// The wrapped promise's executor is scheduled like any other; an outcome
/// supplied before it runs is cached and applied the moment it does.
///
/// # Examples
///
/// ```
/// use coop_promise::{Deferred, Scheduler};
///
/// let scheduler = Scheduler::new();
/// let deferred = Deferred::<bool>::new(&scheduler.handle());
/// let promise = deferred.promise();
///
/// deferred.resolve(true).unwrap();
/// assert!(deferred.resolve(false).is_err());
///
/// scheduler.run_until_stalled();
/// assert_eq!(promise.value(), Some(true));
/// ```
pub struct Deferred<T, E = Reason> {
    promise: Promise<T, E>,
    completion: Rc<RefCell<Completion<T, E>>>,
}

impl<T, E> fmt::Debug for Deferred<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("completed", &self.completion.borrow().completed)
            .field("promise", &self.promise)
            .finish()
    }
}

impl<T, E> Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    pub fn new(scheduler: &SchedulerHandle) -> Self {
        let completion = Rc::new(RefCell::new(Completion {
            completed: false,
            outcome: None,
            resolver: None,
        }));
        let captured = completion.clone();
        let promise = Promise::new(scheduler, move |resolver: Resolver<T, E>| {
            let cached = {
                let mut completion = captured.borrow_mut();
                let cached = completion.outcome.take();
                if cached.is_none() {
                    completion.resolver = Some(resolver.clone());
                }
                cached
            };
            match cached {
                Some(outcome) => forward(&resolver, outcome).map_err(E::from),
                None => Ok(()),
            }
        });
        Self {
            promise,
            completion,
        }
    }

    pub fn promise(&self) -> Promise<T, E> {
        self.promise.clone()
    }

    pub fn resolve(&self, value: T) -> Result<(), Error> {
        self.complete(Ok(Resolution::Value(value)))
    }

    /// Resolves with a promise or foreign thenable. The wrapped promise
    /// itself is refused without completing the deferred.
    pub fn resolve_with(&self, resolution: impl Into<Resolution<T, E>>) -> Result<(), Error> {
        let resolution = resolution.into();
        if let Resolution::Promise(promise) = &resolution {
            if promise.ptr_eq(&self.promise) {
                return Err(Error::SelfResolution);
            }
        }
        self.complete(Ok(resolution))
    }

    pub fn reject(&self, error: E) -> Result<(), Error> {
        self.complete(Err(error))
    }

    pub fn is_complete(&self) -> bool {
        self.completion.borrow().completed
    }

    fn complete(&self, outcome: Result<Resolution<T, E>, E>) -> Result<(), Error> {
        let resolver = {
            let mut completion = self.completion.borrow_mut();
            if completion.completed {
                return Err(Error::AlreadyCompleted);
            }
            completion.completed = true;
            match completion.resolver.clone() {
                Some(resolver) => resolver,
                None => {
                    debug!("deferred outcome cached until the executor runs");
                    completion.outcome = Some(outcome);
                    return Ok(());
                }
            }
        };
        forward(&resolver, outcome).map_err(|err| {
            debug!(error = %err, "deferred completed without settling its promise");
            err
        })
    }
}

fn forward<T, E>(resolver: &Resolver<T, E>, outcome: Result<Resolution<T, E>, E>) -> Result<(), Error>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    match outcome {
        Ok(resolution) => resolver.resolve_with(resolution),
        Err(error) => resolver.reject(error),
    }
}

/// Shorthand for [`Deferred::new`].
pub fn defer<T, E>(scheduler: &SchedulerHandle) -> Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    Deferred::new(scheduler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Scheduler;

    #[test]
    fn outcome_before_executor_is_cached() {
        let scheduler = Scheduler::new();
        let deferred = Deferred::<u8>::new(&scheduler.handle());
        deferred.reject(Reason::msg("foo")).unwrap();
        assert!(deferred.completion.borrow().outcome.is_some());
        assert!(deferred.promise().is_pending());
        scheduler.run_until_stalled();
        assert!(deferred.completion.borrow().outcome.is_none());
        assert_eq!(deferred.promise().error(), Some(Reason::msg("foo")));
    }

    #[test]
    fn outcome_after_executor_is_forwarded() {
        let scheduler = Scheduler::new();
        let deferred = Deferred::<u8>::new(&scheduler.handle());
        scheduler.run_until_stalled();
        assert!(deferred.completion.borrow().resolver.is_some());
        deferred.resolve(8).unwrap();
        assert_eq!(deferred.promise().value(), Some(8));
    }

    #[test]
    fn completion_after_cancel_leaves_promise_cancelled() {
        let scheduler = Scheduler::new();
        let deferred = Deferred::<u8>::new(&scheduler.handle());
        scheduler.run_until_stalled();
        deferred.promise().cancel();
        assert_eq!(deferred.resolve(2), Ok(()));
        assert!(deferred.is_complete());
        assert!(deferred.promise().is_cancelled());
        assert_eq!(deferred.reject(Reason::msg("late")), Err(Error::AlreadyCompleted));
    }

    #[test]
    fn self_resolution_leaves_deferred_open() {
        let scheduler = Scheduler::new();
        let deferred = Deferred::<u8>::new(&scheduler.handle());
        assert_eq!(
            deferred.resolve_with(deferred.promise()),
            Err(Error::SelfResolution)
        );
        assert!(!deferred.is_complete());
        deferred.resolve(1).unwrap();
        assert!(deferred.is_complete());
    }
}
