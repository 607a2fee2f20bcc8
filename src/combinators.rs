//! `all` and `race`, written against the public promise API only.
//!
//! Inputs are anything convertible into a [`Resolution`]: promises, foreign
//! thenables wrapped with [`Resolution::thenable`], or plain values. Neither
//! combinator waits forever on an empty input; both reject with
//! [`Error::EmptyInput`]. Nor do they wait on inputs that were cancelled:
//! `all` rejects with [`Error::InputCancelled`] as soon as one input is
//! cancelled, `race` once every input is.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::trace;

use crate::{Error, Promise, Resolution, SchedulerHandle};

struct Collected<T> {
    values: Vec<Option<T>>,
    count: usize,
}

impl<T> Collected<T> {
    /// Stores `value` at `index`; yields the ordered results once every slot
    /// is filled.
    fn insert(&mut self, index: usize, value: T) -> Option<Vec<T>> {
        if self.values[index].replace(value).is_none() {
            self.count += 1;
        }
        if self.count < self.values.len() {
            return None;
        }
        Some(std::mem::take(&mut self.values).into_iter().flatten().collect())
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    /// Fulfils with every input's value in input order, or rejects with the
    /// first rejection reason.
    ///
    /// Inputs keep running after a rejection; their outcomes are ignored.
    ///
    /// # Examples
    ///
    /// ```
    /// use coop_promise::{Promise, Scheduler};
    ///
    /// let scheduler = Scheduler::new();
    /// let handle = scheduler.handle();
    /// let inputs: Vec<Promise<u8>> = vec![
    ///     Promise::resolved(&handle, 1),
    ///     Promise::spawn(&handle, || Ok(2)),
    ///     Promise::resolved(&handle, 3),
    /// ];
    /// let all = Promise::<u8>::all(&handle, inputs);
    /// scheduler.run_until_stalled();
    /// assert_eq!(all.value(), Some(vec![1, 2, 3]));
    /// ```
    pub fn all<I>(scheduler: &SchedulerHandle, promises: I) -> Promise<Vec<T>, E>
    where
        I: IntoIterator,
        I::Item: Into<Resolution<T, E>>,
    {
        let inputs: Vec<Promise<T, E>> = promises
            .into_iter()
            .map(|input| Promise::from_resolution(scheduler, input.into()))
            .collect();
        let (all, resolver) = Promise::with_resolver(scheduler);
        if inputs.is_empty() {
            resolver.complete(Err(E::from(Error::EmptyInput { combinator: "all" })));
            return all;
        }

        let collected = Rc::new(RefCell::new(Collected {
            values: vec![None; inputs.len()],
            count: 0,
        }));
        for (index, input) in inputs.into_iter().enumerate() {
            let cancelled = resolver.clone();
            input.watch_cancel(Box::new(move || {
                let reason = E::from(Error::InputCancelled { combinator: "all" });
                if let Err(err) = cancelled.reject(reason) {
                    trace!(error = %err, index, "cancelled input ignored by all");
                }
            }));
            let collected = collected.clone();
            let fulfil = resolver.clone();
            let reject = resolver.clone();
            input.then_or_else(
                move |value| {
                    let done = collected.borrow_mut().insert(index, value);
                    if let Some(values) = done {
                        if let Err(err) = fulfil.resolve(values) {
                            trace!(error = %err, "all already settled");
                        }
                    }
                    Ok(())
                },
                move |error| {
                    if let Err(err) = reject.reject(error) {
                        trace!(error = %err, index, "later rejection ignored by all");
                    }
                    Ok(())
                },
            );
        }
        all
    }

    /// Adopts the outcome of whichever input settles first. Cancelled inputs
    /// drop out of the race.
    pub fn race<I>(scheduler: &SchedulerHandle, promises: I) -> Promise<T, E>
    where
        I: IntoIterator,
        I::Item: Into<Resolution<T, E>>,
    {
        let inputs: Vec<Promise<T, E>> = promises
            .into_iter()
            .map(|input| Promise::from_resolution(scheduler, input.into()))
            .collect();
        let (race, resolver) = Promise::with_resolver(scheduler);
        if inputs.is_empty() {
            resolver.complete(Err(E::from(Error::EmptyInput { combinator: "race" })));
            return race;
        }

        let total = inputs.len();
        let cancelled = Rc::new(Cell::new(0));
        for input in inputs {
            let (count, lose_all) = (cancelled.clone(), resolver.clone());
            input.watch_cancel(Box::new(move || {
                count.set(count.get() + 1);
                if count.get() < total {
                    return;
                }
                let reason = E::from(Error::InputCancelled { combinator: "race" });
                if let Err(err) = lose_all.reject(reason) {
                    trace!(error = %err, "race already decided");
                }
            }));
            let win = resolver.clone();
            let lose = resolver.clone();
            input.then_or_else(
                move |value| {
                    if let Err(err) = win.resolve(value) {
                        trace!(error = %err, "race already decided");
                    }
                    Ok(())
                },
                move |error| {
                    if let Err(err) = lose.reject(error) {
                        trace!(error = %err, "race already decided");
                    }
                    Ok(())
                },
            );
        }
        race
    }
}
