//! The `then`-shaped capability shared by [`Promise`] and foreign promise
//! types.
//!
//! Any type implementing [`Thenable`] can be adopted by a promise, awaited,
//! or fed to a combinator. No common base type is required.

use std::fmt;

use crate::{Error, Promise};

/// Continuation receiving a thenable's fulfilment.
///
/// It takes a [`Resolution`] rather than a bare value so a thenable may
/// fulfil with yet another thenable, which the receiver unwraps in turn.
pub type OnFulfilled<T, E> = Box<dyn FnOnce(Resolution<T, E>)>;

/// Continuation receiving a thenable's rejection reason.
pub type OnRejected<E> = Box<dyn FnOnce(E)>;

/// A value that settles later and reports its outcome to continuations.
///
/// Implementations must call at most one of the two continuations, at most
/// once. Receivers ignore any call after the first.
///
/// # Examples
///
/// ```
/// use coop_promise::{Promise, Reason, Resolution, Scheduler, Thenable, OnFulfilled, OnRejected};
///
/// struct Ready(i32);
///
/// impl Thenable<i32, Reason> for Ready {
///     fn then(self: Box<Self>, on_fulfilled: OnFulfilled<i32, Reason>, _: OnRejected<Reason>) {
///         on_fulfilled(Resolution::Value(self.0))
///     }
/// }
///
/// let scheduler = Scheduler::new();
/// let promise: Promise<i32> = Promise::from_resolution(&scheduler.handle(), Resolution::thenable(Ready(3)));
/// assert_eq!(scheduler.block_on(async move { promise.await }).unwrap(), Ok(3));
/// ```
pub trait Thenable<T, E>: 'static {
    fn then(self: Box<Self>, on_fulfilled: OnFulfilled<T, E>, on_rejected: OnRejected<E>);

    /// Registers `hook` to run if the thenable is cancelled before it
    /// settles. Thenables without a cancel capability never call it.
    fn on_cancel(&self, hook: Box<dyn FnOnce()>) {
        drop(hook);
    }
}

/// What a promise can be resolved with.
pub enum Resolution<T, E> {
    Value(T),
    Promise(Promise<T, E>),
    Thenable(Box<dyn Thenable<T, E>>),
}

impl<T, E> Resolution<T, E> {
    pub fn thenable(thenable: impl Thenable<T, E>) -> Self {
        Resolution::Thenable(Box::new(thenable))
    }

    pub fn is_thenable(&self) -> bool {
        !matches!(self, Resolution::Value(_))
    }
}

impl<T, E> From<Promise<T, E>> for Resolution<T, E> {
    fn from(promise: Promise<T, E>) -> Self {
        Resolution::Promise(promise)
    }
}

impl<T: fmt::Debug, E> fmt::Debug for Resolution<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Resolution::Promise(promise) => f
                .debug_tuple("Promise")
                .field(&promise.state())
                .finish(),
            Resolution::Thenable(_) => f.write_str("Thenable(..)"),
        }
    }
}

/// True for promises and foreign thenables, false for plain values.
pub fn is_thenable<T, E>(value: &Resolution<T, E>) -> bool {
    value.is_thenable()
}

/// Conversion of a reaction's return value into the next settlement.
///
/// `Err` rejects, a promise or thenable is adopted, anything else fulfils.
pub trait IntoResolution<T, E> {
    fn into_resolution(self) -> Result<Resolution<T, E>, E>;
}

impl<T, E> IntoResolution<T, E> for Result<T, E> {
    fn into_resolution(self) -> Result<Resolution<T, E>, E> {
        self.map(Resolution::Value)
    }
}

impl<T, E> IntoResolution<T, E> for Promise<T, E> {
    fn into_resolution(self) -> Result<Resolution<T, E>, E> {
        Ok(Resolution::Promise(self))
    }
}

impl<T, E> IntoResolution<T, E> for Resolution<T, E> {
    fn into_resolution(self) -> Result<Resolution<T, E>, E> {
        Ok(self)
    }
}

impl<T, E> Resolution<T, E> {
    /// The boxed thenable behind this resolution, or [`Error::NotThenable`]
    /// for a plain value.
    pub fn into_thenable(self) -> Result<Box<dyn Thenable<T, E>>, Error>
    where
        Promise<T, E>: Thenable<T, E>,
    {
        match self {
            Resolution::Value(_) => Err(Error::NotThenable),
            Resolution::Promise(promise) => Ok(Box::new(promise)),
            Resolution::Thenable(thenable) => Ok(thenable),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Reason, Scheduler};

    struct Never;

    impl Thenable<u8, Reason> for Never {
        fn then(self: Box<Self>, _: OnFulfilled<u8, Reason>, _: OnRejected<Reason>) {}
    }

    #[test]
    fn plain_values_are_not_thenable() {
        let scheduler = Scheduler::new();
        let value: Resolution<u8, Reason> = Resolution::Value(1);
        assert!(!is_thenable(&value));
        assert!(matches!(value.into_thenable(), Err(Error::NotThenable)));

        let promise = Resolution::from(Promise::<u8>::resolved(&scheduler.handle(), 1));
        assert!(is_thenable(&promise));
        assert!(is_thenable(&Resolution::thenable(Never)));
    }

    #[test]
    fn results_map_onto_channels() {
        let ok: Result<u8, Reason> = Ok(4);
        assert!(matches!(ok.into_resolution(), Ok(Resolution::Value(4))));
        let err: Result<u8, Reason> = Err(Reason::msg("no"));
        assert!(matches!(err.into_resolution(), Err(Reason::Message(m)) if m == "no"));
    }
}
