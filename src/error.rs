use std::sync::Arc;

use thiserror::Error;

use crate::State;

/// Protocol and scheduler failures.
///
/// These are returned straight to the caller that made the invalid call.
/// They only reach a rejection channel (through `E: From<Error>`) when the
/// violation happens inside the settlement machinery, where no caller is
/// left to receive it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("unable to resolve promise with itself")]
    SelfResolution,
    #[error("promise already {0}")]
    AlreadySettled(State),
    #[error("promise already resolved with a pending thenable")]
    AlreadyResolved,
    #[error("deferred already completed")]
    AlreadyCompleted,
    #[error("provided value is not thenable")]
    NotThenable,
    #[error("{combinator} called without any promise")]
    EmptyInput { combinator: &'static str },
    #[error("{combinator} cannot settle: input cancelled")]
    InputCancelled { combinator: &'static str },
    #[error("waiting on cancelled promise")]
    Cancelled,
    #[error("scheduler has shut down")]
    SchedulerShutdown,
    #[error("scheduler stalled before the future completed")]
    Stalled,
}

/// Default rejection value.
///
/// Anything a user callback fails with can be carried as a `Reason`,
/// protocol errors raised inside reactions included.
#[derive(Debug, Clone, Error)]
pub enum Reason {
    #[error(transparent)]
    Protocol(#[from] Error),
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Other(Arc<dyn std::error::Error + Send + Sync>),
}

impl Reason {
    pub fn msg(message: impl Into<String>) -> Self {
        Reason::Message(message.into())
    }

    pub fn other(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Reason::Other(Arc::new(err))
    }

    /// The protocol error this reason wraps, if any.
    pub fn protocol(&self) -> Option<&Error> {
        match self {
            Reason::Protocol(err) => Some(err),
            _ => None,
        }
    }
}

impl From<&str> for Reason {
    fn from(message: &str) -> Self {
        Reason::msg(message)
    }
}

impl From<String> for Reason {
    fn from(message: String) -> Self {
        Reason::Message(message)
    }
}

impl PartialEq for Reason {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Reason::Protocol(a), Reason::Protocol(b)) => a == b,
            (Reason::Message(a), Reason::Message(b)) => a == b,
            (Reason::Other(a), Reason::Other(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_violation() {
        assert_eq!(
            Error::AlreadySettled(State::Rejected).to_string(),
            "promise already rejected"
        );
        assert_eq!(
            Error::EmptyInput { combinator: "race" }.to_string(),
            "race called without any promise"
        );
        assert_eq!(
            Error::InputCancelled { combinator: "all" }.to_string(),
            "all cannot settle: input cancelled"
        );
    }

    #[test]
    fn reason_wraps_protocol_errors() {
        let reason = Reason::from(Error::SelfResolution);
        assert_eq!(reason.protocol(), Some(&Error::SelfResolution));
        assert_eq!(reason.to_string(), "unable to resolve promise with itself");
        assert_eq!(Reason::msg("X"), Reason::from("X"));
        assert_eq!(Reason::msg("X").protocol(), None);
    }

    #[test]
    fn other_reasons_compare_by_identity() {
        let io = Reason::other(std::io::Error::new(std::io::ErrorKind::Other, "io"));
        assert_eq!(io, io.clone());
        let again = Reason::other(std::io::Error::new(std::io::ErrorKind::Other, "io"));
        assert_ne!(io, again);
        assert_eq!(io.to_string(), "io");
    }
}
