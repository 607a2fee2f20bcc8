use std::fmt;

/// Settlement state of a promise.
///
/// `Pending` is the only state a promise may leave. The other three are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum State {
    #[default]
    Pending,
    Fulfilled,
    Rejected,
    Cancelled,
}

impl State {
    pub fn is_pending(self) -> bool {
        self == State::Pending
    }

    /// Any terminal state, cancellation included.
    pub fn is_settled(self) -> bool {
        !self.is_pending()
    }

    pub fn is_fulfilled(self) -> bool {
        self == State::Fulfilled
    }

    pub fn is_rejected(self) -> bool {
        self == State::Rejected
    }

    pub fn is_cancelled(self) -> bool {
        self == State::Cancelled
    }

    pub fn as_str(self) -> &'static str {
        match self {
            State::Pending => "pending",
            State::Fulfilled => "fulfilled",
            State::Rejected => "rejected",
            State::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
