use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a strand.
///
/// A strand is in exactly one state at a time, and the three terminal
/// states are absorbing: once `Done`, `Failed` or `Cancelled`, no further
/// effect of the strand is interpreted and its outcome is immutable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrandStatus {
    /// Runnable; queued (or about to be queued) for its next step.
    Ready,
    /// Parked on a non-immediate effect.
    Waiting,
    /// Terminal: returned a value.
    Done,
    /// Terminal: raised a failure.
    Failed,
    /// Terminal: cancellation was requested before it could finish.
    Cancelled,
}

impl StrandStatus {
    /// Whether the strand has reached an absorbing state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for StrandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => write!(f, "Ready"),
            Self::Waiting => write!(f, "Waiting"),
            Self::Done => write!(f, "Done"),
            Self::Failed => write!(f, "Failed"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}
