use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Canonical category for a runtime failure.
///
/// Intentionally coarse: the kind is for policy and observability
/// dimensions; the human-facing diagnostic lives in the message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// A strand yielded a value that is not an effect.
    NonEffect,
    /// A lock release token was yielded after its acquisition was already
    /// released.
    DoubleRelease,
    /// Deadlock at quiescence: no strand ready, no timer pending, at least
    /// one strand parked.
    Hang,
    /// Library misuse detected at dispatch (empty race, invalid sleep
    /// duration).
    Misuse,
    /// Failure raised by routine code.
    User,
}

/// The single failure type for everything the runtime detects or a routine
/// raises.
///
/// Joiners inherit a failing strand's `WeftError` unchanged; a failure that
/// reaches (or starts in) the root strand surfaces out of `run` as-is.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct WeftError {
    kind: ErrorKind,
    message: String,
}

impl WeftError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// A failure raised by user routine code.
    pub fn user(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::User, message)
    }

    pub fn misuse(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Misuse, message)
    }

    /// A strand yielded `value`, which is not an effect.
    pub fn non_effect(value: &Value) -> Self {
        Self::new(
            ErrorKind::NonEffect,
            format!("Strand yielded non-effect: {value}"),
        )
    }

    /// A lock release token was yielded more than once per acquisition.
    pub fn double_release() -> Self {
        Self::new(
            ErrorKind::DoubleRelease,
            "Yielded same lock release multiple times?",
        )
    }

    /// Deadlock report. `descriptor` names the wait of one blocked strand;
    /// `blocked` is the total number of parked strands.
    pub fn hang(descriptor: &str, blocked: usize) -> Self {
        let message = if blocked > 1 {
            format!(
                "Hanging strands detected waiting for {descriptor} (and {} more)",
                blocked - 1
            )
        } else {
            format!("Hanging strands detected waiting for {descriptor}")
        };
        Self::new(ErrorKind::Hang, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_strings_keep_their_canonical_prefixes() {
        insta::assert_snapshot!(
            WeftError::non_effect(&Value::Int(3)).to_string(),
            @"Strand yielded non-effect: 3"
        );
        insta::assert_snapshot!(
            WeftError::double_release().to_string(),
            @"Yielded same lock release multiple times?"
        );
        insta::assert_snapshot!(
            WeftError::hang("Receive(lock:0)", 1).to_string(),
            @"Hanging strands detected waiting for Receive(lock:0)"
        );
        insta::assert_snapshot!(
            WeftError::hang("Call(acquire)", 3).to_string(),
            @"Hanging strands detected waiting for Call(acquire) (and 2 more)"
        );
    }

    #[test]
    fn kinds_ride_along_with_constructors() {
        assert_eq!(WeftError::user("x").kind(), ErrorKind::User);
        assert_eq!(WeftError::double_release().kind(), ErrorKind::DoubleRelease);
        assert_eq!(WeftError::hang("d", 1).kind(), ErrorKind::Hang);
        assert_eq!(
            WeftError::non_effect(&Value::Unit).kind(),
            ErrorKind::NonEffect
        );
    }
}
