use crate::error::WeftError;
use crate::value::Value;

/// One resumption's result: either a yielded value (which the interpreter
/// requires to be an effect) or the routine's return value.
#[derive(Debug)]
pub enum Step {
    Yield(Value),
    Done(Value),
}

impl Step {
    /// Yield an effect. This is the normal way a routine suspends.
    pub fn effect(effect: crate::effect::Effect) -> Self {
        Self::Yield(Value::effect(effect))
    }

    pub fn done(value: impl Into<Value>) -> Self {
        Self::Done(value.into())
    }
}

/// A resumable strand body.
///
/// The scheduler drives a routine by calling `resume` with the previous
/// effect's result (`Value::Unit` on the first call). Between calls the
/// routine owns all of its state; there is no other channel back into the
/// scheduler, so resumption can never re-enter the runtime.
///
/// Returning `Err` models a failure raised inside the strand body; the
/// strand becomes terminal-failed and the error propagates to whoever is
/// waiting on it.
pub trait Routine {
    fn resume(&mut self, input: Value) -> Result<Step, WeftError>;
}

pub type BoxRoutine = Box<dyn Routine>;

/// Closures are routines: a step counter plus a `match` is the lightest way
/// to write a multi-yield body.
impl<F> Routine for F
where
    F: FnMut(Value) -> Result<Step, WeftError>,
{
    fn resume(&mut self, input: Value) -> Result<Step, WeftError> {
        self(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::Effect;

    #[test]
    fn closures_resume_with_prior_results() {
        let mut state = 0;
        let mut routine = move |input: Value| -> Result<Step, WeftError> {
            state += 1;
            match state {
                1 => {
                    assert!(input.is_unit());
                    Ok(Step::effect(Effect::receive("k")))
                }
                _ => Ok(Step::Done(input)),
            }
        };

        match routine.resume(Value::Unit) {
            Ok(Step::Yield(v)) => assert_eq!(v.as_effect().map(|e| e.name()), Some("Receive")),
            other => panic!("unexpected step: {other:?}"),
        }
        match routine.resume(Value::Int(4)) {
            Ok(Step::Done(Value::Int(4))) => {}
            other => panic!("unexpected step: {other:?}"),
        }
    }

    #[test]
    fn user_failures_surface_as_errors() {
        let mut routine =
            |_input: Value| -> Result<Step, WeftError> { Err(WeftError::user("boom")) };
        let err = routine.resume(Value::Unit).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::User);
    }
}
