//! Internal drivers for composite effects.
//!
//! `Fork`-of-effect and `Sequence` are resolved by wrapping the payload
//! effects in small synthetic routines and feeding them back through the
//! ordinary dispatch machinery; the scheduler itself has no composite
//! cases beyond spawning these.

use weft_types::{Effect, Routine, Step, Value, WeftError};

/// Body of a strand forked from a single effect: yield it once, then
/// return whatever it produced.
pub(crate) struct EffectRoutine {
    effect: Option<Effect>,
}

impl EffectRoutine {
    pub(crate) fn new(effect: Effect) -> Self {
        Self {
            effect: Some(effect),
        }
    }
}

impl Routine for EffectRoutine {
    fn resume(&mut self, input: Value) -> Result<Step, WeftError> {
        match self.effect.take() {
            Some(effect) => Ok(Step::effect(effect)),
            None => Ok(Step::Done(input)),
        }
    }
}

/// Driver for `Sequence`: yield each effect in order, discard every result
/// but the last. An empty sequence returns unit immediately.
pub(crate) struct SequenceRoutine {
    effects: std::vec::IntoIter<Effect>,
}

impl SequenceRoutine {
    pub(crate) fn new(effects: Vec<Effect>) -> Self {
        Self {
            effects: effects.into_iter(),
        }
    }
}

impl Routine for SequenceRoutine {
    fn resume(&mut self, input: Value) -> Result<Step, WeftError> {
        match self.effects.next() {
            Some(effect) => Ok(Step::effect(effect)),
            None => Ok(Step::Done(input)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effect_routine_yields_once_then_returns_the_result() {
        let mut routine = EffectRoutine::new(Effect::receive("k"));
        match routine.resume(Value::Unit) {
            Ok(Step::Yield(v)) => assert_eq!(v.as_effect().map(|e| e.name()), Some("Receive")),
            other => panic!("unexpected step: {other:?}"),
        }
        match routine.resume(Value::Int(7)) {
            Ok(Step::Done(Value::Int(7))) => {}
            other => panic!("unexpected step: {other:?}"),
        }
    }

    #[test]
    fn sequence_routine_yields_in_order_and_returns_last_input() {
        let mut routine = SequenceRoutine::new(vec![Effect::send("a"), Effect::send("b")]);
        for expected in ["a", "b"] {
            match routine.resume(Value::Unit) {
                Ok(Step::Yield(v)) => match v.as_effect().map(|e| e.as_ref().clone()) {
                    Some(Effect::Send { key, .. }) => assert_eq!(key, expected),
                    other => panic!("unexpected effect: {other:?}"),
                },
                other => panic!("unexpected step: {other:?}"),
            }
        }
        match routine.resume(Value::Int(5)) {
            Ok(Step::Done(Value::Int(5))) => {}
            other => panic!("unexpected step: {other:?}"),
        }
    }

    #[test]
    fn empty_sequence_returns_unit_immediately() {
        let mut routine = SequenceRoutine::new(vec![]);
        match routine.resume(Value::Unit) {
            Ok(Step::Done(Value::Unit)) => {}
            other => panic!("unexpected step: {other:?}"),
        }
    }
}
