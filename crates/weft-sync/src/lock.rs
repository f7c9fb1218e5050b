use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use weft_types::{Effect, Routine, Step, Value, WeftError};

/// Global lock ID counter; feeds each lock's private message key.
static NEXT_LOCK_ID: AtomicU64 = AtomicU64::new(0);

struct LockState {
    held: bool,
    /// Release id of the current holder; `None` between acquisitions.
    holder: Option<u64>,
    next_release: u64,
    /// Handoff generation broadcast on each release. Waiters park against
    /// the next generation, so one release wakes each of them at most once.
    generation: i64,
}

/// A mutex for strands.
///
/// `acquire()` produces an effect whose result is a release token: a
/// first-class effect value to yield when the critical section is done.
/// Yielding the same acquisition's token twice is a fatal error.
///
/// A strand cancelled while holding the lock never releases it; later
/// acquirers park forever and surface through the hang detector at
/// quiescence.
#[derive(Clone)]
pub struct Lock {
    key: String,
    state: Rc<RefCell<LockState>>,
}

impl Lock {
    pub fn new() -> Self {
        let id = NEXT_LOCK_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            key: format!("lock:{id}"),
            state: Rc::new(RefCell::new(LockState {
                held: false,
                holder: None,
                next_release: 0,
                generation: 0,
            })),
        }
    }

    /// Effect that acquires the lock; its result is the release token.
    ///
    /// Acquire effects may be created eagerly and yielded in any order;
    /// each dispatch runs the protocol from scratch.
    pub fn acquire(&self) -> Effect {
        let state = Rc::clone(&self.state);
        let key = self.key.clone();
        Effect::call(
            "acquire",
            move |_args| {
                Box::new(AcquireRoutine {
                    state: Rc::clone(&state),
                    key: key.clone(),
                })
            },
            vec![],
        )
    }
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}

struct AcquireRoutine {
    state: Rc<RefCell<LockState>>,
    key: String,
}

impl Routine for AcquireRoutine {
    fn resume(&mut self, _input: Value) -> Result<Step, WeftError> {
        let mut state = self.state.borrow_mut();
        if !state.held {
            state.held = true;
            state.next_release += 1;
            let release_id = state.next_release;
            state.holder = Some(release_id);
            drop(state);
            let token = release_effect(&self.state, &self.key, release_id);
            return Ok(Step::Done(Value::effect(token)));
        }
        // Contended: park for the next handoff, then re-enter from the top.
        // Whoever of the woken waiters runs first wins; the rest land back
        // here and park against the following generation.
        let expected = state.generation + 1;
        drop(state);
        Ok(Step::effect(Effect::receive_match(
            self.key.clone(),
            move |v| v == &Value::Int(expected),
        )))
    }
}

fn release_effect(state: &Rc<RefCell<LockState>>, key: &str, release_id: u64) -> Effect {
    let state = Rc::clone(state);
    let key = key.to_string();
    Effect::call(
        "release",
        move |_args| {
            Box::new(ReleaseRoutine {
                state: Rc::clone(&state),
                key: key.clone(),
                release_id,
                handed_off: false,
            })
        },
        vec![],
    )
}

struct ReleaseRoutine {
    state: Rc<RefCell<LockState>>,
    key: String,
    release_id: u64,
    handed_off: bool,
}

impl Routine for ReleaseRoutine {
    fn resume(&mut self, _input: Value) -> Result<Step, WeftError> {
        if self.handed_off {
            return Ok(Step::Done(Value::Unit));
        }
        let mut state = self.state.borrow_mut();
        if state.holder != Some(self.release_id) {
            return Err(WeftError::double_release());
        }
        state.holder = None;
        state.held = false;
        state.generation += 1;
        let generation = state.generation;
        drop(state);
        self.handed_off = true;
        Ok(Step::effect(Effect::send_value(
            self.key.clone(),
            Value::Int(generation),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call_routine(effect: Effect) -> Box<dyn Routine> {
        match effect {
            Effect::Call(spec) => spec.instantiate(),
            other => panic!("expected a call effect, got {other:?}"),
        }
    }

    fn token_effect(step: Result<Step, WeftError>) -> Effect {
        match step {
            Ok(Step::Done(value)) => value
                .as_effect()
                .map(|e| e.as_ref().clone())
                .expect("acquire result should be an effect value"),
            other => panic!("expected an immediate token, got {other:?}"),
        }
    }

    #[test]
    fn locks_use_distinct_keys() {
        assert_ne!(Lock::new().key, Lock::new().key);
    }

    #[test]
    fn uncontended_acquire_completes_in_one_step() {
        let lock = Lock::new();
        let mut acquire = call_routine(lock.acquire());
        token_effect(acquire.resume(Value::Unit));
        assert!(lock.state.borrow().held);
    }

    #[test]
    fn contended_acquire_parks_on_the_lock_key() {
        let lock = Lock::new();
        let mut first = call_routine(lock.acquire());
        token_effect(first.resume(Value::Unit));

        let mut second = call_routine(lock.acquire());
        match second.resume(Value::Unit) {
            Ok(Step::Yield(value)) => {
                match value.as_effect().map(|e| e.as_ref().clone()) {
                    Some(Effect::Receive { key, predicate }) => {
                        assert_eq!(key, lock.key);
                        let predicate = predicate.expect("handoff waits are generation-matched");
                        // Only the next handoff generation wakes this waiter.
                        assert!(predicate.as_ref()(&Value::Int(1)));
                        assert!(!predicate.as_ref()(&Value::Int(2)));
                    }
                    other => panic!("expected a receive, got {other:?}"),
                }
            }
            other => panic!("expected the acquirer to park, got {other:?}"),
        }
    }

    #[test]
    fn release_hands_off_and_resists_double_release() {
        let lock = Lock::new();
        let mut acquire = call_routine(lock.acquire());
        let token = token_effect(acquire.resume(Value::Unit));

        let mut release = call_routine(token.clone());
        match release.resume(Value::Unit) {
            Ok(Step::Yield(value)) => match value.as_effect().map(|e| e.as_ref().clone()) {
                Some(Effect::Send { key, value }) => {
                    assert_eq!(key, lock.key);
                    assert_eq!(value, Value::Int(1));
                }
                other => panic!("expected the handoff send, got {other:?}"),
            },
            other => panic!("expected the handoff send, got {other:?}"),
        }
        match release.resume(Value::Unit) {
            Ok(Step::Done(Value::Unit)) => {}
            other => panic!("expected release to finish, got {other:?}"),
        }
        assert!(!lock.state.borrow().held);

        // The same acquisition's token again: fatal.
        let mut again = call_routine(token);
        let err = again.resume(Value::Unit).unwrap_err();
        assert_eq!(err.kind(), weft_types::ErrorKind::DoubleRelease);
    }
}
