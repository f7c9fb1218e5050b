use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use weft_types::{Effect, Routine, Step, Value, WeftError};

static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(0);

struct QueueState {
    buffer: VecDeque<Value>,
    capacity: usize,
    /// Bumped on every push; broadcast to wake parked consumers.
    get_generation: i64,
    /// Bumped on every pop; broadcast to wake parked producers.
    put_generation: i64,
}

/// Bounded FIFO channel between strands.
///
/// `put` parks when the buffer is full; `get` parks when it is empty.
/// Elements flow through the buffer in order, and parked consumers are
/// served oldest-first. Cancelling a parked producer or consumer needs no
/// cleanup: it just stops competing for the next handoff.
#[derive(Clone)]
pub struct Queue {
    get_key: String,
    put_key: String,
    state: Rc<RefCell<QueueState>>,
}

impl Queue {
    /// A queue holding at most `capacity` buffered elements.
    ///
    /// `capacity` must be at least 1.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "queue capacity must be at least 1");
        let id = NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            get_key: format!("queue-get:{id}"),
            put_key: format!("queue-put:{id}"),
            state: Rc::new(RefCell::new(QueueState {
                buffer: VecDeque::new(),
                capacity,
                get_generation: 0,
                put_generation: 0,
            })),
        }
    }

    /// Effect that enqueues `value`, parking while the buffer is full.
    /// Result: unit.
    pub fn put(&self, value: Value) -> Effect {
        let state = Rc::clone(&self.state);
        let get_key = self.get_key.clone();
        let put_key = self.put_key.clone();
        Effect::call(
            "put",
            move |_args| {
                Box::new(PutRoutine {
                    state: Rc::clone(&state),
                    get_key: get_key.clone(),
                    put_key: put_key.clone(),
                    value: value.clone(),
                    pushed: false,
                })
            },
            vec![],
        )
    }

    /// Effect that dequeues the oldest element, parking while the buffer is
    /// empty. Result: the element.
    pub fn get(&self) -> Effect {
        let state = Rc::clone(&self.state);
        let get_key = self.get_key.clone();
        let put_key = self.put_key.clone();
        Effect::call(
            "get",
            move |_args| {
                Box::new(GetRoutine {
                    state: Rc::clone(&state),
                    get_key: get_key.clone(),
                    put_key: put_key.clone(),
                    popped: None,
                })
            },
            vec![],
        )
    }
}

struct PutRoutine {
    state: Rc<RefCell<QueueState>>,
    get_key: String,
    put_key: String,
    value: Value,
    pushed: bool,
}

impl Routine for PutRoutine {
    fn resume(&mut self, _input: Value) -> Result<Step, WeftError> {
        if self.pushed {
            return Ok(Step::Done(Value::Unit));
        }
        let mut state = self.state.borrow_mut();
        if state.buffer.len() < state.capacity {
            state.buffer.push_back(self.value.clone());
            state.get_generation += 1;
            let generation = state.get_generation;
            drop(state);
            self.pushed = true;
            // Wake parked consumers to compete for the buffered element.
            Ok(Step::effect(Effect::send_value(
                self.get_key.clone(),
                Value::Int(generation),
            )))
        } else {
            let expected = state.put_generation + 1;
            drop(state);
            Ok(Step::effect(Effect::receive_match(
                self.put_key.clone(),
                move |v| v == &Value::Int(expected),
            )))
        }
    }
}

struct GetRoutine {
    state: Rc<RefCell<QueueState>>,
    get_key: String,
    put_key: String,
    popped: Option<Value>,
}

impl Routine for GetRoutine {
    fn resume(&mut self, _input: Value) -> Result<Step, WeftError> {
        if let Some(value) = self.popped.take() {
            return Ok(Step::Done(value));
        }
        let mut state = self.state.borrow_mut();
        if let Some(value) = state.buffer.pop_front() {
            state.put_generation += 1;
            let generation = state.put_generation;
            drop(state);
            self.popped = Some(value);
            // A slot opened up; wake parked producers to refill it.
            Ok(Step::effect(Effect::send_value(
                self.put_key.clone(),
                Value::Int(generation),
            )))
        } else {
            let expected = state.get_generation + 1;
            drop(state);
            Ok(Step::effect(Effect::receive_match(
                self.get_key.clone(),
                move |v| v == &Value::Int(expected),
            )))
        }
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

    #[test]
    #[should_panic(expected = "capacity must be at least 1")]
    fn zero_capacity_is_rejected() {
        let _ = Queue::new(0);
    }

    #[test]
    fn put_buffers_then_wakes_consumers() {
        let queue = Queue::new(1);
        let mut put = call_routine(queue.put(Value::Int(3)));
        match put.resume(Value::Unit) {
            Ok(Step::Yield(value)) => match value.as_effect().map(|e| e.as_ref().clone()) {
                Some(Effect::Send { key, .. }) => assert_eq!(key, queue.get_key),
                other => panic!("expected the consumer handoff, got {other:?}"),
            },
            other => panic!("expected the consumer handoff, got {other:?}"),
        }
        match put.resume(Value::Unit) {
            Ok(Step::Done(Value::Unit)) => {}
            other => panic!("expected put to finish, got {other:?}"),
        }
        assert_eq!(queue.state.borrow().buffer.len(), 1);
    }

    #[test]
    fn put_parks_when_the_buffer_is_full() {
        let queue = Queue::new(1);
        queue.state.borrow_mut().buffer.push_back(Value::Int(1));
        let mut put = call_routine(queue.put(Value::Int(2)));
        match put.resume(Value::Unit) {
            Ok(Step::Yield(value)) => match value.as_effect().map(|e| e.as_ref().clone()) {
                Some(Effect::Receive { key, .. }) => assert_eq!(key, queue.put_key),
                other => panic!("expected the producer to park, got {other:?}"),
            },
            other => panic!("expected the producer to park, got {other:?}"),
        }
        // The buffer never exceeded its capacity.
        assert_eq!(queue.state.borrow().buffer.len(), 1);
    }

    #[test]
    fn get_pops_the_oldest_buffered_element() {
        let queue = Queue::new(2);
        queue.state.borrow_mut().buffer.push_back(Value::Int(1));
        queue.state.borrow_mut().buffer.push_back(Value::Int(2));
        let mut get = call_routine(queue.get());
        match get.resume(Value::Unit) {
            Ok(Step::Yield(value)) => match value.as_effect().map(|e| e.as_ref().clone()) {
                Some(Effect::Send { key, .. }) => assert_eq!(key, queue.put_key),
                other => panic!("expected the producer handoff, got {other:?}"),
            },
            other => panic!("expected the producer handoff, got {other:?}"),
        }
        match get.resume(Value::Unit) {
            Ok(Step::Done(Value::Int(1))) => {}
            other => panic!("expected the oldest element, got {other:?}"),
        }
        assert_eq!(queue.state.borrow().buffer.len(), 1);
    }

    #[test]
    fn get_parks_when_the_buffer_is_empty() {
        let queue = Queue::new(1);
        let mut get = call_routine(queue.get());
        match get.resume(Value::Unit) {
            Ok(Step::Yield(value)) => match value.as_effect().map(|e| e.as_ref().clone()) {
                Some(Effect::Receive { key, .. }) => assert_eq!(key, queue.get_key),
                other => panic!("expected the consumer to park, got {other:?}"),
            },
            other => panic!("expected the consumer to park, got {other:?}"),
        }
    }
}
