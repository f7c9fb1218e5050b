//! The strand scheduler and effect interpreter.
//!
//! One turn = one yielded effect: a strand that yields re-enters the ready
//! queue at the tail (after anything its effect woke or spawned), so a
//! `Send`'s wake-set always runs ahead of the sender and a forked child
//! ahead of its parent's next step. The single exception is `Call`
//! (and `Sequence`, which is a `Call` of an internal driver): the
//! sub-strand is stepped inside the caller's turn and the caller resumes
//! inline when it returns, making call-based operations atomic from the
//! caller's point of view.

use std::collections::VecDeque;
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::{debug, trace};

use weft_types::{
    BoxRoutine, Effect, Racer, Step, StrandHandle, StrandId, StrandStatus, Value, WeftError,
};

use crate::clock::{Clock, sleep_delta};
use crate::composite::{EffectRoutine, SequenceRoutine};
use crate::strand::{Outcome, Strand};
use crate::wait::{TimerEntry, TimerId, WaitIndex, WaitKey, WaitState};

pub(crate) struct Scheduler {
    strands: IndexMap<StrandId, Strand>,
    ready: VecDeque<StrandId>,
    waits: WaitIndex,
    timers: Vec<TimerEntry>,
    clock: Rc<dyn Clock>,
    next_strand: u64,
    next_timer: u64,
    root: StrandId,
    /// First failure nobody was positioned to observe; aborts the run.
    fatal: Option<WeftError>,
}

impl Scheduler {
    pub(crate) fn new(clock: Rc<dyn Clock>, root: BoxRoutine) -> Self {
        let mut scheduler = Self {
            strands: IndexMap::new(),
            ready: VecDeque::new(),
            waits: WaitIndex::default(),
            timers: Vec::new(),
            clock,
            next_strand: 1,
            next_timer: 1,
            root: StrandId::new(0),
            fatal: None,
        };
        let root_id = scheduler.spawn("main".to_string(), root, None);
        scheduler.root = root_id;
        scheduler.ready.push_back(root_id);
        scheduler
    }

    /// Drive the run to full quiescence and report its outcome.
    ///
    /// The loop keeps going past root termination: remaining ready strands
    /// drain and remaining timers fire, so a run only returns cleanly when
    /// nothing is left parked. Anything still waiting at quiescence is a
    /// hang failure regardless of how the root fared.
    pub(crate) fn run_to_completion(&mut self) -> Result<Value, WeftError> {
        debug!(root = %self.root, "run started");
        loop {
            while let Some(id) = self.ready.pop_front() {
                let mut cursor = Some(id);
                while let Some(current) = cursor {
                    cursor = self.step(current);
                }
                if let Some(err) = self.fatal.take() {
                    debug!(error = %err, "run aborted");
                    return Err(err);
                }
            }
            if !self.fire_next_timer() {
                break;
            }
        }
        self.finish()
    }

    /// Resume one ready strand with its pending input. Returns the strand
    /// to step next within the same turn (an inline `Call` child, or the
    /// caller of one that just returned).
    fn step(&mut self, id: StrandId) -> Option<StrandId> {
        let (resume, mut routine) = {
            let strand = self.strands.get_mut(&id)?;
            if strand.status != StrandStatus::Ready {
                return None;
            }
            let resume = strand.resume_with.take().unwrap_or(Value::Unit);
            let routine = strand.routine.take()?;
            (resume, routine)
        };

        let step = routine.resume(resume);
        if let Some(strand) = self.strands.get_mut(&id) {
            strand.routine = Some(routine);
        }

        match step {
            Err(err) => {
                self.fail(id, err);
                None
            }
            Ok(Step::Done(value)) => self.complete(id, value),
            Ok(Step::Yield(Value::Effect(effect))) => {
                trace!(strand = %id, effect = ?effect, "dispatch");
                self.dispatch(id, effect)
            }
            Ok(Step::Yield(other)) => {
                self.fail(id, WeftError::non_effect(&other));
                None
            }
        }
    }

    fn dispatch(&mut self, id: StrandId, effect: Rc<Effect>) -> Option<StrandId> {
        match &*effect {
            Effect::Send { key, value } => {
                self.deliver(key, value);
                // The wake-set is queued; the sender lines up behind it.
                self.make_ready(id, Value::Unit);
                None
            }
            Effect::Receive { key, predicate } => {
                let wait_key = WaitKey::Message(key.clone());
                self.park(
                    id,
                    WaitState::Message {
                        key: key.clone(),
                        predicate: predicate.clone(),
                    },
                    vec![wait_key],
                );
                None
            }
            Effect::Call(spec) => {
                let child = self.spawn(spec.name().to_string(), spec.instantiate(), Some(id));
                self.park(
                    id,
                    WaitState::Child { child },
                    vec![WaitKey::Done(child)],
                );
                Some(child)
            }
            Effect::CallFork(spec) => {
                let child = self.spawn(spec.name().to_string(), spec.instantiate(), Some(id));
                self.ready.push_back(child);
                self.make_ready(id, Value::Handle(StrandHandle::new(child)));
                None
            }
            Effect::Fork(inner) => {
                let child = self.spawn_effect((**inner).clone(), id);
                self.ready.push_back(child);
                self.make_ready(id, Value::Handle(StrandHandle::new(child)));
                None
            }
            Effect::ForkAll(effects) => {
                let mut handles = Vec::with_capacity(effects.len());
                for inner in effects {
                    let child = self.spawn_effect(inner.clone(), id);
                    self.ready.push_back(child);
                    handles.push(Value::Handle(StrandHandle::new(child)));
                }
                self.make_ready(id, Value::List(handles));
                None
            }
            Effect::Join { targets, single } => {
                self.dispatch_join(id, targets.clone(), *single);
                None
            }
            Effect::Cancel(handle) => {
                self.cancel_strand(handle.id());
                // Cancelling an ancestor cancels the canceller too, in
                // which case it must not resume.
                if self
                    .strands
                    .get(&id)
                    .is_some_and(|strand| !strand.is_terminal())
                {
                    self.make_ready(id, Value::Unit);
                }
                None
            }
            Effect::Sleep(seconds) => {
                self.dispatch_sleep(id, *seconds);
                None
            }
            Effect::Sequence(effects) => {
                let child = self.spawn(
                    "sequence".to_string(),
                    Box::new(SequenceRoutine::new(effects.clone())),
                    Some(id),
                );
                self.park(
                    id,
                    WaitState::Child { child },
                    vec![WaitKey::Done(child)],
                );
                Some(child)
            }
            Effect::First(entries) => self.dispatch_first(id, entries.clone()),
        }
    }

    /// Broadcast `value` to every matching receiver parked on `key`, in
    /// registration order. Senders are not buffered: no matcher, no
    /// delivery.
    fn deliver(&mut self, key: &str, value: &Value) {
        let wait_key = WaitKey::Message(key.to_string());
        let candidates = self.waits.snapshot(&wait_key);
        let mut woken = Vec::new();
        for candidate in candidates {
            let matched = match self.strands.get(&candidate).and_then(|s| s.wait.as_ref()) {
                Some(WaitState::Message { predicate, .. }) => {
                    predicate.as_ref().is_none_or(|p| p.as_ref()(value))
                }
                _ => false,
            };
            if matched {
                woken.push(candidate);
            }
        }
        trace!(key, woken = woken.len(), "send delivered");
        for strand in woken {
            self.make_ready(strand, value.clone());
        }
    }

    fn dispatch_join(&mut self, id: StrandId, targets: Vec<StrandHandle>, single: bool) {
        // A target that already failed fails the joiner outright.
        for handle in &targets {
            if let Some(Outcome::Failed(err)) = self
                .strands
                .get(&handle.id())
                .and_then(|s| s.outcome.clone())
            {
                self.fail(id, err);
                return;
            }
        }
        let mut pending: Vec<StrandId> = Vec::new();
        for handle in &targets {
            let target = handle.id();
            let live = self
                .strands
                .get(&target)
                .is_some_and(|s| !s.is_terminal());
            if live && !pending.contains(&target) {
                pending.push(target);
            }
        }
        if pending.is_empty() {
            let result = self.join_result(&targets, single);
            self.make_ready(id, result);
            return;
        }
        let keys: Vec<WaitKey> = pending.iter().map(|p| WaitKey::Done(*p)).collect();
        self.park(
            id,
            WaitState::Join {
                pending,
                targets,
                single,
            },
            keys,
        );
    }

    fn dispatch_sleep(&mut self, id: StrandId, seconds: f64) {
        if seconds == 0.0 {
            // Pure yield: one trip to the back of the queue, no timer.
            self.make_ready(id, Value::Unit);
            return;
        }
        let Some(delta) = sleep_delta(seconds) else {
            self.fail(
                id,
                WeftError::misuse(format!(
                    "Sleep requires a finite non-negative number of seconds, got {seconds}"
                )),
            );
            return;
        };
        let Some(fire_at) = self.clock.now().checked_add_signed(delta) else {
            self.fail(
                id,
                WeftError::misuse(format!("Sleep deadline overflowed: {seconds}s from now")),
            );
            return;
        };
        let timer = TimerId::new(self.next_timer);
        self.next_timer += 1;
        self.timers.push(TimerEntry {
            id: timer,
            strand: id,
            fire_at,
        });
        self.park(id, WaitState::Timer { seconds }, Vec::new());
    }

    fn dispatch_first(&mut self, id: StrandId, entries: Vec<Racer>) -> Option<StrandId> {
        if entries.is_empty() {
            self.fail(id, WeftError::misuse("First requires at least one entry"));
            return None;
        }
        // A handle entry that already finished decides the race before
        // anything is forked. Cancelled entries can never win.
        let mut decided: Option<(usize, Result<Value, WeftError>)> = None;
        for (index, entry) in entries.iter().enumerate() {
            if let Racer::Strand(handle) = entry {
                match self
                    .strands
                    .get(&handle.id())
                    .and_then(|s| s.outcome.clone())
                {
                    Some(Outcome::Done(value)) => {
                        decided = Some((index, Ok(value)));
                        break;
                    }
                    Some(Outcome::Failed(err)) => {
                        decided = Some((index, Err(err)));
                        break;
                    }
                    _ => {}
                }
            }
        }
        if let Some((index, outcome)) = decided {
            for (i, entry) in entries.iter().enumerate() {
                if i == index {
                    continue;
                }
                if let Racer::Strand(handle) = entry {
                    self.cancel_strand(handle.id());
                }
            }
            match outcome {
                Ok(value) => self.make_ready(id, race_result(index, value)),
                Err(err) => self.fail(id, err),
            }
            return None;
        }

        let mut racers = Vec::with_capacity(entries.len());
        for entry in entries {
            match entry {
                Racer::Effect(inner) => {
                    let child = self.spawn_effect(*inner, id);
                    self.ready.push_back(child);
                    racers.push(child);
                }
                Racer::Strand(handle) => racers.push(handle.id()),
            }
        }
        let keys: Vec<WaitKey> = racers.iter().map(|r| WaitKey::Done(*r)).collect();
        self.park(id, WaitState::Race { entries: racers }, keys);
        None
    }

    fn complete(&mut self, id: StrandId, value: Value) -> Option<StrandId> {
        {
            let strand = self.strands.get_mut(&id)?;
            if strand.is_terminal() {
                return None;
            }
            strand.status = StrandStatus::Done;
            strand.outcome = Some(Outcome::Done(value.clone()));
            strand.routine = None;
            strand.wait = None;
        }
        trace!(strand = %id, "strand done");
        self.notify_done(id, value)
    }

    /// Wake everything watching `id` terminate successfully. Returns the
    /// call parent to resume inline, if there is one.
    fn notify_done(&mut self, id: StrandId, value: Value) -> Option<StrandId> {
        enum Waken {
            Caller,
            Join {
                targets: Vec<StrandHandle>,
                single: bool,
            },
            Race {
                index: usize,
                entries: Vec<StrandId>,
            },
            Keep,
        }

        let key = WaitKey::Done(id);
        let waiters = self.waits.drain(&key);
        let mut inline = None;
        for waiter in waiters {
            let action = {
                let Some(state) = self.strands.get_mut(&waiter) else {
                    continue;
                };
                state.registrations.retain(|k| *k != key);
                match &mut state.wait {
                    Some(WaitState::Child { child }) if *child == id => Waken::Caller,
                    Some(WaitState::Join {
                        pending,
                        targets,
                        single,
                    }) => {
                        pending.retain(|p| *p != id);
                        if pending.is_empty() {
                            Waken::Join {
                                targets: targets.clone(),
                                single: *single,
                            }
                        } else {
                            Waken::Keep
                        }
                    }
                    Some(WaitState::Race { entries }) => match entries.iter().position(|e| *e == id)
                    {
                        Some(index) => Waken::Race {
                            index,
                            entries: entries.clone(),
                        },
                        None => Waken::Keep,
                    },
                    _ => Waken::Keep,
                }
            };
            match action {
                Waken::Caller => {
                    self.prepare_inline(waiter, value.clone());
                    inline = Some(waiter);
                }
                Waken::Join { targets, single } => {
                    let result = self.join_result(&targets, single);
                    self.make_ready(waiter, result);
                }
                Waken::Race { index, entries } => {
                    // Losers go down before the parent sees the result.
                    for entry in &entries {
                        if *entry != id {
                            self.cancel_strand(*entry);
                        }
                    }
                    self.make_ready(waiter, race_result(index, value.clone()));
                }
                Waken::Keep => {}
            }
        }
        inline
    }

    /// Terminal-fail `id` and cascade to whoever was watching it: call
    /// parents, joiners and race parents inherit the failure (races tear
    /// their remaining entries down first). A failure with no watcher, or
    /// one reaching the root, aborts the run.
    fn fail(&mut self, id: StrandId, err: WeftError) {
        {
            let Some(strand) = self.strands.get_mut(&id) else {
                return;
            };
            if strand.is_terminal() {
                return;
            }
            strand.status = StrandStatus::Failed;
            strand.outcome = Some(Outcome::Failed(err.clone()));
            strand.routine = None;
        }
        debug!(strand = %id, error = %err, "strand failed");
        self.clear_wait(id);
        let key = WaitKey::Done(id);
        let waiters = self.waits.drain(&key);
        let mut observed = false;
        for waiter in waiters {
            let teardown = {
                let Some(state) = self.strands.get_mut(&waiter) else {
                    continue;
                };
                state.registrations.retain(|k| *k != key);
                match &state.wait {
                    Some(WaitState::Child { child }) if *child == id => Some(Vec::new()),
                    Some(WaitState::Join { .. }) => Some(Vec::new()),
                    Some(WaitState::Race { entries }) => Some(entries.clone()),
                    _ => None,
                }
            };
            if let Some(entries) = teardown {
                observed = true;
                for entry in entries {
                    if entry != id {
                        self.cancel_strand(entry);
                    }
                }
                self.fail(waiter, err.clone());
            }
        }
        if (id == self.root || !observed) && self.fatal.is_none() {
            self.fatal = Some(err);
        }
    }

    /// Terminal-cancel `id` and every live descendant, synchronously.
    /// Joiners observe cancellation as termination (unit sentinel); races
    /// do not — a cancelled entry can never win.
    fn cancel_strand(&mut self, id: StrandId) {
        enum Waken {
            Caller,
            Join {
                targets: Vec<StrandHandle>,
                single: bool,
            },
            Keep,
        }

        {
            let Some(strand) = self.strands.get_mut(&id) else {
                return;
            };
            if strand.is_terminal() {
                return;
            }
            strand.status = StrandStatus::Cancelled;
            strand.outcome = Some(Outcome::Cancelled);
            strand.routine = None;
        }
        trace!(strand = %id, "strand cancelled");
        self.clear_wait(id);
        let children = self
            .strands
            .get(&id)
            .map(|s| s.children.clone())
            .unwrap_or_default();
        for child in children {
            self.cancel_strand(child);
        }
        let key = WaitKey::Done(id);
        let waiters = self.waits.drain(&key);
        for waiter in waiters {
            let action = {
                let Some(state) = self.strands.get_mut(&waiter) else {
                    continue;
                };
                state.registrations.retain(|k| *k != key);
                match &mut state.wait {
                    Some(WaitState::Child { child }) if *child == id => Waken::Caller,
                    Some(WaitState::Join {
                        pending,
                        targets,
                        single,
                    }) => {
                        pending.retain(|p| *p != id);
                        if pending.is_empty() {
                            Waken::Join {
                                targets: targets.clone(),
                                single: *single,
                            }
                        } else {
                            Waken::Keep
                        }
                    }
                    _ => Waken::Keep,
                }
            };
            match action {
                Waken::Caller => self.make_ready(waiter, Value::Unit),
                Waken::Join { targets, single } => {
                    let result = self.join_result(&targets, single);
                    self.make_ready(waiter, result);
                }
                Waken::Keep => {}
            }
        }
    }

    /// Collected join result over `targets`: return values in target order,
    /// unit for cancelled targets.
    fn join_result(&self, targets: &[StrandHandle], single: bool) -> Value {
        let mut values = Vec::with_capacity(targets.len());
        for handle in targets {
            let value = match self
                .strands
                .get(&handle.id())
                .and_then(|s| s.outcome.as_ref())
            {
                Some(Outcome::Done(value)) => value.clone(),
                _ => Value::Unit,
            };
            values.push(value);
        }
        if single {
            values.into_iter().next().unwrap_or(Value::Unit)
        } else {
            Value::List(values)
        }
    }

    fn spawn(&mut self, name: String, routine: BoxRoutine, parent: Option<StrandId>) -> StrandId {
        let id = StrandId::new(self.next_strand);
        self.next_strand += 1;
        trace!(strand = %id, name = %name, parent = ?parent.map(|p| p.to_string()), "spawned");
        if let Some(parent) = parent {
            if let Some(strand) = self.strands.get_mut(&parent) {
                strand.children.push(id);
            }
        }
        self.strands.insert(id, Strand::new(id, name, routine));
        id
    }

    fn spawn_effect(&mut self, effect: Effect, parent: StrandId) -> StrandId {
        let name = effect.name().to_ascii_lowercase();
        self.spawn(name, Box::new(EffectRoutine::new(effect)), Some(parent))
    }

    fn park(&mut self, id: StrandId, wait: WaitState, keys: Vec<WaitKey>) {
        for key in &keys {
            self.waits.register(key.clone(), id);
        }
        if let Some(strand) = self.strands.get_mut(&id) {
            strand.status = StrandStatus::Waiting;
            strand.wait = Some(wait);
            strand.registrations = keys;
        }
    }

    fn make_ready(&mut self, id: StrandId, resume: Value) {
        self.wake(id, resume, true);
    }

    /// Wake without enqueueing: the caller will step the strand itself,
    /// within the current turn.
    fn prepare_inline(&mut self, id: StrandId, resume: Value) {
        self.wake(id, resume, false);
    }

    fn wake(&mut self, id: StrandId, resume: Value, enqueue: bool) {
        self.clear_wait(id);
        let Some(strand) = self.strands.get_mut(&id) else {
            return;
        };
        if strand.is_terminal() {
            return;
        }
        strand.status = StrandStatus::Ready;
        strand.resume_with = Some(resume);
        if enqueue {
            self.ready.push_back(id);
        }
    }

    fn clear_wait(&mut self, id: StrandId) {
        let keys = match self.strands.get_mut(&id) {
            Some(strand) => {
                strand.wait = None;
                std::mem::take(&mut strand.registrations)
            }
            None => return,
        };
        for key in keys {
            self.waits.unregister(&key, id);
        }
        self.timers.retain(|t| t.strand != id);
    }

    /// Advance external time to the nearest deadline and wake its sleeper.
    /// Ties break by timer registration order.
    fn fire_next_timer(&mut self) -> bool {
        let next = self
            .timers
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.fire_at.cmp(&b.fire_at).then(a.id.cmp(&b.id)))
            .map(|(index, _)| index);
        let Some(index) = next else {
            return false;
        };
        let entry = self.timers.remove(index);
        self.clock.wait_until(entry.fire_at);
        trace!(strand = %entry.strand, "timer fired");
        self.make_ready(entry.strand, Value::Unit);
        true
    }

    /// At full quiescence: report a hang if anything is still parked,
    /// otherwise the root's outcome is the run's outcome.
    fn finish(&mut self) -> Result<Value, WeftError> {
        let blocked: Vec<StrandId> = self
            .strands
            .values()
            .filter(|s| s.status == StrandStatus::Waiting)
            .map(|s| s.id)
            .collect();
        if !blocked.is_empty() {
            for id in &blocked {
                debug!(strand = %id, wait = %self.wait_descriptor(*id), "blocked at quiescence");
            }
            let sampled = blocked.iter().copied().max().unwrap_or(self.root);
            let descriptor = self.wait_descriptor(sampled);
            return Err(WeftError::hang(&descriptor, blocked.len()));
        }
        match self.strands.get(&self.root).and_then(|s| s.outcome.clone()) {
            Some(Outcome::Done(value)) => {
                debug!("run completed");
                Ok(value)
            }
            Some(Outcome::Failed(err)) => Err(err),
            Some(Outcome::Cancelled) => Err(WeftError::misuse("root strand was cancelled")),
            None => Err(WeftError::misuse("root strand never completed")),
        }
    }

    fn wait_descriptor(&self, id: StrandId) -> String {
        let Some(strand) = self.strands.get(&id) else {
            return "<unknown strand>".to_string();
        };
        match &strand.wait {
            Some(WaitState::Message { key, .. }) => format!("Receive({key})"),
            Some(WaitState::Child { child }) => {
                let name = self
                    .strands
                    .get(child)
                    .map(|c| c.name.clone())
                    .unwrap_or_else(|| child.to_string());
                format!("Call({name})")
            }
            Some(WaitState::Join { pending, .. }) => {
                let ids: Vec<String> = pending.iter().map(ToString::to_string).collect();
                format!("Join([{}])", ids.join(", "))
            }
            Some(WaitState::Race { entries }) => {
                let ids: Vec<String> = entries.iter().map(ToString::to_string).collect();
                format!("First([{}])", ids.join(", "))
            }
            Some(WaitState::Timer { seconds, .. }) => format!("Sleep({seconds})"),
            None => "<no wait>".to_string(),
        }
    }
}

fn race_result(index: usize, value: Value) -> Value {
    Value::Tuple(vec![Value::Int(index as i64), value])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::runtime::Runtime;
    use chrono::{DateTime, Utc};

    /// Clock that fails the test if the scheduler touches it.
    struct UntouchableClock;

    impl Clock for UntouchableClock {
        fn now(&self) -> DateTime<Utc> {
            panic!("scheduler consulted the clock");
        }

        fn wait_until(&self, _deadline: DateTime<Utc>) {
            panic!("scheduler waited on the clock");
        }
    }

    #[test]
    fn sleep_zero_never_consults_the_timer_source() {
        let runtime = Runtime::with_clock(Rc::new(UntouchableClock));
        let mut turn = 0;
        let result = runtime.run(move |_input: Value| -> Result<Step, WeftError> {
            turn += 1;
            match turn {
                1 => Ok(Step::effect(Effect::sleep(0.0))),
                _ => Ok(Step::done(Value::Int(11))),
            }
        });
        assert_eq!(result.ok().and_then(|v| v.as_int()), Some(11));
    }

    #[test]
    fn negative_sleep_is_a_misuse_failure() {
        let runtime = Runtime::with_clock(Rc::new(ManualClock::starting_at_epoch()));
        let mut turn = 0;
        let err = runtime
            .run(move |_input: Value| -> Result<Step, WeftError> {
                turn += 1;
                match turn {
                    1 => Ok(Step::effect(Effect::sleep(-2.0))),
                    _ => Ok(Step::done(Value::Unit)),
                }
            })
            .unwrap_err();
        assert_eq!(err.kind(), weft_types::ErrorKind::Misuse);
    }

    #[test]
    fn empty_race_is_a_misuse_failure() {
        let runtime = Runtime::with_clock(Rc::new(ManualClock::starting_at_epoch()));
        let mut turn = 0;
        let err = runtime
            .run(move |_input: Value| -> Result<Step, WeftError> {
                turn += 1;
                match turn {
                    1 => Ok(Step::effect(Effect::first(vec![]))),
                    _ => Ok(Step::done(Value::Unit)),
                }
            })
            .unwrap_err();
        assert_eq!(err.kind(), weft_types::ErrorKind::Misuse);
    }
}
