use std::fmt;
use std::rc::Rc;

use crate::routine::BoxRoutine;
use crate::strand::StrandHandle;
use crate::value::Value;

/// Match condition for `Receive`. Predicates are pure functions of the sent
/// value; they run synchronously inside `Send` dispatch and must not block.
pub type Predicate = Rc<dyn Fn(&Value) -> bool>;

/// Produces a fresh routine instance for a `Call`/`CallFork` dispatch.
///
/// The factory (not a routine) is stored in the effect so the same effect
/// value can be yielded any number of times, each dispatch getting its own
/// resumption state.
pub type RoutineFactory = Rc<dyn Fn(Vec<Value>) -> BoxRoutine>;

/// A named, argument-carrying routine invocation.
///
/// The name is purely diagnostic: it is what hang reports print as
/// `Call(<name>)` when the sub-strand is still blocked at quiescence.
#[derive(Clone)]
pub struct CallSpec {
    name: String,
    factory: RoutineFactory,
    args: Vec<Value>,
}

impl CallSpec {
    pub fn new(
        name: impl Into<String>,
        factory: impl Fn(Vec<Value>) -> BoxRoutine + 'static,
        args: Vec<Value>,
    ) -> Self {
        Self {
            name: name.into(),
            factory: Rc::new(factory),
            args,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Build a fresh routine over this spec's arguments.
    pub fn instantiate(&self) -> BoxRoutine {
        (self.factory)(self.args.clone())
    }
}

impl fmt::Debug for CallSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallSpec")
            .field("name", &self.name)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

/// One entry in a `First` race: either a fresh effect (forked as a new
/// sub-strand for the duration of the race) or an already-running strand.
#[derive(Clone, Debug)]
pub enum Racer {
    Effect(Box<Effect>),
    Strand(StrandHandle),
}

impl From<Effect> for Racer {
    fn from(effect: Effect) -> Self {
        Self::Effect(Box::new(effect))
    }
}

impl From<StrandHandle> for Racer {
    fn from(handle: StrandHandle) -> Self {
        Self::Strand(handle)
    }
}

/// Declarative description of one requested operation.
///
/// Effects are inert data: yielding one hands it to the scheduler, which
/// either completes it immediately (the strand is re-enqueued with the
/// result) or parks the strand until a matching event occurs.
#[derive(Clone)]
pub enum Effect {
    /// Broadcast `value` to every currently-parked matching `Receive`.
    /// Never buffers; a send nobody is waiting for is dropped.
    Send { key: String, value: Value },
    /// Park until a `Send` on `key` whose value satisfies the predicate
    /// (no predicate = match anything). Result: the sent value.
    Receive {
        key: String,
        predicate: Option<Predicate>,
    },
    /// Run a routine as an inline sub-strand; the caller resumes with its
    /// return value, and inherits its failure.
    Call(CallSpec),
    /// Start a routine as an independent strand. Result: its handle.
    CallFork(CallSpec),
    /// Start a strand whose whole body is one effect. Result: its handle.
    Fork(Box<Effect>),
    /// Fork each effect in order. Result: the list of handles. No implicit
    /// join.
    ForkAll(Vec<Effect>),
    /// Park until every target is terminal. Result: the single return value
    /// (`single`) or the list of return values in target order. A target
    /// that terminated cancelled contributes unit.
    Join {
        targets: Vec<StrandHandle>,
        single: bool,
    },
    /// Request cancellation of the target and its live descendants.
    /// Synchronous and idempotent; result: unit.
    Cancel(StrandHandle),
    /// Park for `seconds` of external time. `Sleep(0)` yields exactly one
    /// scheduling turn and never consults the timer source.
    Sleep(f64),
    /// Run each effect in order, discarding all results but the last.
    Sequence(Vec<Effect>),
    /// Race the entries; result: `(winner_index, winner_result)` as a tuple.
    /// Losing entries still live are cancelled before the parent resumes.
    First(Vec<Racer>),
}

impl Effect {
    /// `Send` with a unit payload.
    pub fn send(key: impl Into<String>) -> Self {
        Self::Send {
            key: key.into(),
            value: Value::Unit,
        }
    }

    pub fn send_value(key: impl Into<String>, value: Value) -> Self {
        Self::Send {
            key: key.into(),
            value,
        }
    }

    /// `Receive` matching any value on `key`.
    pub fn receive(key: impl Into<String>) -> Self {
        Self::Receive {
            key: key.into(),
            predicate: None,
        }
    }

    pub fn receive_match(
        key: impl Into<String>,
        predicate: impl Fn(&Value) -> bool + 'static,
    ) -> Self {
        Self::Receive {
            key: key.into(),
            predicate: Some(Rc::new(predicate)),
        }
    }

    pub fn call(
        name: impl Into<String>,
        factory: impl Fn(Vec<Value>) -> BoxRoutine + 'static,
        args: Vec<Value>,
    ) -> Self {
        Self::Call(CallSpec::new(name, factory, args))
    }

    pub fn call_fork(
        name: impl Into<String>,
        factory: impl Fn(Vec<Value>) -> BoxRoutine + 'static,
        args: Vec<Value>,
    ) -> Self {
        Self::CallFork(CallSpec::new(name, factory, args))
    }

    pub fn fork(effect: Effect) -> Self {
        Self::Fork(Box::new(effect))
    }

    pub fn fork_all(effects: Vec<Effect>) -> Self {
        Self::ForkAll(effects)
    }

    /// Join one strand; result is its return value directly.
    pub fn join(handle: StrandHandle) -> Self {
        Self::Join {
            targets: vec![handle],
            single: true,
        }
    }

    /// Join several strands; result is the list of return values.
    pub fn join_all(handles: Vec<StrandHandle>) -> Self {
        Self::Join {
            targets: handles,
            single: false,
        }
    }

    pub fn cancel(handle: StrandHandle) -> Self {
        Self::Cancel(handle)
    }

    pub fn sleep(seconds: f64) -> Self {
        Self::Sleep(seconds)
    }

    pub fn sequence(effects: Vec<Effect>) -> Self {
        Self::Sequence(effects)
    }

    pub fn first(entries: Vec<Racer>) -> Self {
        Self::First(entries)
    }

    /// The variant name as a static string for diagnostics and logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Send { .. } => "Send",
            Self::Receive { .. } => "Receive",
            Self::Call(_) => "Call",
            Self::CallFork(_) => "CallFork",
            Self::Fork(_) => "Fork",
            Self::ForkAll(_) => "ForkAll",
            Self::Join { .. } => "Join",
            Self::Cancel(_) => "Cancel",
            Self::Sleep(_) => "Sleep",
            Self::Sequence(_) => "Sequence",
            Self::First(_) => "First",
        }
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Send { key, value } => write!(f, "Send({key:?}, {value})"),
            Self::Receive { key, predicate } => {
                if predicate.is_some() {
                    write!(f, "Receive({key:?}, <predicate>)")
                } else {
                    write!(f, "Receive({key:?})")
                }
            }
            Self::Call(spec) => write!(f, "Call({})", spec.name()),
            Self::CallFork(spec) => write!(f, "CallFork({})", spec.name()),
            Self::Fork(inner) => write!(f, "Fork({inner:?})"),
            Self::ForkAll(effects) => write!(f, "ForkAll(<{} effects>)", effects.len()),
            Self::Join { targets, .. } => {
                write!(f, "Join(")?;
                for (i, t) in targets.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", t.id())?;
                }
                write!(f, ")")
            }
            Self::Cancel(h) => write!(f, "Cancel({})", h.id()),
            Self::Sleep(secs) => write!(f, "Sleep({secs})"),
            Self::Sequence(effects) => write!(f, "Sequence(<{} effects>)", effects.len()),
            Self::First(entries) => write!(f, "First(<{} entries>)", entries.len()),
        }
    }
}
