use std::rc::Rc;

use weft_types::{Routine, Value, WeftError};

use crate::clock::{Clock, SystemClock};
use crate::scheduler::Scheduler;

/// Embedding entry point: holds the run configuration (currently just the
/// time source) and launches root strands.
///
/// The runtime is single-threaded and cooperative by construction; nothing
/// here is `Send`, and a `run` call occupies the calling thread until the
/// run reaches quiescence.
pub struct Runtime {
    clock: Rc<dyn Clock>,
}

impl Runtime {
    /// Runtime on the wall clock.
    pub fn new() -> Self {
        Self {
            clock: Rc::new(SystemClock),
        }
    }

    /// Runtime on a caller-supplied time source (deterministic tests,
    /// simulations).
    pub fn with_clock(clock: Rc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Launch `root` and block until the run reaches quiescence.
    ///
    /// Returns the root strand's value; every runtime-detected failure and
    /// every failure raised in any strand surfaces here as a [`WeftError`].
    pub fn run(&self, root: impl Routine + 'static) -> Result<Value, WeftError> {
        let mut scheduler = Scheduler::new(Rc::clone(&self.clock), Box::new(root));
        scheduler.run_to_completion()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

/// Run `root` to completion on the system clock.
pub fn run(root: impl Routine + 'static) -> Result<Value, WeftError> {
    Runtime::new().run(root)
}
