use weft_types::{BoxRoutine, StrandId, StrandStatus, Value, WeftError};

use crate::wait::{WaitKey, WaitState};

/// Terminal result of a strand. Immutable once set.
#[derive(Clone, Debug)]
pub(crate) enum Outcome {
    Done(Value),
    Failed(WeftError),
    Cancelled,
}

/// Runtime record for one strand.
///
/// The routine slot is taken out for the duration of a resume and put back
/// afterwards; terminal strands drop their routine so only bookkeeping
/// survives.
pub(crate) struct Strand {
    pub(crate) id: StrandId,
    pub(crate) name: String,
    pub(crate) routine: Option<BoxRoutine>,
    pub(crate) status: StrandStatus,
    pub(crate) wait: Option<WaitState>,
    /// Input for the next resume; set when the strand is woken.
    pub(crate) resume_with: Option<Value>,
    pub(crate) outcome: Option<Outcome>,
    /// Strands this one spawned, for cancel propagation. Ids only.
    pub(crate) children: Vec<StrandId>,
    /// Mirror of this strand's wait-index registrations.
    pub(crate) registrations: Vec<WaitKey>,
}

impl Strand {
    pub(crate) fn new(id: StrandId, name: String, routine: BoxRoutine) -> Self {
        Self {
            id,
            name,
            routine: Some(routine),
            status: StrandStatus::Ready,
            wait: None,
            resume_with: None,
            outcome: None,
            children: Vec::new(),
            registrations: Vec::new(),
        }
    }

    pub(crate) fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
