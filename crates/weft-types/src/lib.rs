pub mod effect;
pub mod error;
pub mod routine;
pub mod status;
pub mod strand;
pub mod value;

pub use effect::{CallSpec, Effect, Predicate, Racer};
pub use error::{ErrorKind, WeftError};
pub use routine::{BoxRoutine, Routine, Step};
pub use status::StrandStatus;
pub use strand::{StrandHandle, StrandId};
pub use value::Value;
