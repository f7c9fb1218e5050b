//! Synchronization primitives built purely out of effects.
//!
//! Nothing in this crate talks to the scheduler: a `Lock` or `Queue` is
//! ordinary strand-owned state plus `Call`/`Send`/`Receive` effects, and the
//! runtime appears only in the dev-dependencies. Contended operations use a
//! compete-on-wake protocol: a releaser (or producer/consumer) broadcasts a
//! generation-stamped handoff on the primitive's private message key, every
//! waiter parked against that generation wakes, re-enters the protocol in
//! FIFO order, the first finds the resource available and takes it, and the
//! rest re-park against the next generation. Waiters that were cancelled
//! while parked simply drop out of the compete set, so handoff stays live.

pub mod lock;
pub mod queue;

pub use lock::Lock;
pub use queue::Queue;
