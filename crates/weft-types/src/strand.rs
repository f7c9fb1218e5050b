use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a strand for the lifetime of one run.
///
/// Ids are dense `u64` counters minted by the scheduler; they are never
/// reused within a run, which makes them safe to keep across cancellation
/// (a stale id simply refers to a terminal strand).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StrandId(u64);

impl StrandId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw counter value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for StrandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// The caller-visible reference to a forked strand.
///
/// Handles are the only way one strand refers to another: they are what
/// `Fork`/`CallFork` produce and what `Join`, `Cancel` and `First` consume.
/// A handle stays valid after the strand terminates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StrandHandle {
    id: StrandId,
}

impl StrandHandle {
    pub fn new(id: StrandId) -> Self {
        Self { id }
    }

    pub fn id(&self) -> StrandId {
        self.id
    }
}

impl fmt::Display for StrandHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "strand({})", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_order_by_mint_sequence() {
        assert!(StrandId::new(1) < StrandId::new(2));
        assert_eq!(StrandId::new(7).raw(), 7);
    }

    #[test]
    fn display_forms() {
        insta::assert_snapshot!(StrandId::new(3).to_string(), @"s3");
        insta::assert_snapshot!(StrandHandle::new(StrandId::new(3)).to_string(), @"strand(s3)");
    }
}
