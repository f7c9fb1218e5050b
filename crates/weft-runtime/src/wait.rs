//! The wait index: who is parked, on what, in what order.
//!
//! Keys identify wake events (a message key, a strand terminating); values
//! are insertion-ordered waiter lists. Strand ids, never references, flow
//! through here, so waiters can be cancelled mid-traversal without
//! invalidating anything. Each parked strand mirrors its registered keys on
//! its own record for exact-cost deregistration.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;

use weft_types::{Predicate, StrandHandle, StrandId};

/// What a parked strand will be woken by.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) enum WaitKey {
    /// A `Send` on this message key.
    Message(String),
    /// This strand reaching a terminal state.
    Done(StrandId),
}

/// The strand-side record of a park: everything the waker needs to decide
/// whether and how to resume it.
pub(crate) enum WaitState {
    /// Parked `Receive`; the predicate screens sent values.
    Message {
        key: String,
        predicate: Option<Predicate>,
    },
    /// Caller of an inline `Call`/`Sequence` sub-strand.
    Child { child: StrandId },
    /// `Join`: resumes once `pending` empties. `targets` keeps the original
    /// order and arity for assembling the result.
    Join {
        pending: Vec<StrandId>,
        targets: Vec<StrandHandle>,
        single: bool,
    },
    /// `First`: first entry to complete wins; the rest are cancelled.
    Race { entries: Vec<StrandId> },
    /// `Sleep(t > 0)`; the timer list holds the deadline.
    Timer { seconds: f64 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct TimerId(u64);

impl TimerId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }
}

pub(crate) struct TimerEntry {
    pub(crate) id: TimerId,
    pub(crate) strand: StrandId,
    pub(crate) fire_at: DateTime<Utc>,
}

/// Wake-key → insertion-ordered waiters.
#[derive(Default)]
pub(crate) struct WaitIndex {
    map: IndexMap<WaitKey, Vec<StrandId>>,
}

impl WaitIndex {
    pub(crate) fn register(&mut self, key: WaitKey, strand: StrandId) {
        self.map.entry(key).or_default().push(strand);
    }

    /// The current waiter list for `key`, oldest first.
    pub(crate) fn snapshot(&self, key: &WaitKey) -> Vec<StrandId> {
        self.map.get(key).cloned().unwrap_or_default()
    }

    /// Remove one registration of `strand` under `key`.
    pub(crate) fn unregister(&mut self, key: &WaitKey, strand: StrandId) {
        if let Some(list) = self.map.get_mut(key) {
            if let Some(pos) = list.iter().position(|s| *s == strand) {
                list.remove(pos);
            }
            if list.is_empty() {
                self.map.shift_remove(key);
            }
        }
    }

    /// Remove and return every waiter under `key`, oldest first.
    pub(crate) fn drain(&mut self, key: &WaitKey) -> Vec<StrandId> {
        self.map.shift_remove(key).unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn waiter_count(&self) -> usize {
        self.map.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(raw: u64) -> StrandId {
        StrandId::new(raw)
    }

    #[test]
    fn waiters_keep_insertion_order() {
        let mut index = WaitIndex::default();
        let key = WaitKey::Message("k".to_string());
        index.register(key.clone(), sid(3));
        index.register(key.clone(), sid(1));
        index.register(key.clone(), sid(2));

        similar_asserts::assert_eq!(index.snapshot(&key), vec![sid(3), sid(1), sid(2)]);
        similar_asserts::assert_eq!(index.drain(&key), vec![sid(3), sid(1), sid(2)]);
        assert!(index.snapshot(&key).is_empty());
    }

    #[test]
    fn unregister_removes_one_entry_and_empty_rows() {
        let mut index = WaitIndex::default();
        let key = WaitKey::Done(sid(9));
        index.register(key.clone(), sid(1));
        index.register(key.clone(), sid(2));

        index.unregister(&key, sid(1));
        similar_asserts::assert_eq!(index.snapshot(&key), vec![sid(2)]);

        index.unregister(&key, sid(2));
        assert_eq!(index.waiter_count(), 0);
    }

    #[test]
    fn keys_are_independent() {
        let mut index = WaitIndex::default();
        index.register(WaitKey::Message("a".to_string()), sid(1));
        index.register(WaitKey::Message("b".to_string()), sid(2));

        similar_asserts::assert_eq!(
            index.drain(&WaitKey::Message("a".to_string())),
            vec![sid(1)]
        );
        similar_asserts::assert_eq!(
            index.snapshot(&WaitKey::Message("b".to_string())),
            vec![sid(2)]
        );
    }
}
