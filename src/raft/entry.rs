//! Lifecycle of entries appended by the leader.
//!
//! ```text
//! Closed -Submit-> Write -Written-> Append -Durable-> Commit -Replicated-> Committed
//!                    |                |                 |
//!                    +----------------+-----------------+--IoFailure/QuorumLost--> Failed
//! any -Close-> Closing
//! ```
//!
//! [`transition`] is a pure function; [`EntryTracker`] drives it for every
//! batch the leader appended and has not seen committed yet.

use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Closed,
    Write,
    Append,
    Commit,
    Committed,
    Failed,
    Closing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryEvent {
    Submit,
    Written,
    Durable,
    Replicated,
    IoFailure,
    QuorumLost,
    Close,
}

/// Next state of an entry. Events that do not apply leave the state as is.
pub fn transition(state: EntryState, event: EntryEvent) -> EntryState {
    use EntryEvent as E;
    use EntryState as S;
    match (state, event) {
        (_, E::Close) => S::Closing,
        (S::Closed, E::Submit) => S::Write,
        (S::Write, E::Written) => S::Append,
        (S::Append, E::Durable) => S::Commit,
        (S::Commit, E::Replicated) => S::Committed,
        (S::Write | S::Append | S::Commit, E::IoFailure | E::QuorumLost) => S::Failed,
        (state, _) => state,
    }
}

/// A batch appended by the leader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedEntry {
    pub first_position: i64,
    pub last_position: i64,
    pub state: EntryState,
}

/// Leader-side bookkeeping of uncommitted batches, in position order.
#[derive(Debug, Default)]
pub struct EntryTracker {
    entries: VecDeque<TrackedEntry>,
}

impl EntryTracker {
    /// Start tracking a batch that is about to be written.
    pub fn submit() -> EntryState {
        transition(EntryState::Closed, EntryEvent::Submit)
    }

    /// Record a batch that reached local durability.
    pub fn track(&mut self, first_position: i64, last_position: i64, state: EntryState) {
        self.entries.push_back(TrackedEntry {
            first_position,
            last_position,
            state,
        });
    }

    /// Mark batches up to `commit_position` committed and drop them.
    /// Returns how many completed.
    pub fn on_commit(&mut self, commit_position: i64) -> usize {
        let mut completed = 0;
        while let Some(front) = self.entries.front_mut() {
            if front.last_position > commit_position {
                break;
            }
            front.state = transition(front.state, EntryEvent::Replicated);
            if front.state == EntryState::Committed {
                completed += 1;
            }
            self.entries.pop_front();
        }
        completed
    }

    /// Close every tracked batch, e.g. on step-down. Returns how many were
    /// still in flight.
    pub fn close_all(&mut self) -> usize {
        let count = self.entries.len();
        for entry in self.entries.iter_mut() {
            entry.state = transition(entry.state, EntryEvent::Close);
        }
        self.entries.clear();
        count
    }

    pub fn in_flight(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_reaches_committed() {
        let mut state = EntryState::Closed;
        for event in [
            EntryEvent::Submit,
            EntryEvent::Written,
            EntryEvent::Durable,
            EntryEvent::Replicated,
        ] {
            state = transition(state, event);
        }
        assert_eq!(state, EntryState::Committed);
    }

    #[test]
    fn failures_only_from_in_flight_states() {
        assert_eq!(
            transition(EntryState::Append, EntryEvent::IoFailure),
            EntryState::Failed
        );
        assert_eq!(
            transition(EntryState::Commit, EntryEvent::QuorumLost),
            EntryState::Failed
        );
        assert_eq!(
            transition(EntryState::Committed, EntryEvent::IoFailure),
            EntryState::Committed
        );
        assert_eq!(
            transition(EntryState::Closed, EntryEvent::Written),
            EntryState::Closed
        );
    }

    #[test]
    fn close_is_reachable_from_anywhere() {
        for state in [
            EntryState::Closed,
            EntryState::Write,
            EntryState::Append,
            EntryState::Commit,
            EntryState::Committed,
            EntryState::Failed,
        ] {
            assert_eq!(transition(state, EntryEvent::Close), EntryState::Closing);
        }
    }

    #[test]
    fn tracker_completes_in_order() {
        let mut tracker = EntryTracker::default();
        tracker.track(1, 2, EntryState::Commit);
        tracker.track(3, 5, EntryState::Commit);
        assert_eq!(tracker.on_commit(4), 1);
        assert_eq!(tracker.in_flight(), 1);
        assert_eq!(tracker.on_commit(5), 1);
        assert_eq!(tracker.close_all(), 0);
    }
}
