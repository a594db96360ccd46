//! Batcher lifecycle states and the legal transitions between them.
//!
//! States only move forward in declaration order, with the exception that
//! `Aborted` is reachable from every non-terminal state. A batch in which no
//! operation survived lookup still walks through every state, it just sends
//! zero calls.

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BatcherState {
    /// Operations are being added; nothing has been looked up yet.
    Gathering,
    /// Flush was requested; waiting for every tablet lookup to call back.
    ResolvingTablets,
    /// Waiting for the attached transaction to become ready for this batch.
    TransactionPrepare,
    /// Calls are in flight.
    TransactionReady,
    Complete,
    Aborted,
}

impl BatcherState {
    pub fn is_terminal(self) -> bool {
        matches!(self, BatcherState::Complete | BatcherState::Aborted)
    }

    /// Transition table.
    pub fn can_transition_to(self, next: BatcherState) -> bool {
        use BatcherState::*;
        match (self, next) {
            (Complete | Aborted, _) => false,
            (_, Aborted) => true,
            (Gathering, ResolvingTablets) => true,
            (ResolvingTablets, TransactionPrepare) => true,
            (TransactionPrepare, TransactionReady) => true,
            (TransactionReady, Complete) => true,
            _ => false,
        }
    }
}

impl fmt::Display for BatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BatcherState::Gathering => "gathering",
            BatcherState::ResolvingTablets => "resolving_tablets",
            BatcherState::TransactionPrepare => "transaction_prepare",
            BatcherState::TransactionReady => "transaction_ready",
            BatcherState::Complete => "complete",
            BatcherState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::BatcherState::*;
    use super::*;

    const ALL: [BatcherState; 6] = [
        Gathering,
        ResolvingTablets,
        TransactionPrepare,
        TransactionReady,
        Complete,
        Aborted,
    ];

    #[test]
    fn forward_path_is_legal() {
        assert!(Gathering.can_transition_to(ResolvingTablets));
        assert!(ResolvingTablets.can_transition_to(TransactionPrepare));
        assert!(TransactionPrepare.can_transition_to(TransactionReady));
        assert!(TransactionReady.can_transition_to(Complete));
    }

    #[test]
    fn abort_reachable_from_every_non_terminal_state() {
        for state in ALL {
            assert_eq!(state.can_transition_to(Aborted), !state.is_terminal(), "{state}");
        }
    }

    #[test]
    fn no_state_is_revisited() {
        for from in ALL {
            for to in ALL {
                if to <= from && to != Aborted {
                    assert!(!from.can_transition_to(to), "{from} -> {to}");
                }
            }
        }
        assert!(!Gathering.can_transition_to(TransactionReady));
        assert!(!Complete.can_transition_to(Aborted));
    }
}
