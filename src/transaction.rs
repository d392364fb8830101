//! Transaction state and the per-operation context handed to containers.

use indexmap::IndexSet;

use crate::breakpoint::BreakpointController;
use crate::event::Timestamp;
use crate::services::{Clock, IdSource};

/// Identifies a container enlisted in the open transaction.
///
/// The ledger dispatches commit/rollback to enlisted containers by key, in
/// enlistment order, which keeps containers free of callbacks into the
/// transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Participant {
    /// A singleton container, by name.
    Singleton(String),
    /// A collection container, by name.
    List(String),
    /// A copy-list container, by name.
    Copies(String),
}

/// An open transaction: the set of containers holding staged state.
///
/// The two-state machine (idle/open) lives on the ledger as
/// `Option<Transaction>`; this type only exists while a transaction is
/// open. Containers enlist themselves on their first mutation; enlistment
/// is idempotent.
#[derive(Debug, Default)]
pub(crate) struct Transaction {
    participants: IndexSet<Participant>,
}

impl Transaction {
    pub(crate) fn enlist(&mut self, participant: Participant) {
        self.participants.insert(participant);
    }

    /// Consume the transaction, yielding participants in enlistment order.
    pub(crate) fn into_participants(self) -> impl Iterator<Item = Participant> {
        self.participants.into_iter()
    }
}

/// Everything a container operation needs from the ledger: the transaction
/// slot, the breakpoint log (read-only), the injected capabilities, and the
/// current schema version.
///
/// Handed out by the ledger together with a mutable borrow of the target
/// container, so container code never reaches back into the ledger.
pub(crate) struct OpContext<'a> {
    pub(crate) transaction: &'a mut Option<Transaction>,
    pub(crate) breakpoints: &'a BreakpointController,
    pub(crate) ids: &'a mut dyn IdSource,
    pub(crate) clock: &'a dyn Clock,
    pub(crate) ledger_version: u32,
}

impl OpContext<'_> {
    pub(crate) fn next_id(&mut self) -> String {
        self.ids.next_id()
    }

    pub(crate) fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Enlist `participant` if a transaction is open, otherwise run
    /// `commit_now` against the container's committed state.
    pub(crate) fn stage_or(&mut self, participant: Participant, commit_now: impl FnOnce()) {
        match self.transaction.as_mut() {
            Some(tx) => tx.enlist(participant),
            None => commit_now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enlistment_is_idempotent_and_ordered() {
        let mut tx = Transaction::default();
        tx.enlist(Participant::List("contacts".to_owned()));
        tx.enlist(Participant::Singleton("settings".to_owned()));
        tx.enlist(Participant::List("contacts".to_owned()));

        let participants: Vec<_> = tx.into_participants().collect();
        assert_eq!(
            participants,
            vec![
                Participant::List("contacts".to_owned()),
                Participant::Singleton("settings".to_owned()),
            ]
        );
    }
}
