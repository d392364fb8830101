//! Copy-list container: plain records with transactional visibility.
//!
//! Copies are not event-sourced -- `put` overwrites wholesale and no
//! history or migration applies. They exist for externally-owned records
//! that still need to take part in all-or-nothing batches, which they do
//! through whole-map copy-on-write staging.

use indexmap::IndexMap;
use serde::Serialize;

use crate::entity::Copy;
use crate::error::LedgerError;
use crate::transaction::{OpContext, Participant};

/// The stored side of a copy-list: the committed map, and the staged map
/// cloned from it on the first write inside a transaction.
#[derive(Debug)]
pub(crate) struct CopyList {
    name: String,
    committed: IndexMap<String, Copy>,
    staged: Option<IndexMap<String, Copy>>,
}

impl CopyList {
    pub(crate) fn new(name: String) -> Self {
        Self {
            name,
            committed: IndexMap::new(),
            staged: None,
        }
    }

    /// The map reads observe: staged if present, else committed.
    pub(crate) fn view(&self) -> &IndexMap<String, Copy> {
        self.staged.as_ref().unwrap_or(&self.committed)
    }

    pub(crate) fn commit(&mut self) {
        if let Some(staged) = self.staged.take() {
            self.committed = staged;
        }
    }

    pub(crate) fn rollback(&mut self) {
        self.staged = None;
    }

    pub(crate) fn is_transaction_pending(&self) -> bool {
        self.staged.is_some()
    }

    pub(crate) fn serialize(&self) -> Vec<Copy> {
        self.committed.values().cloned().collect()
    }

    /// Install deserialized records as committed state.
    pub(crate) fn load(&mut self, copies: Vec<Copy>) -> Result<(), LedgerError> {
        if !self.committed.is_empty() {
            return Err(LedgerError::DeserializingOnNonEmptyLedger {
                container: self.name.clone(),
            });
        }
        for copy in copies {
            self.committed.insert(copy.id.clone(), copy);
        }
        Ok(())
    }
}

/// Borrowing handle for operating on a copy-list.
///
/// Obtained from [`Ledger::copies`](crate::Ledger::copies).
pub struct CopyListHandle<'a> {
    pub(crate) container: &'a mut CopyList,
    pub(crate) ctx: OpContext<'a>,
}

// Manual `Debug`: the context holds non-`Debug` capability trait objects.
impl std::fmt::Debug for CopyListHandle<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CopyListHandle")
            .field("name", &self.name())
            .finish()
    }
}

impl CopyListHandle<'_> {
    /// This container's name.
    pub fn name(&self) -> &str {
        &self.container.name
    }

    /// Whether a record with this identity is present.
    pub fn has(&self, id: &str) -> bool {
        self.container.view().contains_key(id)
    }

    /// Whether uncommitted changes are pending on this copy-list.
    pub fn is_transaction_pending(&self) -> bool {
        self.container.is_transaction_pending()
    }

    /// Insert or overwrite a record.
    ///
    /// # Errors
    ///
    /// [`LedgerError::InvalidPayload`] if the record is not a JSON object
    /// or lacks a string `id` field.
    pub fn put<T: Serialize>(&mut self, record: &T) -> Result<String, LedgerError> {
        let copy = Copy::from_payload(record)?;
        let id = copy.id.clone();
        self.write(|map| {
            map.insert(copy.id.clone(), copy);
        });
        Ok(id)
    }

    /// The record with this identity, if present.
    pub fn get(&self, id: &str) -> Option<Copy> {
        self.container.view().get(id).cloned()
    }

    /// Every record, in insertion order.
    pub fn get_all(&self) -> Vec<Copy> {
        self.container.view().values().cloned().collect()
    }

    /// Remove a record. Returns whether it was present.
    pub fn delete(&mut self, id: &str) -> bool {
        self.write(|map| map.shift_remove(id).is_some())
    }

    /// Run a mutation against the staged map (cloning committed state on
    /// the first write of the transaction) or directly against committed
    /// state when no transaction is open.
    fn write<R>(&mut self, action: impl FnOnce(&mut IndexMap<String, Copy>) -> R) -> R {
        match self.ctx.transaction.as_mut() {
            Some(tx) => {
                tx.enlist(Participant::Copies(self.container.name.clone()));
                let staged = self
                    .container
                    .staged
                    .get_or_insert_with(|| self.container.committed.clone());
                action(staged)
            }
            None => action(&mut self.container.committed),
        }
    }
}
