//! Collection container: many event-sourced identities of one entity kind.

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;

use crate::entity::{self, Entity};
use crate::error::LedgerError;
use crate::event::{payload_object, BreakpointTag, Event, EventOptions};
use crate::history::{self, History};
use crate::singleton::claim_id;
use crate::transaction::{OpContext, Participant};

/// The stored side of a collection: one history per identity, plus the
/// staged tombstones of a pending transaction.
///
/// Identities deleted inside a transaction are tombstoned rather than
/// removed, so a rollback restores them untouched.
#[derive(Debug)]
pub(crate) struct EntityList {
    name: String,
    entries: IndexMap<String, History>,
    tombstones: IndexSet<String>,
}

impl EntityList {
    pub(crate) fn new(name: String) -> Self {
        Self {
            name,
            entries: IndexMap::new(),
            tombstones: IndexSet::new(),
        }
    }

    /// Whether `id` currently resolves (present and not tombstoned).
    pub(crate) fn exists(&self, id: &str) -> bool {
        self.entries.contains_key(id) && !self.tombstones.contains(id)
    }

    pub(crate) fn histories_mut(&mut self) -> impl Iterator<Item = &mut History> {
        self.entries.values_mut()
    }

    /// Commit staged events and apply staged tombstones.
    pub(crate) fn commit_staged(&mut self) {
        for history in self.entries.values_mut() {
            history.commit();
        }
        let removed: Vec<String> = self.tombstones.drain(..).collect();
        for id in removed {
            self.entries.shift_remove(&id);
        }
    }

    /// Discard staged events and tombstones.
    pub(crate) fn rollback_staged(&mut self) {
        for history in self.entries.values_mut() {
            history.rollback();
        }
        self.tombstones.clear();
    }

    /// Post-transaction pass: drop identities whose history ended up empty
    /// (created inside a rolled-back transaction).
    pub(crate) fn prune_empty(&mut self) {
        self.entries.retain(|_, history| history.len() > 0);
    }

    pub(crate) fn materialize_one(
        &self,
        id: &str,
        tag: Option<&BreakpointTag>,
    ) -> Result<Entity, LedgerError> {
        if !self.exists(id) {
            return Err(LedgerError::UnknownIdentifier { id: id.to_owned() });
        }
        let Some(history) = self.entries.get(id) else {
            return Err(LedgerError::UnknownIdentifier { id: id.to_owned() });
        };
        if let Some(tag) = tag {
            if !history.has_create_until(tag) {
                return Err(LedgerError::EntityNotYetCreated {
                    entity: self.name.clone(),
                });
            }
        }
        entity::materialize(&self.name, &history.events_until(tag))
    }

    /// Reconstruct every identity, skipping those that did not yet exist
    /// as of `tag`.
    pub(crate) fn materialize_all(
        &self,
        tag: Option<&BreakpointTag>,
    ) -> Result<Vec<Entity>, LedgerError> {
        let mut out = Vec::new();
        for (id, history) in &self.entries {
            if self.tombstones.contains(id) {
                continue;
            }
            if let Some(tag) = tag {
                if !history.has_create_until(tag) {
                    continue;
                }
            }
            out.push(entity::materialize(&self.name, &history.events_until(tag))?);
        }
        Ok(out)
    }

    pub(crate) fn serialize(&self) -> Vec<(String, Vec<Event>)> {
        self.entries
            .iter()
            .map(|(id, history)| (id.clone(), history.committed_events().to_vec()))
            .collect()
    }

    /// Install already-migrated per-identity event lists as committed
    /// state.
    pub(crate) fn load(&mut self, data: Vec<(String, Vec<Event>)>) -> Result<(), LedgerError> {
        if !self.entries.is_empty() {
            return Err(LedgerError::DeserializingOnNonEmptyLedger {
                container: self.name.clone(),
            });
        }
        for (id, events) in data {
            history::validate_loaded(&self.name, &events)?;
            self.entries.insert(id, History::from_committed(events));
        }
        Ok(())
    }
}

/// Borrowing handle for operating on a collection.
///
/// Obtained from [`Ledger::list`](crate::Ledger::list).
pub struct ListHandle<'a> {
    pub(crate) container: &'a mut EntityList,
    pub(crate) ctx: OpContext<'a>,
}

// Manual `Debug`: the context holds non-`Debug` capability trait objects.
impl std::fmt::Debug for ListHandle<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListHandle")
            .field("name", &self.name())
            .finish()
    }
}

impl ListHandle<'_> {
    /// The entity kind this container holds.
    pub fn name(&self) -> &str {
        &self.container.name
    }

    /// Whether an entity with this identity exists.
    pub fn has(&self, id: &str) -> bool {
        self.container.exists(id)
    }

    /// Whether uncommitted events or deletes are pending on this
    /// collection.
    pub fn is_transaction_pending(&self) -> bool {
        !self.container.tombstones.is_empty()
            || self
                .container
                .entries
                .values()
                .any(History::is_transaction_pending)
    }

    /// The identities currently in the collection, in insertion order.
    pub fn ids(&self) -> Vec<String> {
        self.container
            .entries
            .keys()
            .filter(|id| !self.container.tombstones.contains(*id))
            .cloned()
            .collect()
    }

    /// Create a new identity from its full initial payload.
    ///
    /// Every breakpoint recorded before this identity existed is replayed
    /// into the new history as a marker, so breakpoint-bounded reads over
    /// old and new identities stay consistent.
    ///
    /// # Errors
    ///
    /// [`LedgerError::DuplicateIdentifier`] if the identity is taken
    /// (including by a delete still pending in the open transaction);
    /// [`LedgerError::InvalidPayload`] if the payload is not a JSON object.
    pub fn create<T: Serialize>(
        &mut self,
        data: &T,
        options: EventOptions,
    ) -> Result<String, LedgerError> {
        let mut payload = payload_object(data)?;
        let id = claim_id(&mut payload, &mut self.ctx)?;

        if self.container.entries.contains_key(&id) {
            return Err(LedgerError::DuplicateIdentifier { id });
        }

        let mut history = History::new();
        let prior_tags: Vec<BreakpointTag> = self.ctx.breakpoints.tags().cloned().collect();
        for tag in prior_tags {
            history.add(Event::for_breakpoint(
                self.ctx.next_id(),
                self.ctx.now(),
                self.ctx.ledger_version,
                &self.container.name,
                tag,
            ));
        }
        history.add(Event::for_create(
            self.ctx.next_id(),
            self.ctx.now(),
            self.ctx.ledger_version,
            &self.container.name,
            &payload,
            options,
        ));
        self.container.entries.insert(id.clone(), history);
        self.finish();
        Ok(id)
    }

    /// Append a change event to an existing identity.
    ///
    /// # Errors
    ///
    /// [`LedgerError::UnknownIdentifier`] if the identity is absent;
    /// [`LedgerError::InvalidPayload`] if the payload is not a JSON object.
    pub fn change<T: Serialize>(
        &mut self,
        id: &str,
        data: &T,
        options: EventOptions,
    ) -> Result<(), LedgerError> {
        if !self.container.exists(id) {
            return Err(LedgerError::UnknownIdentifier { id: id.to_owned() });
        }

        let payload = payload_object(data)?;
        let event = Event::for_change(
            self.ctx.next_id(),
            self.ctx.now(),
            self.ctx.ledger_version,
            &self.container.name,
            &payload,
            options,
        );
        if let Some(history) = self.container.entries.get_mut(id) {
            history.add(event);
        }
        self.finish();
        Ok(())
    }

    /// Remove an identity and its entire history.
    ///
    /// Inside a transaction the removal is staged as a tombstone: reads no
    /// longer see the identity, but a rollback restores it.
    ///
    /// # Errors
    ///
    /// [`LedgerError::UnknownIdentifier`] if the identity is absent.
    pub fn delete(&mut self, id: &str) -> Result<(), LedgerError> {
        if !self.container.exists(id) {
            return Err(LedgerError::UnknownIdentifier { id: id.to_owned() });
        }
        match self.ctx.transaction.as_mut() {
            Some(tx) => {
                self.container.tombstones.insert(id.to_owned());
                tx.enlist(Participant::List(self.container.name.clone()));
            }
            None => {
                self.container.entries.shift_remove(id);
            }
        }
        tracing::debug!(entity = %self.container.name, %id, "entity deleted");
        Ok(())
    }

    /// Reconstruct one identity.
    pub fn get(&self, id: &str) -> Result<Entity, LedgerError> {
        self.container.materialize_one(id, None)
    }

    /// Reconstruct one identity as it was at a breakpoint.
    ///
    /// # Errors
    ///
    /// [`LedgerError::BreakpointDoesNotExist`] for unknown tags;
    /// [`LedgerError::EntityNotYetCreated`] if the identity's create event
    /// postdates the breakpoint.
    pub fn get_as_of(&self, id: &str, tag: &BreakpointTag) -> Result<Entity, LedgerError> {
        self.ctx.breakpoints.ensure_exists(tag)?;
        self.container.materialize_one(id, Some(tag))
    }

    /// Reconstruct every identity, in insertion order.
    pub fn get_all(&self) -> Result<Vec<Entity>, LedgerError> {
        self.container.materialize_all(None)
    }

    /// Reconstruct every identity that existed as of a breakpoint.
    pub fn get_all_as_of(&self, tag: &BreakpointTag) -> Result<Vec<Entity>, LedgerError> {
        self.ctx.breakpoints.ensure_exists(tag)?;
        self.container.materialize_all(Some(tag))
    }

    fn finish(&mut self) {
        self.ctx
            .stage_or(Participant::List(self.container.name.clone()), || {
                self.container.commit_staged();
                self.container.prune_empty();
            });
    }
}

#[cfg(test)]
mod tests {
    use crate::services::SequenceIds;
    use crate::{EventOptions, Ledger, ManualClock};
    use serde_json::json;
    use std::sync::Arc;

    fn ledger() -> Ledger {
        Ledger::builder("TestLedger", 1)
            .list("Item")
            .id_source(SequenceIds::new())
            .clock(Arc::new(ManualClock::new(1_000)))
            .build()
            .unwrap()
    }

    #[test]
    fn create_then_get_roundtrips() {
        let mut ledger = ledger();
        let mut items = ledger.list("Item").unwrap();

        let id = items
            .create(&json!({"id": "a", "bar": "one"}), EventOptions::default())
            .unwrap();
        assert_eq!(id, "a");
        assert!(items.has("a"));
        assert_eq!(items.get("a").unwrap().field("bar"), Some(&json!("one")));
    }

    #[test]
    fn generated_ids_come_from_the_id_source() {
        let mut ledger = ledger();
        let mut items = ledger.list("Item").unwrap();

        let id = items
            .create(&json!({"bar": "one"}), EventOptions::default())
            .unwrap();
        assert_eq!(id, "1");
        assert_eq!(items.get("1").unwrap().id, "1");
    }

    #[test]
    fn duplicate_identifier_is_rejected() {
        let mut ledger = ledger();
        let mut items = ledger.list("Item").unwrap();
        items
            .create(&json!({"id": "a"}), EventOptions::default())
            .unwrap();

        let err = items
            .create(&json!({"id": "a"}), EventOptions::default())
            .unwrap_err();
        assert_eq!(err.code(), "DUPLICATE_IDENTIFIER");
    }

    #[test]
    fn change_on_unknown_identifier_is_rejected() {
        let mut ledger = ledger();
        let mut items = ledger.list("Item").unwrap();

        let err = items
            .change("ghost", &json!({"bar": "x"}), EventOptions::default())
            .unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_IDENTIFIER");
    }

    #[test]
    fn get_all_returns_insertion_order() {
        let mut ledger = ledger();
        let mut items = ledger.list("Item").unwrap();
        items
            .create(&json!({"id": "b", "n": 1}), EventOptions::default())
            .unwrap();
        items
            .create(&json!({"id": "a", "n": 2}), EventOptions::default())
            .unwrap();

        let all = items.get_all().unwrap();
        assert_eq!(
            all.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(),
            vec!["b", "a"]
        );
    }

    #[test]
    fn breakpoint_bounds_get_all() {
        let mut ledger = ledger();
        ledger
            .list("Item")
            .unwrap()
            .create(&json!({"id": "A"}), EventOptions::default())
            .unwrap();
        ledger.add_breakpoint("bp1").unwrap();
        ledger
            .list("Item")
            .unwrap()
            .create(&json!({"id": "B"}), EventOptions::default())
            .unwrap();

        let items = ledger.list("Item").unwrap();
        let as_of: Vec<String> = items
            .get_all_as_of(&"bp1".into())
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(as_of, vec!["A"]);

        let now: Vec<String> = items
            .get_all()
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(now, vec!["A", "B"]);
    }

    #[test]
    fn get_as_of_rejects_identities_created_after_the_breakpoint() {
        let mut ledger = ledger();
        ledger
            .list("Item")
            .unwrap()
            .create(&json!({"id": "A"}), EventOptions::default())
            .unwrap();
        ledger.add_breakpoint("bp1").unwrap();
        ledger
            .list("Item")
            .unwrap()
            .create(&json!({"id": "B"}), EventOptions::default())
            .unwrap();

        let items = ledger.list("Item").unwrap();
        assert!(items.get_as_of("A", &"bp1".into()).is_ok());
        let err = items.get_as_of("B", &"bp1".into()).unwrap_err();
        assert_eq!(err.code(), "ENTITY_NOT_YET_CREATED");
    }

    #[test]
    fn unknown_breakpoint_is_rejected() {
        let mut ledger = ledger();
        let items = ledger.list("Item").unwrap();
        let err = items.get_all_as_of(&"ghost".into()).unwrap_err();
        assert_eq!(err.code(), "BREAKPOINT_DOES_NOT_EXIST");
    }

    #[test]
    fn create_inside_a_rolled_back_transaction_is_pruned() {
        let mut ledger = ledger();

        ledger.start_transaction().unwrap();
        {
            let mut items = ledger.list("Item").unwrap();
            items
                .create(&json!({"id": "tmp"}), EventOptions::default())
                .unwrap();
            assert!(items.has("tmp"));
        }
        ledger.rollback_transaction();

        let items = ledger.list("Item").unwrap();
        assert!(!items.has("tmp"));
        assert!(items.ids().is_empty());
    }

    #[test]
    fn delete_is_immediate_outside_a_transaction() {
        let mut ledger = ledger();
        let mut items = ledger.list("Item").unwrap();
        items
            .create(&json!({"id": "a"}), EventOptions::default())
            .unwrap();

        items.delete("a").unwrap();
        assert!(!items.has("a"));
        assert_eq!(items.delete("a").unwrap_err().code(), "UNKNOWN_IDENTIFIER");
    }

    #[test]
    fn staged_delete_reverts_on_rollback_and_holds_on_commit() {
        let mut ledger = ledger();
        ledger
            .list("Item")
            .unwrap()
            .create(&json!({"id": "a", "n": 1}), EventOptions::default())
            .unwrap();

        ledger.start_transaction().unwrap();
        {
            let mut items = ledger.list("Item").unwrap();
            items.delete("a").unwrap();
            assert!(!items.has("a"));
            assert!(items.get_all().unwrap().is_empty());
        }
        ledger.rollback_transaction();
        assert!(ledger.list("Item").unwrap().has("a"));

        ledger.start_transaction().unwrap();
        ledger.list("Item").unwrap().delete("a").unwrap();
        ledger.commit_transaction();
        assert!(!ledger.list("Item").unwrap().has("a"));
    }

    #[test]
    fn create_over_a_pending_delete_is_rejected() {
        let mut ledger = ledger();
        ledger
            .list("Item")
            .unwrap()
            .create(&json!({"id": "a"}), EventOptions::default())
            .unwrap();

        ledger.start_transaction().unwrap();
        let mut items = ledger.list("Item").unwrap();
        items.delete("a").unwrap();
        let err = items
            .create(&json!({"id": "a"}), EventOptions::default())
            .unwrap_err();
        assert_eq!(err.code(), "DUPLICATE_IDENTIFIER");
        ledger.rollback_transaction();
    }

    #[test]
    fn changes_inside_a_transaction_are_visible_then_revert() {
        let mut ledger = ledger();
        ledger
            .list("Item")
            .unwrap()
            .create(&json!({"id": "a", "bar": "one"}), EventOptions::default())
            .unwrap();

        ledger.start_transaction().unwrap();
        {
            let mut items = ledger.list("Item").unwrap();
            items
                .change("a", &json!({"bar": "two"}), EventOptions::default())
                .unwrap();
            assert!(items.is_transaction_pending());
            assert_eq!(items.get("a").unwrap().field("bar"), Some(&json!("two")));
        }
        ledger.rollback_transaction();

        let items = ledger.list("Item").unwrap();
        assert_eq!(items.get("a").unwrap().field("bar"), Some(&json!("one")));
    }
}
