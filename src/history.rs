//! Per-identity append-only event log with committed/staged partitions.

use crate::error::LedgerError;
use crate::event::{BreakpointTag, Event, EventKind};

/// The ordered event sequence for one identity.
///
/// Events land in the `staged` partition first. Outside a transaction the
/// owning container commits immediately; inside one, the staged partition
/// survives until the transaction resolves. Reads always observe committed
/// followed by staged, so an open transaction sees its own writes.
#[derive(Debug, Clone, Default)]
pub(crate) struct History {
    committed: Vec<Event>,
    staged: Vec<Event>,
}

impl History {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Build a history whose events are already committed, bypassing the
    /// staging path. Used by deserialization only.
    pub(crate) fn from_committed(events: Vec<Event>) -> Self {
        Self {
            committed: events,
            staged: Vec::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.committed.len() + self.staged.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.committed.is_empty() && self.staged.is_empty()
    }

    /// Append an event to the staged partition.
    pub(crate) fn add(&mut self, event: Event) {
        self.staged.push(event);
    }

    /// Move every staged event into the committed partition.
    pub(crate) fn commit(&mut self) {
        self.committed.append(&mut self.staged);
    }

    /// Discard every staged event.
    pub(crate) fn rollback(&mut self) {
        self.staged.clear();
    }

    /// Whether uncommitted events are pending on this history.
    pub(crate) fn is_transaction_pending(&self) -> bool {
        !self.staged.is_empty()
    }

    pub(crate) fn first(&self) -> Option<&Event> {
        self.committed.first().or_else(|| self.staged.first())
    }

    /// Committed events only; staged state must never reach a durable form.
    pub(crate) fn committed_events(&self) -> &[Event] {
        &self.committed
    }

    /// All events in replay order, or -- when `tag` is given -- the prefix
    /// up to (and excluding) the first event carrying that breakpoint tag.
    ///
    /// A history that does not contain the marker yields its full event
    /// list; the caller is responsible for validating that the tag exists
    /// on the ledger at all.
    pub(crate) fn events_until(&self, tag: Option<&BreakpointTag>) -> Vec<&Event> {
        let all = self.committed.iter().chain(self.staged.iter());
        match tag {
            Some(tag) => all
                .take_while(|e| e.metadata.breakpoint.as_ref() != Some(tag))
                .collect(),
            None => all.collect(),
        }
    }

    /// Whether the identity existed as of the given breakpoint.
    pub(crate) fn has_create_until(&self, tag: &BreakpointTag) -> bool {
        self.events_until(Some(tag))
            .iter()
            .any(|e| e.metadata.kind == EventKind::Create)
    }
}

/// Validate a loaded event sequence for one identity: every event must be
/// tagged with the container's entity kind, and the first non-breakpoint
/// event must be the single CREATE.
pub(crate) fn validate_loaded(entity: &str, events: &[Event]) -> Result<(), LedgerError> {
    let mut seen_create = false;
    for event in events {
        if event.metadata.entity != entity {
            return Err(LedgerError::EventAssociation {
                expected: entity.to_owned(),
                found: event.metadata.entity.clone(),
            });
        }
        match event.metadata.kind {
            EventKind::Breakpoint => {}
            EventKind::Create => {
                if seen_create {
                    return Err(LedgerError::CorruptedEventOrder {
                        entity: entity.to_owned(),
                    });
                }
                seen_create = true;
            }
            EventKind::Change => {
                if !seen_create {
                    return Err(LedgerError::CorruptedEventOrder {
                        entity: entity.to_owned(),
                    });
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventOptions;
    use serde_json::json;

    fn create_event(id: &str, timestamp: u64) -> Event {
        Event::for_create(
            id.to_owned(),
            timestamp,
            1,
            "Thing",
            json!({"id": "t-1", "v": 1}).as_object().unwrap(),
            EventOptions::default(),
        )
    }

    fn change_event(id: &str, timestamp: u64) -> Event {
        Event::for_change(
            id.to_owned(),
            timestamp,
            1,
            "Thing",
            json!({"v": 2}).as_object().unwrap(),
            EventOptions::default(),
        )
    }

    fn marker(id: &str, timestamp: u64, tag: &str) -> Event {
        Event::for_breakpoint(id.to_owned(), timestamp, 1, "Thing", tag.into())
    }

    #[test]
    fn add_then_commit_moves_events_to_committed() {
        let mut history = History::new();
        history.add(create_event("e1", 1));
        assert!(history.is_transaction_pending());
        assert_eq!(history.committed_events().len(), 0);
        assert_eq!(history.len(), 1);

        history.commit();
        assert!(!history.is_transaction_pending());
        assert_eq!(history.committed_events().len(), 1);
    }

    #[test]
    fn rollback_discards_only_staged_events() {
        let mut history = History::new();
        history.add(create_event("e1", 1));
        history.commit();
        history.add(change_event("e2", 2));

        history.rollback();
        assert_eq!(history.len(), 1);
        assert_eq!(history.committed_events().len(), 1);
    }

    #[test]
    fn reads_merge_staged_over_committed() {
        let mut history = History::new();
        history.add(create_event("e1", 1));
        history.commit();
        history.add(change_event("e2", 2));

        let events: Vec<_> = history.events_until(None);
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].id, "e2");
    }

    #[test]
    fn events_until_excludes_the_marker_itself() {
        let mut history = History::new();
        history.add(create_event("e1", 1));
        history.add(change_event("e2", 2));
        history.add(marker("e3", 3, "bp1"));
        history.add(change_event("e4", 4));
        history.commit();

        let tag = BreakpointTag::from("bp1");
        let events = history.events_until(Some(&tag));
        assert_eq!(
            events.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(),
            vec!["e1", "e2"]
        );
    }

    #[test]
    fn events_until_unknown_marker_returns_everything() {
        let mut history = History::new();
        history.add(create_event("e1", 1));
        history.commit();

        let tag = BreakpointTag::from("later");
        assert_eq!(history.events_until(Some(&tag)).len(), 1);
    }

    #[test]
    fn has_create_until_reports_existence_as_of_a_marker() {
        let mut history = History::new();
        history.add(marker("e1", 1, "bp1"));
        history.add(create_event("e2", 2));
        history.commit();

        assert!(!history.has_create_until(&"bp1".into()));
        assert!(history.has_create_until(&"bp2".into()));
    }

    #[test]
    fn validate_loaded_accepts_markers_before_create() {
        let events = vec![marker("e1", 1, "bp1"), create_event("e2", 2), change_event("e3", 3)];
        assert!(validate_loaded("Thing", &events).is_ok());
    }

    #[test]
    fn validate_loaded_rejects_change_before_create() {
        let events = vec![change_event("e1", 1)];
        let err = validate_loaded("Thing", &events).unwrap_err();
        assert_eq!(err.code(), "CORRUPTED_EVENT_ORDER");
    }

    #[test]
    fn validate_loaded_rejects_a_second_create() {
        let events = vec![create_event("e1", 1), create_event("e2", 2)];
        let err = validate_loaded("Thing", &events).unwrap_err();
        assert_eq!(err.code(), "CORRUPTED_EVENT_ORDER");
    }

    #[test]
    fn validate_loaded_rejects_foreign_entity_tags() {
        let events = vec![create_event("e1", 1)];
        let err = validate_loaded("Other", &events).unwrap_err();
        assert_eq!(err.code(), "EVENT_ASSOCIATION_ERROR");
    }
}
