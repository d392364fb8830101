//! Immutable diff events and the metadata stamped on them.
//!
//! An [`Event`] couples a set of [`ChangeInstruction`]s with the metadata
//! needed to replay, audit, and migrate it: timestamp, kind, entity tag,
//! and the ledger schema version it was written under. The in-memory form
//! is the serialized form, so histories round-trip verbatim.

use serde::{Deserialize, Serialize};
use serde::ser::Error as _;
use serde_json::{Map, Value};

use crate::diff::{self, ChangeInstruction};
use crate::error::LedgerError;

/// Milliseconds since the Unix epoch, as produced by
/// [`Clock::now`](crate::Clock::now).
pub type Timestamp = u64;

/// The three event kinds a history can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    /// First event of an identity; carries the full initial payload.
    Create,
    /// A partial update to an existing identity.
    Change,
    /// A point-in-time marker injected by the breakpoint controller.
    /// Never mutates state when applied.
    Breakpoint,
}

/// A breakpoint identifier: a caller-chosen name or number.
///
/// Serialized untagged, so tags appear on the wire as bare JSON strings or
/// numbers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BreakpointTag {
    /// A numeric tag.
    Number(i64),
    /// A named tag.
    Text(String),
}

impl From<&str> for BreakpointTag {
    fn from(tag: &str) -> Self {
        Self::Text(tag.to_owned())
    }
}

impl From<String> for BreakpointTag {
    fn from(tag: String) -> Self {
        Self::Text(tag)
    }
}

impl From<i64> for BreakpointTag {
    fn from(tag: i64) -> Self {
        Self::Number(tag)
    }
}

impl From<i32> for BreakpointTag {
    fn from(tag: i32) -> Self {
        Self::Number(tag.into())
    }
}

impl std::fmt::Display for BreakpointTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Caller-side metadata attached to a create or change operation.
///
/// Carries audit-trail information without polluting the domain payload.
/// Fields are stamped verbatim onto the resulting event's metadata.
///
/// # Examples
///
/// ```
/// use ledgerfold::EventOptions;
/// use serde_json::json;
///
/// let opts = EventOptions::default()
///     .with_trigger("import-job")
///     .with_extra(json!({"source": "csv"}));
///
/// assert_eq!(opts.trigger.as_deref(), Some("import-job"));
/// assert!(opts.extra.is_some());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventOptions {
    /// What caused this operation (e.g. a workflow or job name).
    pub trigger: Option<String>,
    /// Arbitrary metadata forwarded onto the event.
    pub extra: Option<Value>,
}

impl EventOptions {
    /// Set the trigger label.
    pub fn with_trigger(mut self, trigger: impl Into<String>) -> Self {
        self.trigger = Some(trigger.into());
        self
    }

    /// Set arbitrary extra metadata.
    pub fn with_extra(mut self, extra: Value) -> Self {
        self.extra = Some(extra);
        self
    }
}

/// Metadata stamped on every event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    /// When the event was recorded.
    pub timestamp: Timestamp,
    /// Create, change, or breakpoint marker.
    pub kind: EventKind,
    /// Entity kind this event belongs to; must match its container.
    pub entity: String,
    /// Ledger schema version the event was written under.
    pub ledger_version: u32,
    /// Tag carried by breakpoint markers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakpoint: Option<BreakpointTag>,
    /// What caused this event, if the caller said so.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
    /// Arbitrary caller metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
    /// `"{from}:{to}"` entries recorded by the migration controller, in
    /// application order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub applied_migrations: Vec<String>,
}

/// An immutable unit of recorded change.
///
/// Events are only ever appended to a history; once committed they are
/// never edited. The struct serializes directly as the wire representation
/// described by the ledger's serialized form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier (not the entity identity).
    pub id: String,
    /// The diff this event applies.
    pub instructions: Vec<ChangeInstruction>,
    /// Timestamp, kind, entity tag, schema version, and audit fields.
    pub metadata: EventMetadata,
}

/// Top-level payload fields excluded from create diffs: structural, not
/// domain data. `id` stays -- the create event is the durable record of
/// the identity.
const CREATE_EXCLUDED: &[&str] = &["name", "createdAt", "updatedAt"];

/// Change diffs additionally exclude `id`: identity is immutable after
/// create.
const CHANGE_EXCLUDED: &[&str] = &["id", "name", "createdAt", "updatedAt"];

impl Event {
    /// Build the first event of an identity from its full initial payload.
    pub(crate) fn for_create(
        id: String,
        timestamp: Timestamp,
        ledger_version: u32,
        entity: &str,
        payload: &Map<String, Value>,
        options: EventOptions,
    ) -> Self {
        Self {
            id,
            instructions: instructions_for(payload, CREATE_EXCLUDED),
            metadata: EventMetadata {
                timestamp,
                kind: EventKind::Create,
                entity: entity.to_owned(),
                ledger_version,
                breakpoint: None,
                trigger: options.trigger,
                extra: options.extra,
                applied_migrations: Vec::new(),
            },
        }
    }

    /// Build a partial-update event from a change payload.
    pub(crate) fn for_change(
        id: String,
        timestamp: Timestamp,
        ledger_version: u32,
        entity: &str,
        payload: &Map<String, Value>,
        options: EventOptions,
    ) -> Self {
        Self {
            id,
            instructions: instructions_for(payload, CHANGE_EXCLUDED),
            metadata: EventMetadata {
                timestamp,
                kind: EventKind::Change,
                entity: entity.to_owned(),
                ledger_version,
                breakpoint: None,
                trigger: options.trigger,
                extra: options.extra,
                applied_migrations: Vec::new(),
            },
        }
    }

    /// Build a breakpoint marker. Markers carry no instructions.
    pub(crate) fn for_breakpoint(
        id: String,
        timestamp: Timestamp,
        ledger_version: u32,
        entity: &str,
        tag: BreakpointTag,
    ) -> Self {
        Self {
            id,
            instructions: Vec::new(),
            metadata: EventMetadata {
                timestamp,
                kind: EventKind::Breakpoint,
                entity: entity.to_owned(),
                ledger_version,
                breakpoint: Some(tag),
                trigger: None,
                extra: None,
                applied_migrations: Vec::new(),
            },
        }
    }

    /// Replay this event onto `target`. Breakpoint markers never mutate
    /// state.
    pub fn apply_to(&self, target: &mut Value) {
        if self.metadata.kind == EventKind::Breakpoint {
            return;
        }
        diff::apply_instructions(&self.instructions, target);
    }

    /// Whether this event is a breakpoint marker.
    pub fn is_breakpoint(&self) -> bool {
        self.metadata.kind == EventKind::Breakpoint
    }
}

fn instructions_for(payload: &Map<String, Value>, excluded: &[&str]) -> Vec<ChangeInstruction> {
    let mut trimmed = payload.clone();
    for key in excluded {
        trimmed.remove(*key);
    }
    diff::extract_instructions(&Value::Object(trimmed))
}

/// Encode a typed payload as a JSON object map.
///
/// Container operations accept any `Serialize` payload; this is where a
/// payload that does not serialize to a JSON object is rejected.
pub(crate) fn payload_object<T: Serialize>(data: &T) -> Result<Map<String, Value>, LedgerError> {
    match serde_json::to_value(data)? {
        Value::Object(map) => Ok(map),
        other => Err(LedgerError::InvalidPayload(serde_json::Error::custom(
            format!("expected a JSON object payload, got {other}"),
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn paths(event: &Event) -> Vec<Vec<crate::diff::PathSegment>> {
        event
            .instructions
            .iter()
            .map(|i| i.property_path.clone())
            .collect()
    }

    #[test]
    fn create_keeps_id_but_strips_derived_fields() {
        let event = Event::for_create(
            "ev-1".to_owned(),
            10,
            1,
            "Contact",
            &payload(json!({
                "id": "c-1",
                "name": "Contact",
                "createdAt": 99,
                "updatedAt": 99,
                "email": "a@b.c"
            })),
            EventOptions::default(),
        );

        let recorded = paths(&event);
        assert!(recorded.contains(&vec!["id".into()]));
        assert!(recorded.contains(&vec!["email".into()]));
        assert!(!recorded.contains(&vec!["name".into()]));
        assert!(!recorded.contains(&vec!["createdAt".into()]));
        assert!(!recorded.contains(&vec!["updatedAt".into()]));
    }

    #[test]
    fn change_strips_id_as_well() {
        let event = Event::for_change(
            "ev-2".to_owned(),
            20,
            1,
            "Contact",
            &payload(json!({"id": "c-1", "email": "new@b.c"})),
            EventOptions::default(),
        );

        let recorded = paths(&event);
        assert!(!recorded.contains(&vec!["id".into()]));
        assert!(recorded.contains(&vec!["email".into()]));
    }

    #[test]
    fn breakpoint_marker_does_not_mutate_state() {
        let event = Event::for_breakpoint("ev-3".to_owned(), 30, 1, "Contact", "bp1".into());
        assert!(event.is_breakpoint());
        assert!(event.instructions.is_empty());

        let mut state = json!({"email": "a@b.c"});
        event.apply_to(&mut state);
        assert_eq!(state, json!({"email": "a@b.c"}));
    }

    #[test]
    fn options_are_stamped_onto_metadata() {
        let event = Event::for_change(
            "ev-4".to_owned(),
            40,
            2,
            "Contact",
            &payload(json!({"email": "x@y.z"})),
            EventOptions::default()
                .with_trigger("sync")
                .with_extra(json!({"batch": 7})),
        );
        assert_eq!(event.metadata.trigger.as_deref(), Some("sync"));
        assert_eq!(event.metadata.extra, Some(json!({"batch": 7})));
        assert_eq!(event.metadata.ledger_version, 2);
    }

    #[test]
    fn serde_roundtrip_preserves_everything() {
        let event = Event::for_create(
            "ev-5".to_owned(),
            50,
            3,
            "Contact",
            &payload(json!({"id": "c-5", "tags": ["a", "b"], "nested": {"deep": 1}})),
            EventOptions::default().with_trigger("seed"),
        );

        let encoded = serde_json::to_string(&event).unwrap();
        let decoded: Event = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn serialized_metadata_uses_wire_field_names() {
        let event = Event::for_breakpoint("ev-6".to_owned(), 60, 1, "Contact", 7.into());
        let encoded = serde_json::to_value(&event).unwrap();

        assert_eq!(encoded["metadata"]["kind"], json!("BREAKPOINT"));
        assert_eq!(encoded["metadata"]["ledgerVersion"], json!(1));
        assert_eq!(encoded["metadata"]["breakpoint"], json!(7));
        // Empty migration trails are omitted entirely.
        assert!(encoded["metadata"].get("appliedMigrations").is_none());
    }

    #[test]
    fn breakpoint_tags_roundtrip_untagged() {
        let text: BreakpointTag = serde_json::from_value(json!("launch")).unwrap();
        assert_eq!(text, BreakpointTag::from("launch"));

        let number: BreakpointTag = serde_json::from_value(json!(3)).unwrap();
        assert_eq!(number, BreakpointTag::from(3));
    }

    #[test]
    fn non_object_payload_is_rejected() {
        let err = payload_object(&json!(42)).unwrap_err();
        assert_eq!(err.code(), "INVALID_PAYLOAD");
    }
}
