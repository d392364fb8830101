//! Reconstructed entity and copy values.
//!
//! An [`Entity`] is never stored: it is the result of folding an identity's
//! event history over a blank object, then stamping the derived identity
//! and timestamps. A [`Copy`] is the opposite -- a plain record stored and
//! overwritten wholesale, with no history behind it.

use serde::de::DeserializeOwned;
use serde::ser::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::LedgerError;
use crate::event::{payload_object, Event, Timestamp};

/// A reconstructed, point-in-time view of an event-sourced entity.
///
/// `created_at` and `updated_at` are derived from the first and last
/// replayed event on every reconstruction; they are never stored as
/// mutable state. Serializes flattened:
/// `{"id", "name", "createdAt", "updatedAt", ...domain fields}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    /// Immutable identity, assigned at create time.
    pub id: String,
    /// Entity kind discriminator (the container name).
    pub name: String,
    /// Timestamp of the first replayed event.
    pub created_at: Timestamp,
    /// Timestamp of the last replayed event.
    pub updated_at: Timestamp,
    /// Domain fields, exactly as replay produced them.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Entity {
    /// A domain field by name.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// The flattened JSON representation of this entity.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("id".to_owned(), Value::String(self.id.clone()));
        map.insert("name".to_owned(), Value::String(self.name.clone()));
        map.insert("createdAt".to_owned(), self.created_at.into());
        map.insert("updatedAt".to_owned(), self.updated_at.into());
        for (key, value) in &self.fields {
            map.insert(key.clone(), value.clone());
        }
        Value::Object(map)
    }

    /// Deserialize the flattened representation into a caller type.
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` if `T` rejects the entity's shape.
    pub fn decode<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(self.to_value())
    }
}

/// Reconstruct an entity by folding `events` (oldest to newest) over a
/// blank object.
///
/// The `id` leaf written by the create event is lifted out of the domain
/// fields into the identity slot; a replay that produces no string `id`
/// means the log did not start with a well-formed create event.
pub(crate) fn materialize(name: &str, events: &[&Event]) -> Result<Entity, LedgerError> {
    let (first, last) = match (events.first(), events.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return Err(LedgerError::EmptyEventsList),
    };

    let mut state = Value::Object(Map::new());
    for event in events {
        event.apply_to(&mut state);
    }

    let mut fields = match state {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    let id = match fields.remove("id") {
        Some(Value::String(id)) => id,
        _ => {
            return Err(LedgerError::CorruptedEventOrder {
                entity: name.to_owned(),
            });
        }
    };

    Ok(Entity {
        id,
        name: name.to_owned(),
        created_at: first.metadata.timestamp,
        updated_at: last.metadata.timestamp,
        fields,
    })
}

/// A plain, non-event-sourced record.
///
/// Copies participate in the same staged/committed transaction mechanism
/// as entities but carry no history, no timestamps, and no migrations.
/// Serializes flattened: `{"id", ...fields}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Copy {
    /// The record's identity within its copy-list.
    pub id: String,
    /// Everything else.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Copy {
    /// Build a copy from any serializable record carrying a string `id`
    /// field.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidPayload`] if the record is not a JSON
    /// object or lacks a string `id`.
    pub fn from_payload<T: Serialize>(record: &T) -> Result<Self, LedgerError> {
        let mut fields = payload_object(record)?;
        let id = match fields.remove("id") {
            Some(Value::String(id)) => id,
            _ => {
                return Err(LedgerError::InvalidPayload(serde_json::Error::custom(
                    "copy records require a string 'id' field",
                )));
            }
        };
        Ok(Self { id, fields })
    }

    /// A field by name.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// The flattened JSON representation of this copy.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("id".to_owned(), Value::String(self.id.clone()));
        for (key, value) in &self.fields {
            map.insert(key.clone(), value.clone());
        }
        Value::Object(map)
    }

    /// Deserialize the flattened representation into a caller type.
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` if `T` rejects the copy's shape.
    pub fn decode<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(self.to_value())
    }
}
