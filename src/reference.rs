//! Serializable pointers to entities and copies.

use serde::{Deserialize, Serialize};

use crate::entity::{Copy, Entity};

/// Which container kind a reference points into.
///
/// Fixed when the reference is created, by probing singletons, then
/// collections, then copy-lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReferenceKind {
    /// A singleton container.
    Singleton,
    /// A collection container.
    List,
    /// A copy-list container.
    Copy,
}

/// An opaque, serializable pointer to an entity or copy.
///
/// Only resolvable against the ledger instance whose name matches
/// `ledger_name`; resolving it anywhere else fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    /// The originating ledger's name.
    pub ledger_name: String,
    /// The container holding the referenced identity.
    pub name: String,
    /// Which container kind `name` refers to.
    pub kind: ReferenceKind,
    /// The referenced identity.
    pub id: String,
}

/// What a [`Reference`] resolved to.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    /// An event-sourced entity (singleton or collection member).
    Entity(Entity),
    /// A plain copy record.
    Copy(Copy),
}

impl Resolved {
    /// The resolved identity, whichever side it landed on.
    pub fn id(&self) -> &str {
        match self {
            Self::Entity(entity) => &entity.id,
            Self::Copy(copy) => &copy.id,
        }
    }

    /// The entity, if this resolved to one.
    pub fn entity(self) -> Option<Entity> {
        match self {
            Self::Entity(entity) => Some(entity),
            Self::Copy(_) => None,
        }
    }

    /// The copy, if this resolved to one.
    pub fn copy(self) -> Option<Copy> {
        match self {
            Self::Copy(copy) => Some(copy),
            Self::Entity(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reference_serializes_with_wire_names() {
        let reference = Reference {
            ledger_name: "crm".to_owned(),
            name: "Contact".to_owned(),
            kind: ReferenceKind::List,
            id: "c-1".to_owned(),
        };
        let encoded = serde_json::to_value(&reference).unwrap();
        assert_eq!(
            encoded,
            json!({
                "ledgerName": "crm",
                "name": "Contact",
                "kind": "LIST",
                "id": "c-1"
            })
        );

        let decoded: Reference = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, reference);
    }
}
