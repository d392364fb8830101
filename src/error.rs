//! Crate-level error type shared by every ledger operation.

use crate::event::BreakpointTag;

/// Error raised by ledger, container, migration, and reference operations.
///
/// Every failure in this crate is a synchronous invariant violation raised
/// at the point of the offending call; the kernel performs no I/O, so there
/// is no transient-failure category and nothing is retriable. Each variant
/// carries a stable machine-readable code (see [`code`](LedgerError::code))
/// alongside its human-readable message.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum LedgerError {
    /// A breakpoint with this tag has already been recorded.
    #[error("breakpoint {tag} already exists")]
    BreakpointAlreadyExists {
        /// The duplicate tag.
        tag: BreakpointTag,
    },

    /// The requested breakpoint was never added to the ledger.
    #[error("breakpoint {tag} was never added to the ledger")]
    BreakpointDoesNotExist {
        /// The unknown tag.
        tag: BreakpointTag,
    },

    /// An identity's event log does not start with a CREATE event, or
    /// contains more than one.
    #[error("event log for entity '{entity}' is corrupted: it must start with a single create event")]
    CorruptedEventOrder {
        /// The entity kind whose log is corrupted.
        entity: String,
    },

    /// Serialized data was loaded into a container that already holds
    /// committed state.
    #[error("cannot load '{container}': it already contains committed data")]
    DeserializingOnNonEmptyLedger {
        /// The container (or breakpoint log) that was not empty.
        container: String,
    },

    /// Two containers were declared under the same name.
    #[error("duplicate container name '{name}'")]
    DuplicateEntity {
        /// The colliding name.
        name: String,
    },

    /// `create` was called with an identifier that already exists in the
    /// collection.
    #[error("an entity with id '{id}' already exists")]
    DuplicateIdentifier {
        /// The colliding identifier.
        id: String,
    },

    /// Two migrations were registered for the same target version.
    #[error("a migration targeting version {version} is already registered")]
    DuplicateMigration {
        /// The colliding target version.
        version: u32,
    },

    /// An entity was reconstructed from an empty event list.
    #[error("cannot reconstruct an entity from an empty event list")]
    EmptyEventsList,

    /// `create` was dispatched to a singleton that is already initiated.
    #[error("entity '{entity}' has already been created")]
    EntityAlreadyCreated {
        /// The singleton's entity kind.
        entity: String,
    },

    /// A container was declared with an empty name.
    #[error("container name must not be empty")]
    EntityNameNotSpecified,

    /// No entity or copy with the given identity exists in this ledger.
    #[error("entity '{id}' was not found within this ledger")]
    EntityNotFound {
        /// The identity that failed to resolve.
        id: String,
    },

    /// The entity must receive a create event before it can be read or
    /// changed.
    #[error("entity '{entity}' has not yet been created")]
    EntityNotYetCreated {
        /// The entity kind.
        entity: String,
    },

    /// A loaded event's entity tag does not match the container it was
    /// addressed to.
    #[error("event for entity '{found}' cannot be loaded into container '{expected}'")]
    EventAssociation {
        /// The container's entity kind.
        expected: String,
        /// The entity tag carried by the event.
        found: String,
    },

    /// A payload could not be encoded as a JSON object.
    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    /// The serialized ledger's name does not match this ledger.
    #[error("ledger name '{found}' does not match '{expected}'")]
    LedgerNamesDoNotMatch {
        /// This ledger's name.
        expected: String,
        /// The name carried by the other side.
        found: String,
    },

    /// The ledger cannot be serialized while a transaction is open.
    #[error("cannot serialize while a transaction is in progress")]
    SerializingDuringTransaction,

    /// A transaction was started while another one is still open.
    #[error("a transaction is already in progress")]
    TransactionAlreadyInProgress,

    /// No container with the given name is registered on this ledger.
    #[error("no container named '{name}' exists within this ledger")]
    UnknownEntityName {
        /// The unknown container name.
        name: String,
    },

    /// No entity with the given identifier exists in the collection.
    #[error("no entity with id '{id}' exists")]
    UnknownIdentifier {
        /// The unknown identifier.
        id: String,
    },
}

impl LedgerError {
    /// Stable machine-readable code for this error.
    ///
    /// Codes never change across releases; match on them when the variant
    /// itself is not accessible (e.g. across an FFI or logging boundary).
    pub fn code(&self) -> &'static str {
        match self {
            Self::BreakpointAlreadyExists { .. } => "BREAKPOINT_ALREADY_EXISTS",
            Self::BreakpointDoesNotExist { .. } => "BREAKPOINT_DOES_NOT_EXIST",
            Self::CorruptedEventOrder { .. } => "CORRUPTED_EVENT_ORDER",
            Self::DeserializingOnNonEmptyLedger { .. } => "DESERIALIZING_ON_NON_EMPTY_LEDGER",
            Self::DuplicateEntity { .. } => "DUPLICATE_ENTITY",
            Self::DuplicateIdentifier { .. } => "DUPLICATE_IDENTIFIER",
            Self::DuplicateMigration { .. } => "DUPLICATE_MIGRATION",
            Self::EmptyEventsList => "EMPTY_EVENTS_LIST",
            Self::EntityAlreadyCreated { .. } => "ENTITY_ALREADY_CREATED",
            Self::EntityNameNotSpecified => "ENTITY_NAME_NOT_SPECIFIED",
            Self::EntityNotFound { .. } => "ENTITY_NOT_FOUND",
            Self::EntityNotYetCreated { .. } => "ENTITY_NOT_YET_CREATED",
            Self::EventAssociation { .. } => "EVENT_ASSOCIATION_ERROR",
            Self::InvalidPayload(_) => "INVALID_PAYLOAD",
            Self::LedgerNamesDoNotMatch { .. } => "LEDGER_NAMES_DO_NOT_MATCH",
            Self::SerializingDuringTransaction => "SERIALIZING_DURING_TRANSACTION",
            Self::TransactionAlreadyInProgress => "TRANSACTION_ALREADY_IN_PROGRESS",
            Self::UnknownEntityName { .. } => "UNKNOWN_ENTITY_NAME",
            Self::UnknownIdentifier { .. } => "UNKNOWN_IDENTIFIER",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = LedgerError::UnknownIdentifier {
            id: "c-42".to_owned(),
        };
        assert_eq!(err.to_string(), "no entity with id 'c-42' exists");
    }

    #[test]
    fn codes_are_stable_screaming_snake() {
        let err = LedgerError::TransactionAlreadyInProgress;
        assert_eq!(err.code(), "TRANSACTION_ALREADY_IN_PROGRESS");

        let err = LedgerError::EntityNotYetCreated {
            entity: "Settings".to_owned(),
        };
        assert_eq!(err.code(), "ENTITY_NOT_YET_CREATED");
    }

    #[test]
    fn breakpoint_errors_display_the_tag() {
        let err = LedgerError::BreakpointDoesNotExist {
            tag: BreakpointTag::from("v1-launch"),
        };
        assert!(err.to_string().contains("v1-launch"));
    }

    // Errors must cross thread boundaries so embedders can surface them
    // from worker threads.
    const _: () = {
        #[allow(dead_code)]
        fn assert_send_sync<T: Send + Sync>() {}

        #[allow(dead_code)]
        fn check() {
            assert_send_sync::<LedgerError>();
        }
    };
}
