//! Singleton container: exactly one event-sourced identity per name.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::entity::{self, Entity};
use crate::error::LedgerError;
use crate::event::{payload_object, BreakpointTag, Event, EventKind, EventOptions};
use crate::history::{self, History};
use crate::transaction::{OpContext, Participant};

/// The stored side of a singleton: its entity kind and one history.
#[derive(Debug)]
pub(crate) struct EntitySingleton {
    name: String,
    history: History,
}

impl EntitySingleton {
    pub(crate) fn new(name: String) -> Self {
        Self {
            name,
            history: History::new(),
        }
    }

    pub(crate) fn history(&self) -> &History {
        &self.history
    }

    pub(crate) fn history_mut(&mut self) -> &mut History {
        &mut self.history
    }

    /// Reconstruct the entity, optionally as of a breakpoint. The tag must
    /// already be validated against the ledger's breakpoint log.
    pub(crate) fn materialize(&self, tag: Option<&BreakpointTag>) -> Result<Entity, LedgerError> {
        if self.history.is_empty() {
            return Err(LedgerError::EntityNotYetCreated {
                entity: self.name.clone(),
            });
        }
        if let Some(tag) = tag {
            if !self.history.has_create_until(tag) {
                return Err(LedgerError::EntityNotYetCreated {
                    entity: self.name.clone(),
                });
            }
        }
        entity::materialize(&self.name, &self.history.events_until(tag))
    }

    /// The identity recorded by the create event, if one exists.
    pub(crate) fn current_id(&self) -> Option<String> {
        let first = self.history.first()?;
        if first.metadata.kind != EventKind::Create {
            return None;
        }
        let mut probe = Value::Object(Map::new());
        first.apply_to(&mut probe);
        match probe.get("id") {
            Some(Value::String(id)) => Some(id.clone()),
            _ => None,
        }
    }

    pub(crate) fn serialize(&self) -> Vec<Event> {
        self.history.committed_events().to_vec()
    }

    /// Install already-migrated events as committed state.
    pub(crate) fn load(&mut self, events: Vec<Event>) -> Result<(), LedgerError> {
        if !self.history.is_empty() {
            return Err(LedgerError::DeserializingOnNonEmptyLedger {
                container: self.name.clone(),
            });
        }
        history::validate_loaded(&self.name, &events)?;
        self.history = History::from_committed(events);
        Ok(())
    }
}

/// Borrowing handle for operating on a singleton.
///
/// Obtained from [`Ledger::singleton`](crate::Ledger::singleton); mutations
/// route through the open transaction when there is one and commit
/// immediately otherwise.
pub struct SingletonHandle<'a> {
    pub(crate) container: &'a mut EntitySingleton,
    pub(crate) ctx: OpContext<'a>,
}

// Manual `Debug`: the context holds non-`Debug` capability trait objects.
impl std::fmt::Debug for SingletonHandle<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingletonHandle")
            .field("name", &self.name())
            .finish()
    }
}

impl SingletonHandle<'_> {
    /// The entity kind this container holds.
    pub fn name(&self) -> &str {
        &self.container.name
    }

    /// Whether the singleton has received its create event.
    pub fn is_initiated(&self) -> bool {
        !self.container.history.is_empty()
    }

    /// Whether uncommitted events are pending on this singleton.
    pub fn is_transaction_pending(&self) -> bool {
        self.container.history.is_transaction_pending()
    }

    /// Dispatch the create event.
    ///
    /// The payload may carry its own string `id`; otherwise one is
    /// generated. Returns the identity either way.
    ///
    /// # Errors
    ///
    /// [`LedgerError::EntityAlreadyCreated`] if the singleton is already
    /// initiated; [`LedgerError::InvalidPayload`] if the payload is not a
    /// JSON object.
    pub fn create<T: Serialize>(
        &mut self,
        data: &T,
        options: EventOptions,
    ) -> Result<String, LedgerError> {
        if self.is_initiated() {
            return Err(LedgerError::EntityAlreadyCreated {
                entity: self.container.name.clone(),
            });
        }

        let mut payload = payload_object(data)?;
        let id = claim_id(&mut payload, &mut self.ctx)?;

        let event = Event::for_create(
            self.ctx.next_id(),
            self.ctx.now(),
            self.ctx.ledger_version,
            &self.container.name,
            &payload,
            options,
        );
        self.container.history.add(event);
        self.ctx.stage_or(
            Participant::Singleton(self.container.name.clone()),
            || self.container.history.commit(),
        );
        Ok(id)
    }

    /// Dispatch a change event carrying a partial payload.
    ///
    /// # Errors
    ///
    /// [`LedgerError::EntityNotYetCreated`] before the create event;
    /// [`LedgerError::InvalidPayload`] if the payload is not a JSON object.
    pub fn change<T: Serialize>(
        &mut self,
        data: &T,
        options: EventOptions,
    ) -> Result<(), LedgerError> {
        if !self.is_initiated() {
            return Err(LedgerError::EntityNotYetCreated {
                entity: self.container.name.clone(),
            });
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
        self.container.history.add(event);
        self.ctx.stage_or(
            Participant::Singleton(self.container.name.clone()),
            || self.container.history.commit(),
        );
        Ok(())
    }

    /// Reconstruct the current entity.
    pub fn get(&self) -> Result<Entity, LedgerError> {
        self.container.materialize(None)
    }

    /// Reconstruct the entity as it was at a breakpoint.
    ///
    /// # Errors
    ///
    /// [`LedgerError::BreakpointDoesNotExist`] for unknown tags;
    /// [`LedgerError::EntityNotYetCreated`] if the create event postdates
    /// the breakpoint.
    pub fn get_as_of(&self, tag: &BreakpointTag) -> Result<Entity, LedgerError> {
        self.ctx.breakpoints.ensure_exists(tag)?;
        self.container.materialize(Some(tag))
    }

    /// The identity assigned at create time.
    ///
    /// # Errors
    ///
    /// [`LedgerError::EntityNotYetCreated`] before the create event;
    /// [`LedgerError::CorruptedEventOrder`] if the first event is not a
    /// create event.
    pub fn id(&self) -> Result<String, LedgerError> {
        if !self.is_initiated() {
            return Err(LedgerError::EntityNotYetCreated {
                entity: self.container.name.clone(),
            });
        }
        self.container
            .current_id()
            .ok_or_else(|| LedgerError::CorruptedEventOrder {
                entity: self.container.name.clone(),
            })
    }
}

/// Pull the identity out of a create payload, generating one when absent.
pub(crate) fn claim_id(
    payload: &mut Map<String, Value>,
    ctx: &mut OpContext<'_>,
) -> Result<String, LedgerError> {
    use serde::ser::Error as _;

    match payload.get("id") {
        Some(Value::String(id)) => Ok(id.clone()),
        Some(_) => Err(LedgerError::InvalidPayload(serde_json::Error::custom(
            "the 'id' field must be a string",
        ))),
        None => {
            let id = ctx.next_id();
            payload.insert("id".to_owned(), Value::String(id.clone()));
            Ok(id)
        }
    }
}
