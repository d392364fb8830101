//! The ledger facade: the root aggregate owning containers, breakpoints,
//! migrations, injected capabilities, and the transaction lifecycle.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::breakpoint::{BreakpointController, BreakpointEntry};
use crate::copies::CopyListHandle;
use crate::entity::Copy;
use crate::error::LedgerError;
use crate::event::{BreakpointTag, Event, Timestamp};
use crate::list::ListHandle;
use crate::migration::{Migration, MigrationRegistry};
use crate::reference::{Reference, ReferenceKind, Resolved};
use crate::registry::{LedgerSnapshot, Registry};
use crate::services::{Clock, IdSource, SystemClock, UuidIds};
use crate::singleton::SingletonHandle;
use crate::transaction::{OpContext, Participant, Transaction};

/// The serializable form of a whole ledger.
///
/// Event-sourced containers serialize as raw event arrays (not
/// reconstructed state); copy-lists serialize their records wholesale.
/// This is the only structure the kernel ever hands to, or accepts from,
/// an embedding application's persistence layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedLedger {
    /// The ledger's name; checked on load.
    pub name: String,
    /// The schema version the data was written under.
    pub version: u32,
    /// Singleton histories by container name.
    #[serde(default)]
    pub entities: IndexMap<String, Vec<Event>>,
    /// Collection histories by container name, as `(identity, events)`
    /// pairs in insertion order.
    #[serde(default)]
    pub list_entities: IndexMap<String, Vec<(String, Vec<Event>)>>,
    /// Copy records by container name.
    #[serde(default)]
    pub copies: IndexMap<String, Vec<Copy>>,
    /// The breakpoint log.
    #[serde(default)]
    pub ledger_breakpoints: Vec<BreakpointEntry>,
}

/// One entry of [`Ledger::history`]: the ledger's state as of a
/// breakpoint, or its current state for the final entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalSnapshot {
    /// When the breakpoint was recorded (or now, for the final entry).
    pub time: Timestamp,
    /// The breakpoint this snapshot is bounded by; `None` for the current
    /// state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breakpoint: Option<BreakpointTag>,
    /// The reconstructed state.
    pub snapshot: LedgerSnapshot,
}

/// An event-sourced state engine instance.
///
/// A ledger owns its containers (declared once via [`Ledger::builder`]),
/// its breakpoint log, its migration registry, and the injected
/// [`IdSource`]/[`Clock`] capabilities. All container access goes through
/// the borrowing handles returned by [`singleton`](Ledger::singleton),
/// [`list`](Ledger::list), and [`copies`](Ledger::copies), which is how
/// every mutation routes through the (single) open transaction.
///
/// # Examples
///
/// ```
/// use ledgerfold::{EventOptions, Ledger};
/// use serde_json::json;
///
/// let mut ledger = Ledger::builder("crm", 1)
///     .singleton("Settings")
///     .list("Contact")
///     .build()?;
///
/// let id = ledger.list("Contact")?.create(
///     &json!({"email": "ada@example.com"}),
///     EventOptions::default(),
/// )?;
/// let contact = ledger.list("Contact")?.get(&id)?;
/// assert_eq!(contact.field("email"), Some(&json!("ada@example.com")));
/// # Ok::<(), ledgerfold::LedgerError>(())
/// ```
pub struct Ledger {
    name: String,
    version: u32,
    registry: Registry,
    breakpoints: BreakpointController,
    migrations: MigrationRegistry,
    ids: Box<dyn IdSource>,
    clock: Box<dyn Clock>,
    transaction: Option<Transaction>,
}

// Manual `Debug`: the capability trait objects are not `Debug`, and the
// container internals are not worth dumping.
impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("in_transaction", &self.transaction.is_some())
            .finish()
    }
}

impl Ledger {
    /// Start declaring a ledger with the given name and schema version.
    pub fn builder(name: impl Into<String>, version: u32) -> LedgerBuilder {
        LedgerBuilder {
            name: name.into(),
            version,
            singletons: Vec::new(),
            lists: Vec::new(),
            copies: Vec::new(),
            migrations: Vec::new(),
            ids: None,
            clock: None,
        }
    }

    /// This ledger's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// This ledger's schema version.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Generate the next unique identifier from the injected source.
    pub fn next_id(&mut self) -> String {
        self.ids.next_id()
    }

    /// The current time from the injected clock.
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// A handle on the named singleton container.
    ///
    /// # Errors
    ///
    /// [`LedgerError::UnknownEntityName`] if no singleton of that name was
    /// declared.
    pub fn singleton(&mut self, name: &str) -> Result<SingletonHandle<'_>, LedgerError> {
        let Self {
            registry,
            breakpoints,
            transaction,
            ids,
            clock,
            version,
            ..
        } = self;
        let container = registry.singleton_mut(name)?;
        Ok(SingletonHandle {
            container,
            ctx: OpContext {
                transaction,
                breakpoints,
                ids: ids.as_mut(),
                clock: &**clock,
                ledger_version: *version,
            },
        })
    }

    /// A handle on the named collection container.
    ///
    /// # Errors
    ///
    /// [`LedgerError::UnknownEntityName`] if no collection of that name
    /// was declared.
    pub fn list(&mut self, name: &str) -> Result<ListHandle<'_>, LedgerError> {
        let Self {
            registry,
            breakpoints,
            transaction,
            ids,
            clock,
            version,
            ..
        } = self;
        let container = registry.list_mut(name)?;
        Ok(ListHandle {
            container,
            ctx: OpContext {
                transaction,
                breakpoints,
                ids: ids.as_mut(),
                clock: &**clock,
                ledger_version: *version,
            },
        })
    }

    /// A handle on the named copy-list container.
    ///
    /// # Errors
    ///
    /// [`LedgerError::UnknownEntityName`] if no copy-list of that name was
    /// declared.
    pub fn copies(&mut self, name: &str) -> Result<CopyListHandle<'_>, LedgerError> {
        let Self {
            registry,
            breakpoints,
            transaction,
            ids,
            clock,
            version,
            ..
        } = self;
        let container = registry.copy_list_mut(name)?;
        Ok(CopyListHandle {
            container,
            ctx: OpContext {
                transaction,
                breakpoints,
                ids: ids.as_mut(),
                clock: &**clock,
                ledger_version: *version,
            },
        })
    }

    // --- Transaction lifecycle ---

    /// Whether a transaction is currently open.
    pub fn is_in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    /// Open a transaction. Until it resolves, every container mutation is
    /// staged and only visible through this ledger's own reads.
    ///
    /// # Errors
    ///
    /// [`LedgerError::TransactionAlreadyInProgress`] if one is open.
    pub fn start_transaction(&mut self) -> Result<(), LedgerError> {
        if self.transaction.is_some() {
            return Err(LedgerError::TransactionAlreadyInProgress);
        }
        self.transaction = Some(Transaction::default());
        tracing::debug!(ledger = %self.name, "transaction started");
        Ok(())
    }

    /// Commit the open transaction: every enlisted container's staged
    /// state becomes committed, atomically from the caller's perspective.
    /// A no-op when no transaction is open.
    pub fn commit_transaction(&mut self) {
        let Some(transaction) = self.transaction.take() else {
            return;
        };
        let participants: Vec<Participant> = transaction.into_participants().collect();
        for participant in &participants {
            match participant {
                Participant::Singleton(name) => {
                    if let Ok(singleton) = self.registry.singleton_mut(name) {
                        singleton.history_mut().commit();
                    }
                }
                Participant::List(name) => {
                    if let Ok(list) = self.registry.list_mut(name) {
                        list.commit_staged();
                    }
                }
                Participant::Copies(name) => {
                    if let Ok(copies) = self.registry.copy_list_mut(name) {
                        copies.commit();
                    }
                }
            }
        }
        self.run_post_transaction(&participants);
        tracing::debug!(ledger = %self.name, containers = participants.len(), "transaction committed");
    }

    /// Roll back the open transaction: every enlisted container discards
    /// its staged state. Immediate and total, never partial. A no-op when
    /// no transaction is open.
    pub fn rollback_transaction(&mut self) {
        let Some(transaction) = self.transaction.take() else {
            return;
        };
        let participants: Vec<Participant> = transaction.into_participants().collect();
        for participant in &participants {
            match participant {
                Participant::Singleton(name) => {
                    if let Ok(singleton) = self.registry.singleton_mut(name) {
                        singleton.history_mut().rollback();
                    }
                }
                Participant::List(name) => {
                    if let Ok(list) = self.registry.list_mut(name) {
                        list.rollback_staged();
                    }
                }
                Participant::Copies(name) => {
                    if let Ok(copies) = self.registry.copy_list_mut(name) {
                        copies.rollback();
                    }
                }
            }
        }
        self.run_post_transaction(&participants);
        tracing::debug!(ledger = %self.name, containers = participants.len(), "transaction rolled back");
    }

    /// Post-transaction pass, after commit or rollback: prune collection
    /// identities whose history ended up empty.
    fn run_post_transaction(&mut self, participants: &[Participant]) {
        for participant in participants {
            if let Participant::List(name) = participant {
                if let Ok(list) = self.registry.list_mut(name) {
                    list.prune_empty();
                }
            }
        }
    }

    /// Run `f` inside a transaction: commit on `Ok`, roll back and
    /// propagate on `Err`. There is no partial commit.
    ///
    /// # Errors
    ///
    /// [`LedgerError::TransactionAlreadyInProgress`] (converted into `E`)
    /// if a transaction is already open, plus whatever `f` returns.
    pub fn tx<R, E>(&mut self, f: impl FnOnce(&mut Self) -> Result<R, E>) -> Result<R, E>
    where
        E: From<LedgerError>,
    {
        self.start_transaction().map_err(E::from)?;
        match f(self) {
            Ok(value) => {
                self.commit_transaction();
                Ok(value)
            }
            Err(err) => {
                self.rollback_transaction();
                Err(err)
            }
        }
    }

    // --- Breakpoints ---

    /// Record a breakpoint and inject a marker event into every initiated
    /// singleton history and every collection history.
    ///
    /// Transaction-aware like any other mutation: inside a transaction the
    /// markers stay staged until commit.
    ///
    /// # Errors
    ///
    /// [`LedgerError::BreakpointAlreadyExists`] for a duplicate tag.
    pub fn add_breakpoint(&mut self, tag: impl Into<BreakpointTag>) -> Result<(), LedgerError> {
        let tag = tag.into();
        if self.breakpoints.contains(&tag) {
            return Err(LedgerError::BreakpointAlreadyExists { tag });
        }
        self.breakpoints.record(tag.clone(), self.clock.now());

        let Self {
            registry,
            transaction,
            ids,
            clock,
            version,
            ..
        } = self;

        for (name, singleton) in registry.singletons_mut() {
            // A marker can never be an identity's first event.
            if singleton.history().is_empty() {
                continue;
            }
            let event =
                Event::for_breakpoint(ids.next_id(), clock.now(), *version, name, tag.clone());
            singleton.history_mut().add(event);
            match transaction.as_mut() {
                Some(tx) => tx.enlist(Participant::Singleton(name.clone())),
                None => singleton.history_mut().commit(),
            }
        }

        for (name, list) in registry.lists_mut() {
            let mut touched = false;
            for history in list.histories_mut() {
                let event =
                    Event::for_breakpoint(ids.next_id(), clock.now(), *version, name, tag.clone());
                history.add(event);
                touched = true;
            }
            if touched {
                match transaction.as_mut() {
                    Some(tx) => tx.enlist(Participant::List(name.clone())),
                    None => list.commit_staged(),
                }
            }
        }

        tracing::debug!(ledger = %self.name, breakpoint = %tag, "breakpoint recorded");
        Ok(())
    }

    /// Whether a breakpoint with this tag was recorded.
    pub fn has_breakpoint(&self, tag: impl Into<BreakpointTag>) -> bool {
        self.breakpoints.contains(&tag.into())
    }

    /// Every recorded breakpoint tag, in creation order.
    pub fn breakpoints(&self) -> Vec<BreakpointTag> {
        self.breakpoints.tags().cloned().collect()
    }

    /// Every recorded breakpoint with its creation timestamp.
    pub fn breakpoint_entries(&self) -> &[BreakpointEntry] {
        self.breakpoints.entries()
    }

    // --- References ---

    /// Build a serializable reference to the entity or copy holding `id`.
    ///
    /// Classification probes singletons, then collections, then
    /// copy-lists; the first hit fixes the reference's kind forever.
    ///
    /// # Errors
    ///
    /// [`LedgerError::EntityNotFound`] if nothing holds that identity.
    pub fn create_reference(&self, id: &str) -> Result<Reference, LedgerError> {
        let (kind, name) = self
            .registry
            .locate(id)
            .ok_or_else(|| LedgerError::EntityNotFound { id: id.to_owned() })?;
        Ok(Reference {
            ledger_name: self.name.clone(),
            name: name.to_owned(),
            kind,
            id: id.to_owned(),
        })
    }

    /// Resolve a reference created by this ledger.
    ///
    /// # Errors
    ///
    /// [`LedgerError::LedgerNamesDoNotMatch`] if the reference belongs to
    /// another ledger; [`LedgerError::EntityNotFound`] if the referenced
    /// singleton or copy no longer resolves;
    /// [`LedgerError::UnknownIdentifier`] if a collection member is gone.
    pub fn resolve_reference(&self, reference: &Reference) -> Result<Resolved, LedgerError> {
        if reference.ledger_name != self.name {
            return Err(LedgerError::LedgerNamesDoNotMatch {
                expected: self.name.clone(),
                found: reference.ledger_name.clone(),
            });
        }

        match reference.kind {
            ReferenceKind::Singleton => {
                let singleton = self.registry.singleton(&reference.name)?;
                match singleton.materialize(None) {
                    Ok(entity) if entity.id == reference.id => Ok(Resolved::Entity(entity)),
                    Ok(_) | Err(LedgerError::EntityNotYetCreated { .. }) => {
                        Err(LedgerError::EntityNotFound {
                            id: reference.id.clone(),
                        })
                    }
                    Err(err) => Err(err),
                }
            }
            ReferenceKind::List => {
                let list = self.registry.list(&reference.name)?;
                Ok(Resolved::Entity(list.materialize_one(&reference.id, None)?))
            }
            ReferenceKind::Copy => {
                let copies = self.registry.copy_list(&reference.name)?;
                copies
                    .view()
                    .get(&reference.id)
                    .cloned()
                    .map(Resolved::Copy)
                    .ok_or_else(|| LedgerError::EntityNotFound {
                        id: reference.id.clone(),
                    })
            }
        }
    }

    /// Find the entity or copy holding `id`, searching singletons, then
    /// collections, then copy-lists.
    pub fn find_by_identity(&self, id: &str) -> Option<Resolved> {
        let reference = self.create_reference(id).ok()?;
        self.resolve_reference(&reference).ok()
    }

    // --- Snapshots ---

    /// Reconstruct the current state of every container.
    pub fn snapshot(&self) -> Result<LedgerSnapshot, LedgerError> {
        self.registry.snapshot(None)
    }

    /// Reconstruct every container's state as of a breakpoint.
    ///
    /// # Errors
    ///
    /// [`LedgerError::BreakpointDoesNotExist`] for unknown tags.
    pub fn snapshot_as_of(&self, tag: &BreakpointTag) -> Result<LedgerSnapshot, LedgerError> {
        self.breakpoints.ensure_exists(tag)?;
        self.registry.snapshot(Some(tag))
    }

    /// The ledger's state over time: one snapshot per recorded breakpoint,
    /// in creation order, plus the current state as the final entry.
    pub fn history(&self) -> Result<Vec<HistoricalSnapshot>, LedgerError> {
        let mut out = Vec::with_capacity(self.breakpoints.entries().len() + 1);
        for entry in self.breakpoints.entries() {
            out.push(HistoricalSnapshot {
                time: entry.created_at,
                breakpoint: Some(entry.breakpoint_id.clone()),
                snapshot: self.registry.snapshot(Some(&entry.breakpoint_id))?,
            });
        }
        out.push(HistoricalSnapshot {
            time: self.clock.now(),
            breakpoint: None,
            snapshot: self.registry.snapshot(None)?,
        });
        Ok(out)
    }

    // --- Serialize / load ---

    /// Serialize the whole ledger into its durable form.
    ///
    /// # Errors
    ///
    /// [`LedgerError::SerializingDuringTransaction`] while a transaction
    /// is open -- staged state must never leak into a durable form.
    pub fn serialize(&self) -> Result<SerializedLedger, LedgerError> {
        if self.transaction.is_some() {
            return Err(LedgerError::SerializingDuringTransaction);
        }
        let mut out = SerializedLedger {
            name: self.name.clone(),
            version: self.version,
            ..SerializedLedger::default()
        };
        self.registry.serialize_into(&mut out);
        out.ledger_breakpoints = self.breakpoints.entries().to_vec();
        Ok(out)
    }

    /// Load serialized data into this (still empty) ledger.
    ///
    /// Every event runs through the migration controller on the way in and
    /// is stored already committed -- loading is not itself transactional.
    /// Whole-ledger migration hooks run last, against the loaded ledger.
    ///
    /// # Errors
    ///
    /// [`LedgerError::LedgerNamesDoNotMatch`] if the data belongs to a
    /// different ledger; [`LedgerError::DeserializingOnNonEmptyLedger`] if
    /// any addressed container already holds committed state;
    /// [`LedgerError::UnknownEntityName`] for container names this ledger
    /// never declared; [`LedgerError::EventAssociation`] and
    /// [`LedgerError::CorruptedEventOrder`] for malformed histories.
    pub fn load(&mut self, data: SerializedLedger) -> Result<(), LedgerError> {
        if data.name != self.name {
            return Err(LedgerError::LedgerNamesDoNotMatch {
                expected: self.name.clone(),
                found: data.name,
            });
        }

        // The registry borrows the migrations while loading, and the
        // whole-ledger hooks need `&mut self`; take the registry out for
        // the duration.
        let migrations = std::mem::take(&mut self.migrations);
        let result = self
            .registry
            .load_from(&migrations, self.version, &data)
            .and_then(|()| self.breakpoints.load(data.ledger_breakpoints.clone()))
            .and_then(|()| {
                for migration in migrations.bracket(data.version, self.version) {
                    if let Some(hook) = migration.ledger_hook() {
                        hook(self, &data)?;
                    }
                }
                Ok(())
            });
        self.migrations = migrations;

        if result.is_ok() {
            tracing::debug!(ledger = %self.name, from_version = data.version, "ledger loaded");
        }
        result
    }
}

/// Declares a ledger's name, schema version, containers, migrations, and
/// capability overrides, then builds the [`Ledger`].
///
/// Obtained from [`Ledger::builder`].
pub struct LedgerBuilder {
    name: String,
    version: u32,
    singletons: Vec<String>,
    lists: Vec<String>,
    copies: Vec<String>,
    migrations: Vec<Migration>,
    ids: Option<Box<dyn IdSource>>,
    clock: Option<Box<dyn Clock>>,
}

impl LedgerBuilder {
    /// Declare a singleton container.
    pub fn singleton(mut self, name: impl Into<String>) -> Self {
        self.singletons.push(name.into());
        self
    }

    /// Declare a collection container.
    pub fn list(mut self, name: impl Into<String>) -> Self {
        self.lists.push(name.into());
        self
    }

    /// Declare a copy-list container.
    pub fn copies(mut self, name: impl Into<String>) -> Self {
        self.copies.push(name.into());
        self
    }

    /// Register a schema migration.
    pub fn migration(mut self, migration: Migration) -> Self {
        self.migrations.push(migration);
        self
    }

    /// Register several schema migrations at once.
    pub fn migrations(mut self, migrations: impl IntoIterator<Item = Migration>) -> Self {
        self.migrations.extend(migrations);
        self
    }

    /// Override the identifier source (default: random UUID v4).
    pub fn id_source(mut self, ids: impl IdSource + 'static) -> Self {
        self.ids = Some(Box::new(ids));
        self
    }

    /// Override the clock (default: system wall clock).
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Box::new(clock));
        self
    }

    /// Build the ledger.
    ///
    /// # Errors
    ///
    /// [`LedgerError::DuplicateEntity`] for a container name declared
    /// twice; [`LedgerError::EntityNameNotSpecified`] for an empty one;
    /// [`LedgerError::DuplicateMigration`] for two migrations targeting
    /// the same version.
    pub fn build(self) -> Result<Ledger, LedgerError> {
        let mut registry = Registry::default();
        for name in self.singletons {
            registry.register_singleton(name)?;
        }
        for name in self.lists {
            registry.register_list(name)?;
        }
        for name in self.copies {
            registry.register_copies(name)?;
        }

        let mut migrations = MigrationRegistry::default();
        for migration in self.migrations {
            migrations.register(migration)?;
        }

        Ok(Ledger {
            name: self.name,
            version: self.version,
            registry,
            breakpoints: BreakpointController::default(),
            migrations,
            ids: self.ids.unwrap_or_else(|| Box::new(UuidIds)),
            clock: self.clock.unwrap_or_else(|| Box::new(SystemClock)),
            transaction: None,
        })
    }

    /// Build the ledger and load serialized data into it.
    ///
    /// # Errors
    ///
    /// Everything [`build`](LedgerBuilder::build) and
    /// [`Ledger::load`] can return.
    pub fn load(self, data: SerializedLedger) -> Result<Ledger, LedgerError> {
        let mut ledger = self.build()?;
        ledger.load(data)?;
        Ok(ledger)
    }
}
