//! Schema migrations: rewriting historical events on load.
//!
//! A ledger's migration registry maps target versions to [`Migration`]
//! definitions. When serialized data written under an older schema version
//! is loaded, every event passes through [`MigrationRegistry::migrate_event`],
//! which applies the ascending bracket of migrations between the event's
//! version and the ledger's current version and records the trail in the
//! event's metadata. Whole-ledger hooks run once after everything loaded.

use std::collections::BTreeMap;
use std::ops::Bound;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::diff;
use crate::error::LedgerError;
use crate::event::{Event, EventKind, EventMetadata};
use crate::ledger::{Ledger, SerializedLedger};

/// Rewrites one event payload into the next schema version's shape.
///
/// Receives the event's data materialized as a JSON object (the full
/// payload for create events, the partial payload for change events) and
/// a snapshot of the event's metadata; returns the rewritten payload.
pub type MigrateFn = Box<dyn Fn(Value, &EventMetadata) -> Value + Send>;

/// Runs once against the whole ledger after a load that crossed this
/// migration's version, for side effects the per-event functions cannot
/// express (e.g. synthesizing new entities from migrated data).
pub type LedgerHook = Box<dyn Fn(&mut Ledger, &SerializedLedger) -> Result<(), LedgerError> + Send>;

#[derive(Default)]
struct EntityMigration {
    create: Option<MigrateFn>,
    change: Option<MigrateFn>,
}

/// One schema step: the target version plus, per entity kind, optional
/// create/change payload rewriters and an optional whole-ledger hook.
///
/// # Examples
///
/// ```
/// use ledgerfold::Migration;
/// use serde_json::json;
///
/// let to_v2 = Migration::to_version(2).migrate_create("Contact", |mut data, _meta| {
///     let email = data["email"].take();
///     data["emails"] = json!([email]);
///     if let Some(fields) = data.as_object_mut() {
///         fields.remove("email");
///     }
///     data
/// });
/// assert_eq!(to_v2.version(), 2);
/// ```
pub struct Migration {
    version: u32,
    entities: IndexMap<String, EntityMigration>,
    ledger_hook: Option<LedgerHook>,
}

impl Migration {
    /// Start a migration targeting `version`.
    pub fn to_version(version: u32) -> Self {
        Self {
            version,
            entities: IndexMap::new(),
            ledger_hook: None,
        }
    }

    /// The schema version this migration produces.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Rewrite create-event payloads of `entity`.
    pub fn migrate_create(
        mut self,
        entity: impl Into<String>,
        f: impl Fn(Value, &EventMetadata) -> Value + Send + 'static,
    ) -> Self {
        self.entities.entry(entity.into()).or_default().create = Some(Box::new(f));
        self
    }

    /// Rewrite change-event payloads of `entity`.
    pub fn migrate_change(
        mut self,
        entity: impl Into<String>,
        f: impl Fn(Value, &EventMetadata) -> Value + Send + 'static,
    ) -> Self {
        self.entities.entry(entity.into()).or_default().change = Some(Box::new(f));
        self
    }

    /// Run `f` once against the loaded ledger when a load crosses this
    /// migration's version.
    pub fn migrate_ledger(
        mut self,
        f: impl Fn(&mut Ledger, &SerializedLedger) -> Result<(), LedgerError> + Send + 'static,
    ) -> Self {
        self.ledger_hook = Some(Box::new(f));
        self
    }

    pub(crate) fn ledger_hook(&self) -> Option<&LedgerHook> {
        self.ledger_hook.as_ref()
    }

    fn step_for(&self, entity: &str, kind: EventKind) -> Option<&MigrateFn> {
        let steps = self.entities.get(entity)?;
        match kind {
            EventKind::Create => steps.create.as_ref(),
            EventKind::Change => steps.change.as_ref(),
            EventKind::Breakpoint => None,
        }
    }
}

impl std::fmt::Debug for Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migration")
            .field("version", &self.version)
            .field("entities", &self.entities.keys().collect::<Vec<_>>())
            .field("has_ledger_hook", &self.ledger_hook.is_some())
            .finish()
    }
}

/// Version-ordered migration registry owned by one ledger.
#[derive(Debug, Default)]
pub(crate) struct MigrationRegistry {
    migrations: BTreeMap<u32, Migration>,
}

impl MigrationRegistry {
    pub(crate) fn register(&mut self, migration: Migration) -> Result<(), LedgerError> {
        let version = migration.version;
        if self.migrations.contains_key(&version) {
            return Err(LedgerError::DuplicateMigration { version });
        }
        self.migrations.insert(version, migration);
        Ok(())
    }

    /// Migrations with `version ∈ (from, to]`, ascending.
    pub(crate) fn bracket(&self, from: u32, to: u32) -> impl Iterator<Item = &Migration> {
        self.migrations
            .range((Bound::Excluded(from), Bound::Included(to)))
            .map(|(_, migration)| migration)
    }

    /// Rewrite `event` into the shape expected by `current_version`.
    ///
    /// Breakpoint markers and events already at the current version pass
    /// through untouched. Otherwise every migration in the ascending
    /// bracket `(event version, current]` is visited: the event's
    /// instructions are materialized onto an accumulator object and the
    /// matching rewriter (create or change, by event kind) replaces it.
    /// Rounds without a rewriter for this entity leave the accumulator
    /// alone. Each round appends `"{from}:{to}"` to the event's migration
    /// trail. Instructions are rebuilt from the final accumulator only if
    /// at least one rewriter ran -- a bracket that never touches the entity
    /// keeps the event's instructions verbatim.
    pub(crate) fn migrate_event(&self, mut event: Event, current_version: u32) -> Event {
        if event.metadata.kind == EventKind::Breakpoint
            || event.metadata.ledger_version == current_version
        {
            return event;
        }

        let from_version = event.metadata.ledger_version;
        let bracket: Vec<&Migration> = self.bracket(from_version, current_version).collect();
        if bracket.is_empty() {
            event.metadata.ledger_version = current_version;
            return event;
        }

        // Snapshot the metadata once so rewriters all see the event as it
        // was loaded, whatever earlier rounds did.
        let metadata_snapshot = event.metadata.clone();
        let mut accumulator = Value::Object(Map::new());
        let mut rewritten = false;
        let mut last_version = from_version;
        let mut trail = Vec::with_capacity(bracket.len());

        for migration in bracket {
            if let Some(step) = migration.step_for(&event.metadata.entity, event.metadata.kind) {
                diff::apply_instructions(&event.instructions, &mut accumulator);
                accumulator = step(accumulator, &metadata_snapshot);
                rewritten = true;
            }
            trail.push(format!("{last_version}:{}", migration.version));
            last_version = migration.version;
        }

        if rewritten {
            event.instructions = diff::extract_instructions(&accumulator);
        }
        event.metadata.ledger_version = current_version;
        event.metadata.applied_migrations.extend(trail);

        tracing::debug!(
            event = %event.id,
            entity = %event.metadata.entity,
            from_version,
            to_version = current_version,
            "migrated event"
        );
        event
    }
}
