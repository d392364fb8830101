//! The container registry: every singleton, collection, and copy-list a
//! ledger owns, keyed by name.

use indexmap::IndexMap;
use serde::Serialize;

use crate::copies::CopyList;
use crate::entity::{Copy, Entity};
use crate::error::LedgerError;
use crate::event::BreakpointTag;
use crate::ledger::SerializedLedger;
use crate::list::EntityList;
use crate::migration::MigrationRegistry;
use crate::reference::ReferenceKind;
use crate::singleton::EntitySingleton;

/// The fully reconstructed state of every container in a ledger.
///
/// Uninitiated singletons (and singletons whose create event postdates the
/// requested breakpoint) are omitted from `entities`; collections and
/// copy-lists always appear, possibly with empty arrays.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerSnapshot {
    /// Singleton entities by container name.
    pub entities: IndexMap<String, Entity>,
    /// Collection entities by container name.
    pub list_entities: IndexMap<String, Vec<Entity>>,
    /// Copy records by container name.
    pub copies: IndexMap<String, Vec<Copy>>,
}

/// Name→container maps for the three container kinds.
///
/// Containers are registered once at build time and live for the ledger's
/// lifetime; names are unique across all three kinds.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    singletons: IndexMap<String, EntitySingleton>,
    lists: IndexMap<String, EntityList>,
    copies: IndexMap<String, CopyList>,
}

impl Registry {
    fn ensure_name_free(&self, name: &str) -> Result<(), LedgerError> {
        if name.is_empty() {
            return Err(LedgerError::EntityNameNotSpecified);
        }
        if self.singletons.contains_key(name)
            || self.lists.contains_key(name)
            || self.copies.contains_key(name)
        {
            return Err(LedgerError::DuplicateEntity {
                name: name.to_owned(),
            });
        }
        Ok(())
    }

    pub(crate) fn register_singleton(&mut self, name: String) -> Result<(), LedgerError> {
        self.ensure_name_free(&name)?;
        self.singletons
            .insert(name.clone(), EntitySingleton::new(name));
        Ok(())
    }

    pub(crate) fn register_list(&mut self, name: String) -> Result<(), LedgerError> {
        self.ensure_name_free(&name)?;
        self.lists.insert(name.clone(), EntityList::new(name));
        Ok(())
    }

    pub(crate) fn register_copies(&mut self, name: String) -> Result<(), LedgerError> {
        self.ensure_name_free(&name)?;
        self.copies.insert(name.clone(), CopyList::new(name));
        Ok(())
    }

    pub(crate) fn singleton(&self, name: &str) -> Result<&EntitySingleton, LedgerError> {
        self.singletons
            .get(name)
            .ok_or_else(|| LedgerError::UnknownEntityName {
                name: name.to_owned(),
            })
    }

    pub(crate) fn singleton_mut(&mut self, name: &str) -> Result<&mut EntitySingleton, LedgerError> {
        self.singletons
            .get_mut(name)
            .ok_or_else(|| LedgerError::UnknownEntityName {
                name: name.to_owned(),
            })
    }

    pub(crate) fn list(&self, name: &str) -> Result<&EntityList, LedgerError> {
        self.lists
            .get(name)
            .ok_or_else(|| LedgerError::UnknownEntityName {
                name: name.to_owned(),
            })
    }

    pub(crate) fn list_mut(&mut self, name: &str) -> Result<&mut EntityList, LedgerError> {
        self.lists
            .get_mut(name)
            .ok_or_else(|| LedgerError::UnknownEntityName {
                name: name.to_owned(),
            })
    }

    pub(crate) fn copy_list(&self, name: &str) -> Result<&CopyList, LedgerError> {
        self.copies
            .get(name)
            .ok_or_else(|| LedgerError::UnknownEntityName {
                name: name.to_owned(),
            })
    }

    pub(crate) fn copy_list_mut(&mut self, name: &str) -> Result<&mut CopyList, LedgerError> {
        self.copies
            .get_mut(name)
            .ok_or_else(|| LedgerError::UnknownEntityName {
                name: name.to_owned(),
            })
    }

    pub(crate) fn singletons_mut(
        &mut self,
    ) -> impl Iterator<Item = (&String, &mut EntitySingleton)> {
        self.singletons.iter_mut()
    }

    pub(crate) fn lists_mut(&mut self) -> impl Iterator<Item = (&String, &mut EntityList)> {
        self.lists.iter_mut()
    }

    /// Find which container holds the given identity.
    ///
    /// Probe order fixes a reference's kind: singletons first, then
    /// collections, then copy-lists; the first match wins.
    pub(crate) fn locate(&self, id: &str) -> Option<(ReferenceKind, &str)> {
        if id.is_empty() {
            return None;
        }
        for (name, singleton) in &self.singletons {
            if singleton.current_id().as_deref() == Some(id) {
                return Some((ReferenceKind::Singleton, name));
            }
        }
        for (name, list) in &self.lists {
            if list.exists(id) {
                return Some((ReferenceKind::List, name));
            }
        }
        for (name, copies) in &self.copies {
            if copies.view().contains_key(id) {
                return Some((ReferenceKind::Copy, name));
            }
        }
        None
    }

    /// Reconstruct every container's state, optionally as of a breakpoint.
    /// The tag must already be validated against the breakpoint log.
    pub(crate) fn snapshot(
        &self,
        tag: Option<&BreakpointTag>,
    ) -> Result<LedgerSnapshot, LedgerError> {
        let mut snapshot = LedgerSnapshot::default();

        for (name, singleton) in &self.singletons {
            match singleton.materialize(tag) {
                Ok(entity) => {
                    snapshot.entities.insert(name.clone(), entity);
                }
                Err(LedgerError::EntityNotYetCreated { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        for (name, list) in &self.lists {
            snapshot
                .list_entities
                .insert(name.clone(), list.materialize_all(tag)?);
        }
        for (name, copies) in &self.copies {
            snapshot
                .copies
                .insert(name.clone(), copies.view().values().cloned().collect());
        }

        Ok(snapshot)
    }

    /// Serialize every container's committed state into `out`.
    pub(crate) fn serialize_into(&self, out: &mut SerializedLedger) {
        for (name, singleton) in &self.singletons {
            out.entities.insert(name.clone(), singleton.serialize());
        }
        for (name, list) in &self.lists {
            out.list_entities.insert(name.clone(), list.serialize());
        }
        for (name, copies) in &self.copies {
            out.copies.insert(name.clone(), copies.serialize());
        }
    }

    /// Load serialized state into the registered containers, passing every
    /// event through the migration controller on the way in.
    ///
    /// Names present in the data but not registered here are rejected;
    /// registered containers absent from the data simply stay empty.
    pub(crate) fn load_from(
        &mut self,
        migrations: &MigrationRegistry,
        current_version: u32,
        data: &SerializedLedger,
    ) -> Result<(), LedgerError> {
        for (name, events) in &data.entities {
            let singleton = self.singleton_mut(name)?;
            let migrated = events
                .iter()
                .map(|e| migrations.migrate_event(e.clone(), current_version))
                .collect();
            singleton.load(migrated)?;
            tracing::debug!(entity = %name, "loaded singleton");
        }
        for (name, entries) in &data.list_entities {
            let list = self.list_mut(name)?;
            let migrated = entries
                .iter()
                .map(|(id, events)| {
                    (
                        id.clone(),
                        events
                            .iter()
                            .map(|e| migrations.migrate_event(e.clone(), current_version))
                            .collect(),
                    )
                })
                .collect();
            list.load(migrated)?;
            tracing::debug!(entity = %name, "loaded collection");
        }
        for (name, records) in &data.copies {
            let copies = self.copy_list_mut(name)?;
            copies.load(records.clone())?;
            tracing::debug!(container = %name, "loaded copy-list");
        }
        Ok(())
    }
}
