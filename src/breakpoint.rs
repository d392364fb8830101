//! The ledger's breakpoint log.
//!
//! Breakpoints are named (or numbered) checkpoints. Recording one stamps a
//! `{tag, createdAt}` entry here and injects a marker event into every
//! initiated history, so any container can later be read "as of" the tag.
//! The injection itself is driven by the ledger, which owns both this log
//! and the containers.

use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::event::{BreakpointTag, Timestamp};

/// One recorded breakpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointEntry {
    /// The caller-chosen tag.
    #[serde(rename = "breakpointID")]
    pub breakpoint_id: BreakpointTag,
    /// When the breakpoint was recorded.
    pub created_at: Timestamp,
}

/// Append-only log of recorded breakpoints, in creation order.
#[derive(Debug, Default)]
pub(crate) struct BreakpointController {
    entries: Vec<BreakpointEntry>,
}

impl BreakpointController {
    pub(crate) fn contains(&self, tag: &BreakpointTag) -> bool {
        self.entries.iter().any(|e| &e.breakpoint_id == tag)
    }

    /// Fail with [`LedgerError::BreakpointDoesNotExist`] unless `tag` was
    /// recorded on this ledger.
    pub(crate) fn ensure_exists(&self, tag: &BreakpointTag) -> Result<(), LedgerError> {
        if self.contains(tag) {
            Ok(())
        } else {
            Err(LedgerError::BreakpointDoesNotExist { tag: tag.clone() })
        }
    }

    /// Record a new breakpoint. The caller has already checked uniqueness.
    pub(crate) fn record(&mut self, tag: BreakpointTag, created_at: Timestamp) {
        self.entries.push(BreakpointEntry {
            breakpoint_id: tag,
            created_at,
        });
    }

    /// Tags in creation order.
    pub(crate) fn tags(&self) -> impl Iterator<Item = &BreakpointTag> {
        self.entries.iter().map(|e| &e.breakpoint_id)
    }

    pub(crate) fn entries(&self) -> &[BreakpointEntry] {
        &self.entries
    }

    /// Replace the log with deserialized entries, sorted by creation time.
    pub(crate) fn load(&mut self, mut entries: Vec<BreakpointEntry>) -> Result<(), LedgerError> {
        if !self.entries.is_empty() {
            return Err(LedgerError::DeserializingOnNonEmptyLedger {
                container: "ledgerBreakpoints".to_owned(),
            });
        }
        entries.sort_by_key(|e| e.created_at);
        tracing::debug!(count = entries.len(), "loaded breakpoint log");
        self.entries = entries;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_then_lookup() {
        let mut log = BreakpointController::default();
        log.record("bp1".into(), 100);

        assert!(log.contains(&"bp1".into()));
        assert!(!log.contains(&"bp2".into()));
        assert!(log.ensure_exists(&"bp1".into()).is_ok());
    }

    #[test]
    fn unknown_tag_is_an_error() {
        let log = BreakpointController::default();
        let err = log.ensure_exists(&"ghost".into()).unwrap_err();
        assert_eq!(err.code(), "BREAKPOINT_DOES_NOT_EXIST");
    }

    #[test]
    fn tags_come_back_in_creation_order() {
        let mut log = BreakpointController::default();
        log.record("b".into(), 1);
        log.record("a".into(), 2);

        let tags: Vec<String> = log.tags().map(ToString::to_string).collect();
        assert_eq!(tags, vec!["b", "a"]);
    }

    #[test]
    fn load_sorts_by_creation_time() {
        let mut log = BreakpointController::default();
        log.load(vec![
            BreakpointEntry {
                breakpoint_id: "late".into(),
                created_at: 200,
            },
            BreakpointEntry {
                breakpoint_id: "early".into(),
                created_at: 100,
            },
        ])
        .unwrap();

        let tags: Vec<String> = log.tags().map(ToString::to_string).collect();
        assert_eq!(tags, vec!["early", "late"]);
    }

    #[test]
    fn load_refuses_a_populated_log() {
        let mut log = BreakpointController::default();
        log.record("bp1".into(), 1);

        let err = log
            .load(vec![BreakpointEntry {
                breakpoint_id: "bp2".into(),
                created_at: 2,
            }])
            .unwrap_err();
        assert_eq!(err.code(), "DESERIALIZING_ON_NON_EMPTY_LEDGER");
    }

    #[test]
    fn entry_serializes_with_wire_names() {
        let entry = BreakpointEntry {
            breakpoint_id: "bp1".into(),
            created_at: 42,
        };
        let encoded = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            encoded,
            serde_json::json!({"breakpointID": "bp1", "createdAt": 42})
        );
    }
}
