//! Embeddable event-sourced state engine.
//!
//! Domain objects ("entities") are never stored as mutable rows: they are
//! reconstructed deterministically by replaying an ordered, append-only log
//! of diff-style [`Event`]s. On top of that core, a [`Ledger`] provides:
//!
//! - **Containers** -- [singletons](Ledger::singleton) (exactly one
//!   identity), [collections](Ledger::list) (many identities of one kind),
//!   and [copy-lists](Ledger::copies) (plain records with no history).
//! - **Transactions** -- all-or-nothing batches across any number of
//!   containers, with copy-on-write staging and no backing database
//!   ([`Ledger::tx`]).
//! - **Breakpoints** -- named checkpoints injected into every history, so
//!   any state can be read "as of" a point in time
//!   ([`Ledger::add_breakpoint`], `*_as_of` reads).
//! - **Migrations** -- version-tagged rewrites applied lazily to historical
//!   events on load, so logs written by old application versions load into
//!   new ones ([`Migration`]).
//! - **References** -- serializable pointers resolved only inside the
//!   ledger that minted them ([`Ledger::create_reference`]).
//!
//! The kernel is fully synchronous, does no I/O, and assumes a single
//! logical writer; embedding applications own persistence and concurrency
//! control around the serializable form ([`Ledger::serialize`] /
//! [`LedgerBuilder::load`]).
//!
//! ```
//! use ledgerfold::{EventOptions, Ledger};
//! use serde_json::json;
//!
//! let mut ledger = Ledger::builder("crm", 1)
//!     .singleton("Settings")
//!     .list("Contact")
//!     .build()?;
//!
//! // All-or-nothing setup across two containers.
//! ledger.tx(|l| {
//!     l.singleton("Settings")?
//!         .create(&json!({"locale": "en"}), EventOptions::default())?;
//!     l.list("Contact")?
//!         .create(&json!({"id": "ada", "email": "ada@example.com"}), EventOptions::default())
//! })?;
//!
//! ledger.add_breakpoint("onboarded")?;
//! ledger.list("Contact")?.change(
//!     "ada",
//!     &json!({"email": "ada@lovelace.dev"}),
//!     EventOptions::default(),
//! )?;
//!
//! // Current state vs. state as of the breakpoint.
//! let now = ledger.list("Contact")?.get("ada")?;
//! assert_eq!(now.field("email"), Some(&json!("ada@lovelace.dev")));
//! let then = ledger.list("Contact")?.get_as_of("ada", &"onboarded".into())?;
//! assert_eq!(then.field("email"), Some(&json!("ada@example.com")));
//! # Ok::<(), ledgerfold::LedgerError>(())
//! ```

mod breakpoint;
mod copies;
mod diff;
mod entity;
mod error;
mod event;
mod history;
mod ledger;
mod list;
mod migration;
mod reference;
mod registry;
mod services;
mod singleton;
mod transaction;

pub use breakpoint::BreakpointEntry;
pub use copies::CopyListHandle;
pub use diff::{apply_instructions, extract_instructions, ChangeInstruction, PathSegment};
pub use entity::{Copy, Entity};
pub use error::LedgerError;
pub use event::{BreakpointTag, Event, EventKind, EventMetadata, EventOptions, Timestamp};
pub use ledger::{HistoricalSnapshot, Ledger, LedgerBuilder, SerializedLedger};
pub use list::ListHandle;
pub use migration::{LedgerHook, MigrateFn, Migration};
pub use reference::{Reference, ReferenceKind, Resolved};
pub use registry::LedgerSnapshot;
pub use services::{Clock, IdSource, ManualClock, SequenceIds, SystemClock, UuidIds};
pub use singleton::SingletonHandle;
