//! # gs-ledger
//!
//! Append-only ledger of rule set outcomes.
//!
//! Every commit, supersede, retirement, rejection and failure is recorded as
//! a [`LedgerEntry`] in a JSONL file. Each entry carries the SHA-256 of the
//! previous line, so inserting, deleting or editing an entry breaks the
//! chain and is caught by [`Ledger::verify_chain`].
//!
//! ```rust,no_run
//! use gs_ledger::{Ledger, LedgerAction, LedgerEntry};
//!
//! let ledger = Ledger::open("/tmp/ledger.jsonl").unwrap();
//! let mut entry = LedgerEntry::new(LedgerAction::Retired, "p-abc123");
//! ledger.append(&mut entry).unwrap();
//! ```

pub mod entry;
pub mod error;
pub mod ledger;
pub mod lock;

pub use entry::{LedgerAction, LedgerEntry};
pub use error::LedgerError;
pub use ledger::Ledger;
pub use lock::FileLock;
