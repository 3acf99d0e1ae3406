//! # gs-sync
//!
//! Event-driven synchronization of generated rule sets with their source
//! governance policies.
//!
//! A [`PolicyEvent`] (create, update, delete) starts a [`WorkflowRun`] that
//! the [`Orchestrator`] drives through translation, differential validation
//! and commit or rejection, retrying transient failures within a budget.
//!
//! ## Key components
//!
//! - [`Orchestrator`] — the state machine (Idle → Translating → Validating
//!   → Committing | Rejecting → Idle, or Failed)
//! - [`SyncStore`] — durable checkpoints, single-flight leases, generation
//!   counters, the pending slot and cancellation markers
//! - [`RuleSink`] / [`FileRuleStore`] — the active rule set per policy,
//!   installed by compare-and-swap on the generation
//! - [`EventDispatcher`] — fans [`Notification`]s out to sinks
//!
//! ## Key invariants
//!
//! - At most one run holds a policy identifier's lease at a time.
//! - Generations strictly increase per identifier; a commit only succeeds
//!   against an older active generation.
//! - Every transition is checkpointed before the next external call.

pub mod backoff;
pub mod config;
pub mod error;
pub mod event;
pub mod notify;
pub mod orchestrator;
pub mod sink;
pub mod store;
pub mod workflow;

pub use backoff::Backoff;
pub use config::{StatePaths, SyncConfig, TranslatorKind};
pub use error::{PersistenceError, SyncError};
pub use event::{EventName, PolicyEvent};
pub use notify::{EventDispatcher, LogSink, Notification, NotificationSink, TracingSink};
pub use orchestrator::{CancelReason, Orchestrator, RunReport, RunSettings};
pub use sink::{ActiveRecord, CommitOutcome, CommitReceipt, FileRuleStore, RuleSink};
pub use store::{Lease, LeaseAcquisition, PendingCheck, SyncStore};
pub use workflow::{ErrorRecord, RunOutcome, SyncState, WorkflowRun};
