// workflow.rs — Durable per-run workflow state.
//
// A WorkflowRun is checkpointed on every transition so a crashed worker can
// be resumed from the last recorded state with its attempt counters intact.
//
//   Idle → Translating → Validating → Committing → Idle
//                ↺             ↺    ↘ Rejecting  → Idle
//   Translating | Validating | Committing | Rejecting → Failed
//   Translating | Validating | Committing → Idle   (cancelled)

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use gs_policy::RuleSet;
use gs_validate::ValidationReport;

use crate::error::SyncError;
use crate::event::{EventName, PolicyEvent};

/// Stage of a synchronization run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Translating,
    Validating,
    Committing,
    Rejecting,
    Failed,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::Idle => write!(f, "IDLE"),
            SyncState::Translating => write!(f, "TRANSLATING"),
            SyncState::Validating => write!(f, "VALIDATING"),
            SyncState::Committing => write!(f, "COMMITTING"),
            SyncState::Rejecting => write!(f, "REJECTING"),
            SyncState::Failed => write!(f, "FAILED"),
        }
    }
}

impl SyncState {
    pub fn can_transition_to(&self, next: SyncState) -> bool {
        use SyncState::*;
        matches!(
            (self, next),
            (Idle, Translating)
                | (Translating, Translating)
                | (Translating, Validating)
                | (Validating, Validating)
                | (Validating, Committing)
                | (Validating, Rejecting)
                | (Committing, Idle)
                | (Rejecting, Idle)
                | (Translating, Idle)
                | (Validating, Idle)
                | (Idle, Failed)
                | (Translating, Failed)
                | (Validating, Failed)
                | (Committing, Failed)
                | (Rejecting, Failed)
        )
    }
}

/// How a run (or an event that never became a run) ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// A new rule set is active.
    Committed,
    /// Validation found mismatches; the prior rule set stays active.
    Rejected,
    /// A permanent error or an exhausted retry budget.
    Failed,
    /// Superseded, lost its lease, or cancelled by an operator.
    Cancelled,
    /// The content hash matches the active rule set; nothing to do.
    Duplicate,
    /// Another run owns the identifier; the event waits in the pending slot.
    Queued,
    /// A deletion archived the active rule set.
    Retired,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunOutcome::Committed => "committed",
            RunOutcome::Rejected => "rejected",
            RunOutcome::Failed => "failed",
            RunOutcome::Cancelled => "cancelled",
            RunOutcome::Duplicate => "duplicate",
            RunOutcome::Queued => "queued",
            RunOutcome::Retired => "retired",
        };
        f.write_str(s)
    }
}

/// The last error a run recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// State in which the error occurred.
    pub state: SyncState,
    /// Stable kind tag (e.g. "translation_transient", "timeout").
    pub kind: String,
    pub message: String,
    /// Attempt number at that state, 1-based.
    pub attempt: u32,
    pub transient: bool,
    pub at: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn new(
        state: SyncState,
        kind: impl Into<String>,
        message: impl Into<String>,
        attempt: u32,
        transient: bool,
    ) -> Self {
        Self {
            state,
            kind: kind.into(),
            message: message.into(),
            attempt,
            transient,
            at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: SyncState,
    pub to: SyncState,
    pub at: DateTime<Utc>,
}

/// One execution of the synchronization workflow for one event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub run_id: Uuid,
    pub policy_id: String,
    pub policy_name: String,
    pub event_name: EventName,

    /// Empty for deletions.
    pub content_hash: String,

    /// Allocated at run creation; zero for deletions.
    pub generation: u64,

    pub state: SyncState,

    /// Seeded from the event's counter.
    pub translate_attempts: u32,
    pub validate_attempts: u32,
    pub commit_attempts: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_set: Option<RuleSet>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<ValidationReport>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ErrorRecord>,

    /// Set once the run is finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<RunOutcome>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,

    /// Worker that last drove this run.
    pub owner: String,

    /// The triggering event, kept so the run can be resumed.
    pub event: PolicyEvent,

    #[serde(default)]
    pub transitions: Vec<TransitionRecord>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRun {
    pub fn new(run_id: Uuid, event: PolicyEvent, generation: u64, owner: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            policy_id: event.policy_id.clone(),
            policy_name: event.display_name().to_string(),
            event_name: event.event_name,
            content_hash: event.content_hash().unwrap_or_default(),
            generation,
            state: SyncState::Idle,
            translate_attempts: event.counter,
            validate_attempts: 0,
            commit_attempts: 0,
            rule_set: None,
            report: None,
            last_error: None,
            outcome: None,
            cancel_reason: None,
            owner: owner.into(),
            event,
            transitions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Transition to a new state. Returns an error if the transition is invalid.
    pub fn transition(&mut self, next: SyncState) -> Result<(), SyncError> {
        if !self.state.can_transition_to(next) {
            return Err(SyncError::InvalidTransition {
                run_id: self.run_id,
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        let now = Utc::now();
        self.transitions.push(TransitionRecord {
            from: self.state,
            to: next,
            at: now,
        });
        self.state = next;
        self.updated_at = now;
        Ok(())
    }

    /// Mark the run finished.
    pub fn finish(&mut self, outcome: RunOutcome) {
        self.outcome = Some(outcome);
        self.updated_at = Utc::now();
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some() || self.state == SyncState::Failed
    }

    /// Did the run ever enter `state`?
    pub fn visited(&self, state: SyncState) -> bool {
        self.transitions.iter().any(|t| t.to == state)
    }

    pub fn record_error(&mut self, error: ErrorRecord) {
        self.last_error = Some(error);
        self.updated_at = Utc::now();
    }
}
