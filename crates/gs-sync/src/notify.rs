// notify.rs — Outbound notifications and dispatch.
//
// The orchestrator emits one notification per run outcome. Sinks (a JSONL
// log, the tracing subscriber, anything an operator plugs in) receive every
// notification; a failing sink is logged and never blocks the workflow.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use gs_validate::{Mismatch, ReportStatus};

use crate::error::SyncError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum Notification {
    /// A validated rule set is now active.
    RuleSetCommitted {
        run_id: Uuid,
        policy_id: String,
        policy_name: String,
        generation: u64,
        source_hash: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        superseded_generation: Option<u64>,
        timestamp: DateTime<Utc>,
    },

    /// Validation found disagreements; the rule set was not committed.
    ViolationDetected {
        run_id: Uuid,
        policy_id: String,
        policy_name: String,
        generation: u64,
        status: ReportStatus,
        mismatches: Vec<Mismatch>,
        timestamp: DateTime<Utc>,
    },

    /// The run hit a permanent error or exhausted its retry budget.
    RunFailed {
        run_id: Uuid,
        policy_id: String,
        policy_name: String,
        state: String,
        error_kind: String,
        message: String,
        attempts: u32,
        timestamp: DateTime<Utc>,
    },

    /// A deleted policy's rule set was archived.
    PolicyRetired {
        run_id: Uuid,
        policy_id: String,
        policy_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        generation: Option<u64>,
        timestamp: DateTime<Utc>,
    },

    RunCancelled {
        run_id: Uuid,
        policy_id: String,
        generation: u64,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl Notification {
    /// Short name used for filtering and log lines.
    pub fn event_type(&self) -> &'static str {
        match self {
            Notification::RuleSetCommitted { .. } => "rule_set_committed",
            Notification::ViolationDetected { .. } => "violation_detected",
            Notification::RunFailed { .. } => "run_failed",
            Notification::PolicyRetired { .. } => "policy_retired",
            Notification::RunCancelled { .. } => "run_cancelled",
        }
    }

    pub fn policy_id(&self) -> &str {
        match self {
            Notification::RuleSetCommitted { policy_id, .. }
            | Notification::ViolationDetected { policy_id, .. }
            | Notification::RunFailed { policy_id, .. }
            | Notification::PolicyRetired { policy_id, .. }
            | Notification::RunCancelled { policy_id, .. } => policy_id,
        }
    }

    pub fn run_id(&self) -> Uuid {
        match self {
            Notification::RuleSetCommitted { run_id, .. }
            | Notification::ViolationDetected { run_id, .. }
            | Notification::RunFailed { run_id, .. }
            | Notification::PolicyRetired { run_id, .. }
            | Notification::RunCancelled { run_id, .. } => *run_id,
        }
    }
}

/// Anything that can receive notifications.
pub trait NotificationSink: Send + Sync {
    fn send(&self, notification: &Notification) -> Result<(), SyncError>;
}

/// Appends notifications as JSONL.
pub struct LogSink {
    path: PathBuf,
}

impl LogSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Read every notification written so far.
    pub fn read_all(path: impl AsRef<Path>) -> Result<Vec<Notification>, SyncError> {
        let path = path.as_ref();
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(SyncError::IoError {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        text.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(SyncError::from))
            .collect()
    }
}

impl NotificationSink for LogSink {
    fn send(&self, notification: &Notification) -> Result<(), SyncError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| SyncError::IoError {
                path: parent.display().to_string(),
                source,
            })?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| SyncError::IoError {
                path: self.path.display().to_string(),
                source,
            })?;

        let line = serde_json::to_string(notification)?;
        writeln!(file, "{}", line).map_err(|source| SyncError::IoError {
            path: self.path.display().to_string(),
            source,
        })?;
        Ok(())
    }
}

/// Emits notifications as log records.
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn send(&self, notification: &Notification) -> Result<(), SyncError> {
        match notification {
            Notification::RuleSetCommitted {
                policy_id,
                generation,
                superseded_generation,
                ..
            } => tracing::info!(
                policy_id = %policy_id,
                generation,
                superseded = ?superseded_generation,
                "rule set committed"
            ),
            Notification::ViolationDetected {
                policy_id,
                mismatches,
                ..
            } => {
                tracing::warn!(policy_id = %policy_id, count = mismatches.len(), "violations detected");
                for m in mismatches {
                    tracing::warn!(policy_id = %policy_id, "  {}", m);
                }
            }
            Notification::RunFailed {
                policy_id,
                state,
                error_kind,
                message,
                attempts,
                ..
            } => tracing::error!(
                policy_id = %policy_id,
                state = %state,
                kind = %error_kind,
                attempts,
                "run failed: {}",
                message
            ),
            Notification::PolicyRetired { policy_id, .. } => {
                tracing::info!(policy_id = %policy_id, "policy retired")
            }
            Notification::RunCancelled {
                policy_id, reason, ..
            } => tracing::info!(policy_id = %policy_id, reason = %reason, "run cancelled"),
        }
        Ok(())
    }
}

/// Fans notifications out to every registered sink.
#[derive(Default)]
pub struct EventDispatcher {
    sinks: Vec<Box<dyn NotificationSink>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn add_sink(&mut self, sink: Box<dyn NotificationSink>) {
        self.sinks.push(sink);
    }

    pub fn with_sink(mut self, sink: Box<dyn NotificationSink>) -> Self {
        self.add_sink(sink);
        self
    }

    /// Send to all sinks. Errors are logged, not propagated.
    pub fn dispatch(&self, notification: &Notification) {
        for sink in &self.sinks {
            if let Err(e) = sink.send(notification) {
                tracing::warn!("notification sink error: {}", e);
            }
        }
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }
}
