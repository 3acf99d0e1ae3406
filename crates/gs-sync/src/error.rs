// error.rs — Error types for the synchronization subsystem.

use thiserror::Error;
use uuid::Uuid;

/// Failure of the durable store or the persistence sink.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Lock timeouts and interrupted I/O. Retryable.
    #[error("transient persistence failure at {path}: {reason}")]
    Transient { path: String, reason: String },

    /// Corrupt records, permission errors, missing directories.
    #[error("persistence failure at {path}: {reason}")]
    Permanent { path: String, reason: String },
}

impl PersistenceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, PersistenceError::Transient { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PersistenceError::Transient { .. } => "persistence_transient",
            PersistenceError::Permanent { .. } => "persistence_permanent",
        }
    }

    pub(crate) fn io(path: &std::path::Path, err: std::io::Error) -> Self {
        let path = path.display().to_string();
        match err.kind() {
            std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::WouldBlock => PersistenceError::Transient {
                path,
                reason: err.to_string(),
            },
            _ => PersistenceError::Permanent {
                path,
                reason: err.to_string(),
            },
        }
    }

    pub(crate) fn corrupt(path: &std::path::Path, err: impl std::fmt::Display) -> Self {
        PersistenceError::Permanent {
            path: path.display().to_string(),
            reason: err.to_string(),
        }
    }
}

impl From<gs_ledger::LedgerError> for PersistenceError {
    fn from(err: gs_ledger::LedgerError) -> Self {
        match err {
            gs_ledger::LedgerError::WriteFailed(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                PersistenceError::Transient {
                    path: "ledger".to_string(),
                    reason: e.to_string(),
                }
            }
            other => PersistenceError::Permanent {
                path: "ledger".to_string(),
                reason: other.to_string(),
            },
        }
    }
}

/// Errors surfaced by the orchestrator and its collaborators.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Policy(#[from] gs_policy::PolicyError),

    #[error(transparent)]
    Validate(#[from] gs_validate::ValidateError),

    /// Another run owns the identifier. Callers normally see `Queued`
    /// instead; this surfaces only from explicit lease operations.
    #[error("policy '{policy_id}' is locked by {owner} until {expires_at}")]
    LockContention {
        policy_id: String,
        owner: String,
        expires_at: chrono::DateTime<chrono::Utc>,
    },

    /// Invalid workflow state transition.
    #[error("invalid transition from {from} to {to} for run {run_id}")]
    InvalidTransition { run_id: Uuid, from: String, to: String },

    #[error("workflow run not found: {0}")]
    RunNotFound(Uuid),

    /// The inbound event is structurally unusable.
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("invalid configuration at {path}: {reason}")]
    Config { path: String, reason: String },

    #[error("I/O error at {path}: {source}")]
    IoError {
        path: String,
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// A notification sink failed (non-fatal; logged by the dispatcher).
    #[error("notification error: {0}")]
    NotificationError(String),
}
