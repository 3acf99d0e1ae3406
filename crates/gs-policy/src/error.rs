// error.rs — Error types for the policy data model.

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur while parsing or manipulating policy data.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The governance document is structurally invalid.
    #[error("malformed policy '{policy_id}': {reason}")]
    Malformed { policy_id: String, reason: String },

    /// The governance document has no statements.
    #[error("policy '{policy_id}' has no statements")]
    EmptyDocument { policy_id: String },

    /// Invalid rule set status transition.
    #[error("invalid transition from {from} to {to} for rule set {rule_set_id}")]
    InvalidTransition {
        rule_set_id: Uuid,
        from: String,
        to: String,
    },

    /// A verdict label could not be parsed.
    #[error("unknown verdict '{0}' (expected allow|deny|pass|fail)")]
    UnknownVerdict(String),

    /// A verdict mode could not be parsed.
    #[error("unknown verdict mode '{0}' (expected deny_set|allow_bool|deny_bool)")]
    UnknownMode(String),

    /// A file I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: String,
        source: std::io::Error,
    },

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// YAML deserialization failed.
    #[error("yaml error: {0}")]
    YamlError(#[from] serde_yaml::Error),
}
