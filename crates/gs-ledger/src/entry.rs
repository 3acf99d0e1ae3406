// entry.rs — Ledger entry data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use gs_policy::RuleSet;

/// What happened to a rule set or identifier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LedgerAction {
    /// A rule set became the active VALID generation.
    Committed,
    /// A previously active rule set was replaced by a newer generation.
    Superseded,
    /// The identifier was deleted at the source; its active rule set removed.
    Retired,
    /// Validation found mismatches; the rule set was marked INVALID.
    Rejected,
    /// The run ended FAILED.
    Failed,
}

impl std::fmt::Display for LedgerAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LedgerAction::Committed => "committed",
            LedgerAction::Superseded => "superseded",
            LedgerAction::Retired => "retired",
            LedgerAction::Rejected => "rejected",
            LedgerAction::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One line of the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub action: LedgerAction,
    pub policy_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_set_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_hash: Option<String>,

    /// SHA-256 of the previous ledger line; `None` for the first entry.
    pub previous_hash: Option<String>,

    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl LedgerEntry {
    pub fn new(action: LedgerAction, policy_id: impl Into<String>) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            action,
            policy_id: policy_id.into(),
            run_id: None,
            rule_set_id: None,
            generation: None,
            source_hash: None,
            rule_hash: None,
            previous_hash: None,
            metadata: serde_json::Value::Null,
        }
    }

    /// Record which rule set this entry is about.
    pub fn with_rule_set(mut self, rule_set: &RuleSet) -> Self {
        self.rule_set_id = Some(rule_set.rule_set_id);
        self.generation = Some(rule_set.generation);
        self.source_hash = Some(rule_set.source_hash.clone());
        self.rule_hash = Some(rule_set.rule_hash.clone());
        self
    }

    pub fn with_run(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}
