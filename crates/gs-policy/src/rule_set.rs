// rule_set.rs — Generated rule sets and their lifecycle.
//
// A RuleSet is the executable rule text derived from one GovernancePolicy
// content hash. Generations increase strictly per policy identifier; only the
// highest-generation VALID rule set is active.
//
//   Pending → Valid → Superseded
//   Pending → Invalid
//   Pending → Superseded   (overtaken by a newer committed generation)

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::document::GovernancePolicy;
use crate::error::PolicyError;
use crate::hash;

/// Lifecycle status of a rule set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuleSetStatus {
    /// Translated, not yet validated.
    Pending,
    /// Validated and committed; active until superseded.
    Valid,
    /// Failed differential validation.
    Invalid,
    /// Replaced by a strictly newer generation.
    Superseded,
}

impl fmt::Display for RuleSetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleSetStatus::Pending => write!(f, "pending"),
            RuleSetStatus::Valid => write!(f, "valid"),
            RuleSetStatus::Invalid => write!(f, "invalid"),
            RuleSetStatus::Superseded => write!(f, "superseded"),
        }
    }
}

impl RuleSetStatus {
    pub fn can_transition_to(&self, next: RuleSetStatus) -> bool {
        matches!(
            (self, next),
            (RuleSetStatus::Pending, RuleSetStatus::Valid)
                | (RuleSetStatus::Pending, RuleSetStatus::Invalid)
                | (RuleSetStatus::Pending, RuleSetStatus::Superseded)
                | (RuleSetStatus::Valid, RuleSetStatus::Superseded)
        )
    }
}

/// Generated rule text plus provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    pub rule_set_id: Uuid,

    /// Identifier of the GovernancePolicy this was derived from.
    pub policy_id: String,

    /// Content hash of the GovernancePolicy this was derived from.
    pub source_hash: String,

    /// Strictly increasing per `policy_id`.
    pub generation: u64,

    pub rule_text: String,

    /// SHA-256 of `rule_text`.
    pub rule_hash: String,

    pub status: RuleSetStatus,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RuleSet {
    /// A freshly translated rule set in the Pending state.
    pub fn pending(policy: &GovernancePolicy, generation: u64, rule_text: impl Into<String>) -> Self {
        let rule_text = rule_text.into();
        let now = Utc::now();
        Self {
            rule_set_id: Uuid::new_v4(),
            policy_id: policy.policy_id.clone(),
            source_hash: policy.content_hash.clone(),
            generation,
            rule_hash: hash::hash_str(&rule_text),
            rule_text,
            status: RuleSetStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Transition to a new status. Returns an error if the transition is invalid.
    pub fn transition(&mut self, next: RuleSetStatus) -> Result<(), PolicyError> {
        if !self.status.can_transition_to(next) {
            return Err(PolicyError::InvalidTransition {
                rule_set_id: self.rule_set_id,
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.status == RuleSetStatus::Valid
    }
}
