// event.rs — Inbound policy change events.
//
// Wire shape (camelCase):
//   {"eventName": "UpdatePolicy", "policyId": "p-abc", "policyName": "...",
//    "timestamp": "2024-05-01T12:00:00Z", "policyContent": {...}, "counter": 0}
//
// `counter` is the number of translation attempts already spent on this
// change; only the orchestrator's retry logic advances it.

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use gs_policy::{hash, GovernancePolicy, PolicyError};

use crate::error::SyncError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EventName {
    CreatePolicy,
    UpdatePolicy,
    DeletePolicy,
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventName::CreatePolicy => write!(f, "CreatePolicy"),
            EventName::UpdatePolicy => write!(f, "UpdatePolicy"),
            EventName::DeletePolicy => write!(f, "DeletePolicy"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyEvent {
    pub event_name: EventName,
    pub policy_id: String,
    #[serde(default)]
    pub policy_name: String,
    pub timestamp: DateTime<Utc>,
    /// Absent for deletions. May be a JSON object or a JSON-encoded string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_content: Option<Value>,
    #[serde(default)]
    pub counter: u32,
}

impl PolicyEvent {
    pub fn new(event_name: EventName, policy_id: impl Into<String>, content: Option<Value>) -> Self {
        let policy_id = policy_id.into();
        Self {
            event_name,
            policy_name: policy_id.clone(),
            policy_id,
            timestamp: Utc::now(),
            policy_content: content,
            counter: 0,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.policy_name = name.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_counter(mut self, counter: u32) -> Self {
        self.counter = counter;
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self, SyncError> {
        let event: PolicyEvent = serde_json::from_str(json)?;
        event.check()?;
        Ok(event)
    }

    pub fn load(path: &Path) -> Result<Self, SyncError> {
        let json = std::fs::read_to_string(path).map_err(|source| SyncError::IoError {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    fn check(&self) -> Result<(), SyncError> {
        if self.policy_id.trim().is_empty() {
            return Err(SyncError::InvalidEvent("policyId is empty".to_string()));
        }
        if !self.is_delete() && self.policy_content.is_none() {
            return Err(SyncError::InvalidEvent(format!(
                "{} for '{}' carries no policyContent",
                self.event_name, self.policy_id
            )));
        }
        Ok(())
    }

    pub fn is_delete(&self) -> bool {
        self.event_name == EventName::DeletePolicy
    }

    /// Display name, falling back to the identifier.
    pub fn display_name(&self) -> &str {
        if self.policy_name.is_empty() {
            &self.policy_id
        } else {
            &self.policy_name
        }
    }

    /// Parse the carried document.
    pub fn to_policy(&self) -> Result<GovernancePolicy, PolicyError> {
        let content = self
            .policy_content
            .clone()
            .ok_or_else(|| PolicyError::EmptyDocument {
                policy_id: self.policy_id.clone(),
            })?;
        GovernancePolicy::from_value(self.policy_id.clone(), self.display_name(), content)
    }

    /// Content hash used for idempotency and coalescing. `None` for
    /// deletions; a malformed document hashes its raw JSON.
    pub fn content_hash(&self) -> Option<String> {
        if self.is_delete() {
            return None;
        }
        match self.to_policy() {
            Ok(policy) => Some(policy.content_hash),
            Err(_) => Some(hash::hash_str(
                &self
                    .policy_content
                    .as_ref()
                    .map(|c| c.to_string())
                    .unwrap_or_default(),
            )),
        }
    }
}
