// document.rs — Governance policy documents.
//
// The document tree follows the SCP/IAM JSON grammar: an optional version and
// one or more statements, each with an effect, action and resource patterns
// (or their Not* complements) and an optional condition block. Single values
// and lists are both accepted on input and always normalised to lists, which
// keeps the canonical JSON (and therefore the content hash) stable.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::PolicyError;
use crate::hash;

/// Statement effect.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Effect {
    Allow,
    Deny,
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::Allow => write!(f, "Allow"),
            Effect::Deny => write!(f, "Deny"),
        }
    }
}

/// Values of one condition key; a scalar on the wire becomes a one-element list.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ConditionValues(pub Vec<Value>);

impl<'de> Deserialize<'de> for ConditionValues {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        one_or_many(deserializer).map(ConditionValues)
    }
}

impl ConditionValues {
    /// Render each value as a plain string (strings unquoted, others as JSON).
    pub fn as_strings(&self) -> Vec<String> {
        self.0.iter().map(value_to_string).collect()
    }
}

/// Condition operator → (context key → values).
pub type ConditionBlock = BTreeMap<String, BTreeMap<String, ConditionValues>>;

/// One statement of a governance document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    #[serde(rename = "Sid", default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,

    #[serde(rename = "Effect")]
    pub effect: Effect,

    #[serde(
        rename = "Action",
        default,
        deserialize_with = "opt_one_or_many",
        skip_serializing_if = "Option::is_none"
    )]
    pub action: Option<Vec<String>>,

    #[serde(
        rename = "NotAction",
        default,
        deserialize_with = "opt_one_or_many",
        skip_serializing_if = "Option::is_none"
    )]
    pub not_action: Option<Vec<String>>,

    #[serde(
        rename = "Resource",
        default,
        deserialize_with = "opt_one_or_many",
        skip_serializing_if = "Option::is_none"
    )]
    pub resource: Option<Vec<String>>,

    #[serde(
        rename = "NotResource",
        default,
        deserialize_with = "opt_one_or_many",
        skip_serializing_if = "Option::is_none"
    )]
    pub not_resource: Option<Vec<String>>,

    #[serde(rename = "Condition", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub condition: ConditionBlock,
}

impl Statement {
    /// A Deny statement over the given actions on every resource.
    pub fn deny(actions: &[&str]) -> Self {
        Self {
            sid: None,
            effect: Effect::Deny,
            action: Some(actions.iter().map(|a| a.to_string()).collect()),
            not_action: None,
            resource: Some(vec!["*".to_string()]),
            not_resource: None,
            condition: BTreeMap::new(),
        }
    }

    /// An Allow statement over the given actions on every resource.
    pub fn allow(actions: &[&str]) -> Self {
        Self {
            effect: Effect::Allow,
            ..Self::deny(actions)
        }
    }

    /// Restrict the statement to the given resource patterns.
    pub fn with_resources(mut self, resources: &[&str]) -> Self {
        self.resource = Some(resources.iter().map(|r| r.to_string()).collect());
        self
    }

    /// Add a condition `operator: { key: values }`.
    pub fn with_condition(mut self, operator: &str, key: &str, values: Vec<Value>) -> Self {
        self.condition
            .entry(operator.to_string())
            .or_default()
            .insert(key.to_string(), ConditionValues(values));
        self
    }

    /// Label used in diagnostics: the Sid if present, otherwise the index.
    pub fn label(&self, index: usize) -> String {
        match &self.sid {
            Some(sid) => sid.clone(),
            None => format!("Statement {}", index),
        }
    }

    fn check(&self, policy_id: &str, index: usize) -> Result<(), PolicyError> {
        if self.action.is_some() && self.not_action.is_some() {
            return Err(PolicyError::Malformed {
                policy_id: policy_id.to_string(),
                reason: format!(
                    "{} cannot have both Action and NotAction",
                    self.label(index)
                ),
            });
        }
        if self.resource.is_some() && self.not_resource.is_some() {
            return Err(PolicyError::Malformed {
                policy_id: policy_id.to_string(),
                reason: format!(
                    "{} cannot have both Resource and NotResource",
                    self.label(index)
                ),
            });
        }
        Ok(())
    }
}

/// A parsed governance document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDocument {
    #[serde(rename = "Version", default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(rename = "Statement", deserialize_with = "one_or_many")]
    pub statements: Vec<Statement>,
}

impl PolicyDocument {
    pub fn new(statements: Vec<Statement>) -> Self {
        Self {
            version: Some("2012-10-17".to_string()),
            statements,
        }
    }

    /// Parse a document from raw JSON.
    ///
    /// Accepts the document itself, a JSON-encoded string of it, or the
    /// `{"Policy": {"Content": "..."}}` / `{"Content": "..."}` wrappers that
    /// control-plane describe calls return.
    pub fn from_value(policy_id: &str, value: Value) -> Result<Self, PolicyError> {
        let value = unwrap_content(policy_id, value)?;
        serde_json::from_value(value).map_err(|e| PolicyError::Malformed {
            policy_id: policy_id.to_string(),
            reason: e.to_string(),
        })
    }

    /// Canonical JSON: fixed field order, sorted condition maps, lists only.
    pub fn canonical_json(&self) -> Result<String, PolicyError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// The source-of-truth authorization document for one identifier.
///
/// Immutable once built; a changed document is a new `GovernancePolicy` with
/// the same `policy_id` and a different `content_hash`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernancePolicy {
    /// Identifier, unique per source system (e.g., "p-abc123").
    pub policy_id: String,

    /// Display name.
    pub name: String,

    /// SHA-256 of the canonical document JSON.
    pub content_hash: String,

    pub document: PolicyDocument,
}

impl GovernancePolicy {
    /// Build a policy, checking well-formedness and computing the content hash.
    pub fn new(
        policy_id: impl Into<String>,
        name: impl Into<String>,
        document: PolicyDocument,
    ) -> Result<Self, PolicyError> {
        let policy_id = policy_id.into();
        if policy_id.trim().is_empty() {
            return Err(PolicyError::Malformed {
                policy_id,
                reason: "policy identifier is empty".to_string(),
            });
        }
        if document.statements.is_empty() {
            return Err(PolicyError::EmptyDocument { policy_id });
        }
        for (index, statement) in document.statements.iter().enumerate() {
            statement.check(&policy_id, index)?;
        }
        let content_hash = hash::hash_str(&document.canonical_json()?);
        Ok(Self {
            policy_id,
            name: name.into(),
            content_hash,
            document,
        })
    }

    /// Parse and build a policy from raw JSON content.
    pub fn from_value(
        policy_id: impl Into<String>,
        name: impl Into<String>,
        content: Value,
    ) -> Result<Self, PolicyError> {
        let policy_id = policy_id.into();
        let document = PolicyDocument::from_value(&policy_id, content)?;
        Self::new(policy_id, name, document)
    }

    /// Load a policy document from a JSON file; the file stem is used as
    /// both identifier and name unless the caller renames it.
    pub fn load(path: &std::path::Path) -> Result<Self, PolicyError> {
        let json = std::fs::read_to_string(path).map_err(|source| PolicyError::IoError {
            path: path.display().to_string(),
            source,
        })?;
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let value: Value = serde_json::from_str(&json)?;
        Self::from_value(stem.clone(), stem, value)
    }

    /// Is this document an allow-list (contains at least one Allow statement)?
    pub fn has_allow_statements(&self) -> bool {
        self.document
            .statements
            .iter()
            .any(|s| s.effect == Effect::Allow)
    }
}

fn unwrap_content(policy_id: &str, value: Value) -> Result<Value, PolicyError> {
    match value {
        Value::String(raw) => {
            let inner: Value = serde_json::from_str(&raw).map_err(|e| PolicyError::Malformed {
                policy_id: policy_id.to_string(),
                reason: format!("policy content is not valid JSON: {}", e),
            })?;
            unwrap_content(policy_id, inner)
        }
        Value::Object(mut map) => {
            if let Some(Value::Object(mut policy)) = map.remove("Policy") {
                if let Some(content) = policy.remove("Content") {
                    return unwrap_content(policy_id, content);
                }
                return Ok(Value::Object(policy));
            }
            if !map.contains_key("Statement") {
                if let Some(content) = map.remove("Content") {
                    return unwrap_content(policy_id, content);
                }
            }
            Ok(Value::Object(map))
        }
        other => Err(PolicyError::Malformed {
            policy_id: policy_id.to_string(),
            reason: format!("expected a JSON object, got {}", other),
        }),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(match OneOrMany::<T>::deserialize(deserializer)? {
        OneOrMany::Many(items) => items,
        OneOrMany::One(item) => vec![item],
    })
}

fn opt_one_or_many<'de, D, T>(deserializer: D) -> Result<Option<Vec<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(
        Option::<OneOrMany<T>>::deserialize(deserializer)?.map(|v| match v {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }),
    )
}

/// Strings render unquoted, everything else as compact JSON.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn region_guardrail() -> Value {
        json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Sid": "DenyOutsideApprovedRegions",
                "Effect": "Deny",
                "NotAction": ["iam:*", "organizations:*"],
                "Resource": "*",
                "Condition": {
                    "StringNotEquals": { "aws:RequestedRegion": ["us-east-1", "eu-west-1"] }
                }
            }]
        })
    }

    #[test]
    fn scalars_are_normalised_to_lists() {
        let policy = GovernancePolicy::from_value(
            "p-1",
            "single",
            json!({"Statement": {"Effect": "Deny", "Action": "s3:DeleteBucket", "Resource": "*"}}),
        )
        .unwrap();
        let stmt = &policy.document.statements[0];
        assert_eq!(stmt.action, Some(vec!["s3:DeleteBucket".to_string()]));
        assert_eq!(stmt.resource, Some(vec!["*".to_string()]));
    }

    #[test]
    fn content_hash_ignores_formatting() {
        let compact = GovernancePolicy::from_value(
            "p-1",
            "a",
            json!({"Statement": [{"Effect": "Deny", "Action": ["s3:*"], "Resource": ["*"]}]}),
        )
        .unwrap();
        let scalar = GovernancePolicy::from_value(
            "p-1",
            "a",
            json!({"Statement": {"Resource": "*", "Action": "s3:*", "Effect": "Deny"}}),
        )
        .unwrap();
        assert_eq!(compact.content_hash, scalar.content_hash);
    }

    #[test]
    fn content_hash_changes_with_content() {
        let a = GovernancePolicy::new("p-1", "a", PolicyDocument::new(vec![Statement::deny(&["s3:*"])]))
            .unwrap();
        let b = GovernancePolicy::new("p-1", "a", PolicyDocument::new(vec![Statement::deny(&["ec2:*"])]))
            .unwrap();
        assert_ne!(a.content_hash, b.content_hash);
    }

    #[test]
    fn string_encoded_content_is_unwrapped() {
        let raw = region_guardrail().to_string();
        let policy = GovernancePolicy::from_value("p-1", "regions", Value::String(raw)).unwrap();
        assert_eq!(policy.document.statements.len(), 1);
        let cond = &policy.document.statements[0].condition["StringNotEquals"];
        assert_eq!(
            cond["aws:RequestedRegion"].as_strings(),
            vec!["us-east-1", "eu-west-1"]
        );
    }

    #[test]
    fn describe_policy_wrapper_is_unwrapped() {
        let wrapped = json!({
            "Policy": {
                "PolicySummary": {"Id": "p-1"},
                "Content": region_guardrail().to_string()
            }
        });
        let policy = GovernancePolicy::from_value("p-1", "regions", wrapped).unwrap();
        assert!(policy.document.statements[0].not_action.is_some());
    }

    #[test]
    fn action_and_not_action_is_malformed() {
        let result = GovernancePolicy::from_value(
            "p-1",
            "bad",
            json!({"Statement": [{"Effect": "Deny", "Action": "s3:*", "NotAction": "iam:*"}]}),
        );
        assert!(matches!(result, Err(PolicyError::Malformed { .. })));
    }

    #[test]
    fn empty_statement_list_is_rejected() {
        let result = GovernancePolicy::from_value("p-1", "empty", json!({"Statement": []}));
        assert!(matches!(result, Err(PolicyError::EmptyDocument { .. })));
    }

    #[test]
    fn non_object_content_is_malformed() {
        let result = GovernancePolicy::from_value("p-1", "bad", json!(42));
        assert!(matches!(result, Err(PolicyError::Malformed { .. })));
    }

    #[test]
    fn load_uses_file_stem_as_identifier() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deny_regions.json");
        std::fs::write(&path, region_guardrail().to_string()).unwrap();
        let policy = GovernancePolicy::load(&path).unwrap();
        assert_eq!(policy.policy_id, "deny_regions");
        assert_eq!(policy.name, "deny_regions");
    }
}
