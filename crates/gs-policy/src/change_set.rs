// change_set.rs — Proposed infrastructure mutations.
//
// A ChangeSet is supplied from outside (a plan export, a CI job, a fixture
// directory) and is read-only to the pipeline. Each operation carries an
// action, a target resource and a context map; fixture operations also
// carry the verdict they are expected to receive.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::PolicyError;
use crate::verdict::Verdict;

/// One discrete operation of a change set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Action identifier (e.g., "s3:DeleteBucket").
    pub action: String,

    /// Target resource identifier (e.g., "arn:aws:s3:::prod-x").
    pub resource: String,

    #[serde(default = "default_principal")]
    pub principal: String,

    /// Request attributes (e.g., "aws:RequestedRegion").
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, Value>,

    /// Labelled expectation, present for fixture operations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<Verdict>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

fn default_principal() -> String {
    "*".to_string()
}

impl Operation {
    pub fn new(action: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            resource: resource.into(),
            principal: default_principal(),
            context: BTreeMap::new(),
            expected: None,
            description: String::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn with_expected(mut self, expected: Verdict) -> Self {
        self.expected = Some(expected);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// The structured evaluator input for this operation.
    pub fn to_input(&self) -> Value {
        json!({
            "action": self.action,
            "resource": self.resource,
            "principal": self.principal,
            "context": self.context,
        })
    }
}

/// A proposed set of operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    #[serde(default = "Uuid::new_v4")]
    pub change_set_id: Uuid,

    /// Where the change set came from (file path, pipeline id...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    pub operations: Vec<Operation>,
}

/// On disk a change set may be the full object or a bare operation list.
#[derive(Deserialize)]
#[serde(untagged)]
enum ChangeSetFile {
    Full(ChangeSet),
    Operations(Vec<Operation>),
}

impl From<ChangeSetFile> for ChangeSet {
    fn from(file: ChangeSetFile) -> Self {
        match file {
            ChangeSetFile::Full(cs) => cs,
            ChangeSetFile::Operations(ops) => ChangeSet::new(ops),
        }
    }
}

impl ChangeSet {
    pub fn new(operations: Vec<Operation>) -> Self {
        Self {
            change_set_id: Uuid::new_v4(),
            source: None,
            operations,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self, PolicyError> {
        Ok(serde_json::from_str::<ChangeSetFile>(json)?.into())
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, PolicyError> {
        Ok(serde_yaml::from_str::<ChangeSetFile>(yaml)?.into())
    }

    /// Load a change set from a `.json`, `.yaml` or `.yml` file.
    pub fn load(path: &Path) -> Result<Self, PolicyError> {
        let text = std::fs::read_to_string(path).map_err(|source| PolicyError::IoError {
            path: path.display().to_string(),
            source,
        })?;
        let cs = if is_yaml(path) {
            Self::from_yaml_str(&text)?
        } else {
            Self::from_json_str(&text)?
        };
        Ok(cs.with_source(path.display().to_string()))
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Does the path name a YAML file?
pub fn is_yaml(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext == "yaml" || ext == "yml")
}
