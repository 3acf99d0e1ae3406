// query.rs — Query paths into the evaluator's document tree.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EvalError;

/// Path queried on every evaluation, e.g. `data.aws.scp.deny`.
///
/// Always rooted at `data`; each segment is a non-empty run of ASCII
/// alphanumerics, `_` or `-`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueryPath(String);

impl QueryPath {
    pub const DEFAULT: &'static str = "data.aws.scp.deny";

    pub fn parse(raw: &str) -> Result<Self, EvalError> {
        let raw = raw.trim();
        let invalid = || EvalError::InvalidQuery {
            query: raw.to_string(),
        };
        let mut segments = raw.split('.');
        if segments.next() != Some("data") {
            return Err(invalid());
        }
        let mut count = 0;
        for segment in segments {
            let ok = !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
            if !ok {
                return Err(invalid());
            }
            count += 1;
        }
        if count == 0 {
            return Err(invalid());
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The package portion, e.g. `aws.scp` for `data.aws.scp.deny`.
    pub fn package(&self) -> Option<&str> {
        let rest = self.0.strip_prefix("data.")?;
        rest.rfind('.').map(|i| &rest[..i])
    }
}

impl Default for QueryPath {
    fn default() -> Self {
        Self(Self::DEFAULT.to_string())
    }
}

impl fmt::Display for QueryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for QueryPath {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for QueryPath {
    type Error = EvalError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<QueryPath> for String {
    fn from(value: QueryPath) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_query() {
        let q = QueryPath::default();
        assert_eq!(q.as_str(), "data.aws.scp.deny");
        assert_eq!(q.package(), Some("aws.scp"));
    }

    #[test]
    fn rejects_paths_outside_data() {
        assert!(QueryPath::parse("input.deny").is_err());
        assert!(QueryPath::parse("data").is_err());
        assert!(QueryPath::parse("data..deny").is_err());
        assert!(QueryPath::parse("data.aws scp.deny").is_err());
    }

    #[test]
    fn accepts_nested_rules() {
        let q: QueryPath = "data.guard.allow".parse().unwrap();
        assert_eq!(q.package(), Some("guard"));
        let single: QueryPath = "data.allow".parse().unwrap();
        assert_eq!(single.package(), None);
    }

    #[test]
    fn deserialize_validates() {
        let ok: Result<QueryPath, _> = serde_json::from_str("\"data.aws.scp.deny\"");
        assert!(ok.is_ok());
        let bad: Result<QueryPath, _> = serde_json::from_str("\"deny\"");
        assert!(bad.is_err());
    }
}
