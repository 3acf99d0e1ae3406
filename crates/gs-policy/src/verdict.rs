// verdict.rs — Binary decisions and the conventions for reading them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PolicyError;

/// A binary authorization decision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Allow,
    Deny,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Allow => write!(f, "ALLOW"),
            Verdict::Deny => write!(f, "DENY"),
        }
    }
}

impl FromStr for Verdict {
    type Err = PolicyError;

    /// Fixture directories and tags use allow/deny or pass/fail.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allow" | "pass" => Ok(Verdict::Allow),
            "deny" | "fail" => Ok(Verdict::Deny),
            other => Err(PolicyError::UnknownVerdict(other.to_string())),
        }
    }
}

/// How a rule set expresses its verdict at a query path.
///
/// The mode is a property of the rule set, not of the input: exactly one
/// mode applies per (rule set, query) pair.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VerdictMode {
    /// A non-empty collection of denial messages means DENY.
    #[default]
    DenySet,
    /// Boolean true means ALLOW.
    AllowBool,
    /// Boolean true means DENY.
    DenyBool,
}

impl fmt::Display for VerdictMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerdictMode::DenySet => write!(f, "deny_set"),
            VerdictMode::AllowBool => write!(f, "allow_bool"),
            VerdictMode::DenyBool => write!(f, "deny_bool"),
        }
    }
}

impl FromStr for VerdictMode {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "deny_set" => Ok(VerdictMode::DenySet),
            "allow_bool" => Ok(VerdictMode::AllowBool),
            "deny_bool" => Ok(VerdictMode::DenyBool),
            other => Err(PolicyError::UnknownMode(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_labels_parse() {
        assert_eq!("allow".parse::<Verdict>().unwrap(), Verdict::Allow);
        assert_eq!("PASS".parse::<Verdict>().unwrap(), Verdict::Allow);
        assert_eq!("fail".parse::<Verdict>().unwrap(), Verdict::Deny);
        assert!("maybe".parse::<Verdict>().is_err());
    }

    #[test]
    fn mode_round_trips_through_display() {
        for mode in [VerdictMode::DenySet, VerdictMode::AllowBool, VerdictMode::DenyBool] {
            assert_eq!(mode.to_string().parse::<VerdictMode>().unwrap(), mode);
        }
        assert_eq!("deny-set".parse::<VerdictMode>().unwrap(), VerdictMode::DenySet);
    }

    #[test]
    fn mode_serializes_as_snake_case() {
        let json = serde_json::to_string(&VerdictMode::AllowBool).unwrap();
        assert_eq!(json, "\"allow_bool\"");
    }
}
