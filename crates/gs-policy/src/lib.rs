//! # gs-policy
//!
//! The data model shared by every guardsync stage.
//!
//! A [`GovernancePolicy`] is the source-of-truth authorization document. The
//! translation stage turns it into a [`RuleSet`] (generated rule text plus a
//! generation counter and lifecycle status). A [`ChangeSet`] is a proposed
//! infrastructure mutation, checked operation by operation against a rule
//! set and reduced to a [`Verdict`] under a [`VerdictMode`].
//!
//! ## Key invariants
//!
//! - **Content addressing**: a policy's `content_hash` is the SHA-256 of its
//!   canonical JSON, so reformatting a document never creates a new generation.
//! - **One-way lifecycle**: a rule set moves PENDING → VALID | INVALID |
//!   SUPERSEDED and VALID → SUPERSEDED, never backwards.

pub mod change_set;
pub mod document;
pub mod error;
pub mod hash;
pub mod rule_set;
pub mod verdict;

pub use change_set::{ChangeSet, Operation};
pub use document::{ConditionValues, Effect, GovernancePolicy, PolicyDocument, Statement};
pub use error::PolicyError;
pub use rule_set::{RuleSet, RuleSetStatus};
pub use verdict::{Verdict, VerdictMode};
