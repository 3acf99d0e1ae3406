//! # gs-validate
//!
//! Turns raw evaluator output into decisions and compares those decisions
//! against expectations.
//!
//! - [`interpret`] reduces a [`RawVerdict`](gs_rules::RawVerdict) to a
//!   [`Verdict`](gs_policy::Verdict) under a [`VerdictMode`](gs_policy::VerdictMode).
//! - [`DifferentialValidator`] runs every operation of a change set through
//!   the evaluator gateway and produces a [`ValidationReport`].
//! - [`ReferenceEvaluator`] and [`CaseGenerator`] derive labelled operations
//!   straight from a governance document, for translation fidelity checks.
//! - [`FixtureCorpus`] loads hand-labelled operations from `allow/` and
//!   `deny/` directories.
//!
//! ## Key invariants
//!
//! - **Nothing is dropped**: every disagreeing operation appears in the
//!   report's mismatch list with action, resource, expected and actual.
//! - **Errors dominate**: report status precedence is
//!   EVAL_ERROR > MISMATCH > MATCH.
//! - **Absent deny set allows**: under `deny_set` an undefined result is an
//!   empty set. This is the interpreter's one documented default.

pub mod cases;
pub mod error;
pub mod fixtures;
pub mod interpret;
pub mod reference;
pub mod report;
pub mod suite;
pub mod validator;

pub use cases::CaseGenerator;
pub use error::ValidateError;
pub use fixtures::FixtureCorpus;
pub use interpret::interpret;
pub use reference::ReferenceEvaluator;
pub use report::{EvalFailure, Mismatch, OperationResult, ReportStatus, ValidationMode, ValidationReport};
pub use suite::ValidationSuite;
pub use validator::DifferentialValidator;
