// report.rs — Validation reports.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use gs_policy::{RuleSet, Verdict, VerdictMode};
use gs_rules::EvalError;

/// What an operation's verdict is compared against.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    /// Exact equality with the operation's labelled expectation.
    Fixture,
    /// Live change gating: any DENY is a violation.
    Gate,
}

impl fmt::Display for ValidationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationMode::Fixture => write!(f, "fixture"),
            ValidationMode::Gate => write!(f, "gate"),
        }
    }
}

/// Overall outcome of a validation pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Match,
    Mismatch,
    EvalError,
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportStatus::Match => write!(f, "MATCH"),
            ReportStatus::Mismatch => write!(f, "MISMATCH"),
            ReportStatus::EvalError => write!(f, "EVAL_ERROR"),
        }
    }
}

/// A serializable record of an evaluator failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalFailure {
    pub kind: String,
    pub message: String,
    pub transient: bool,
}

impl From<&EvalError> for EvalFailure {
    fn from(err: &EvalError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
            transient: err.is_transient(),
        }
    }
}

/// Per-operation verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    pub index: usize,
    pub action: String,
    pub resource: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub mode: ValidationMode,
    /// Fixture label, or ALLOW for gated operations.
    pub expected: Verdict,
    /// `None` when evaluation failed.
    pub actual: Option<Verdict>,
    /// Denial messages, when the evaluator produced a collection.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<EvalFailure>,
}

impl OperationResult {
    pub fn is_mismatch(&self) -> bool {
        matches!(self.actual, Some(actual) if actual != self.expected)
    }

    pub fn passed(&self) -> bool {
        self.actual == Some(self.expected)
    }
}

/// A disagreeing operation, as listed in rejection notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mismatch {
    pub index: usize,
    pub action: String,
    pub resource: String,
    pub expected: Verdict,
    pub actual: Verdict,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<String>,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} on {}: expected {}, got {}",
            self.index, self.action, self.resource, self.expected, self.actual
        )
    }
}

/// Result of validating one rule set against one or more change sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub report_id: Uuid,
    pub rule_set_id: Uuid,
    pub policy_id: String,
    pub generation: u64,
    pub rule_hash: String,
    pub verdict_mode: VerdictMode,
    pub query: String,
    pub status: ReportStatus,
    pub results: Vec<OperationResult>,
    pub mismatches: Vec<Mismatch>,
    /// Set when the rule text failed to compile; no operation was evaluated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compile_error: Option<EvalFailure>,
    pub created_at: DateTime<Utc>,
}

impl ValidationReport {
    pub(crate) fn new(rule_set: &RuleSet, verdict_mode: VerdictMode, query: &str) -> Self {
        Self {
            report_id: Uuid::new_v4(),
            rule_set_id: rule_set.rule_set_id,
            policy_id: rule_set.policy_id.clone(),
            generation: rule_set.generation,
            rule_hash: rule_set.rule_hash.clone(),
            verdict_mode,
            query: query.to_string(),
            status: ReportStatus::Match,
            results: Vec::new(),
            mismatches: Vec::new(),
            compile_error: None,
            created_at: Utc::now(),
        }
    }

    pub(crate) fn push(&mut self, result: OperationResult) {
        if let (true, Some(actual)) = (result.is_mismatch(), result.actual) {
            self.mismatches.push(Mismatch {
                index: result.index,
                action: result.action.clone(),
                resource: result.resource.clone(),
                expected: result.expected,
                actual,
                messages: result.messages.clone(),
            });
        }
        self.results.push(result);
        self.recompute_status();
    }

    pub(crate) fn fail_compile(&mut self, err: &EvalError) {
        self.compile_error = Some(EvalFailure::from(err));
        self.recompute_status();
    }

    /// Append another report for the same rule set, renumbering its operations.
    pub fn absorb(&mut self, other: ValidationReport) {
        let offset = self.results.len();
        if self.compile_error.is_none() {
            self.compile_error = other.compile_error;
        }
        for mut result in other.results {
            result.index += offset;
            self.push(result);
        }
        self.recompute_status();
    }

    fn recompute_status(&mut self) {
        self.status = if self.compile_error.is_some() || self.results.iter().any(|r| r.error.is_some()) {
            ReportStatus::EvalError
        } else if !self.mismatches.is_empty() {
            ReportStatus::Mismatch
        } else {
            ReportStatus::Match
        };
    }

    /// All recorded evaluator failures, compile failure first.
    pub fn failures(&self) -> Vec<&EvalFailure> {
        self.compile_error
            .iter()
            .chain(self.results.iter().filter_map(|r| r.error.as_ref()))
            .collect()
    }

    /// True when every failure is transient, i.e. a retry may succeed.
    pub fn is_transient_failure(&self) -> bool {
        let failures = self.failures();
        !failures.is_empty() && failures.iter().all(|f| f.transient)
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.passed()).count()
    }

    pub fn failed(&self) -> usize {
        self.total() - self.passed()
    }

    pub fn match_rate(&self) -> f64 {
        if self.results.is_empty() {
            return 0.0;
        }
        self.passed() as f64 / self.total() as f64
    }

    /// Human-readable summary for terminals and CI logs.
    pub fn render_summary(&self, title: &str) -> String {
        let rule = "=".repeat(60);
        let mut out = Vec::new();
        out.push(rule.clone());
        out.push(format!("Validation report: {title}"));
        out.push(rule.clone());
        out.push(format!(
            "Policy: {}  generation {}  mode {}  query {}",
            self.policy_id, self.generation, self.verdict_mode, self.query
        ));
        match &self.compile_error {
            Some(failure) => out.push(format!("Compile: FAILED ({})", failure.message)),
            None => out.push("Compile: ok".to_string()),
        }
        out.push(format!("Status: {}", self.status));
        out.push(format!(
            "Operations: {}  passed {}  failed {}  match rate {:.1}%",
            self.total(),
            self.passed(),
            self.failed(),
            self.match_rate() * 100.0
        ));

        if !self.mismatches.is_empty() {
            out.push(String::new());
            out.push("Mismatches:".to_string());
            for m in &self.mismatches {
                out.push(format!("  {m}"));
                for msg in &m.messages {
                    out.push(format!("      {msg}"));
                }
            }
        }
        let errors: Vec<&OperationResult> =
            self.results.iter().filter(|r| r.error.is_some()).collect();
        if !errors.is_empty() {
            out.push(String::new());
            out.push("Evaluation errors:".to_string());
            for r in errors {
                if let Some(e) = &r.error {
                    out.push(format!("  #{} {} on {}: [{}] {}", r.index, r.action, r.resource, e.kind, e.message));
                }
            }
        }
        out.push(rule);
        out.join("\n")
    }
}

/// Overall summary across several policies' reports.
pub fn render_overall(reports: &[(String, ValidationReport)]) -> String {
    let total: usize = reports.iter().map(|(_, r)| r.total()).sum();
    let passed: usize = reports.iter().map(|(_, r)| r.passed()).sum();
    let with_issues: Vec<&str> = reports
        .iter()
        .filter(|(_, r)| r.status != ReportStatus::Match)
        .map(|(name, _)| name.as_str())
        .collect();
    let rate = if total == 0 {
        0.0
    } else {
        passed as f64 / total as f64 * 100.0
    };

    let mut out = vec![
        "=".repeat(60),
        "Overall validation summary".to_string(),
        "=".repeat(60),
        format!("Policies validated: {}", reports.len()),
        format!("Operations: {total}  passed {passed}  failed {}", total - passed),
        format!("Overall match rate: {rate:.1}%"),
        format!("Policies with issues: {}", with_issues.len()),
    ];
    for name in with_issues {
        out.push(format!("  - {name}"));
    }
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use gs_policy::{GovernancePolicy, PolicyDocument, Statement};

    fn report() -> ValidationReport {
        let policy = GovernancePolicy::new(
            "p-1",
            "deny-s3",
            PolicyDocument::new(vec![Statement::deny(&["s3:*"])]),
        )
        .unwrap();
        let rs = RuleSet::pending(&policy, 1, "package aws.scp");
        ValidationReport::new(&rs, VerdictMode::DenySet, "data.aws.scp.deny")
    }

    fn result(expected: Verdict, actual: Option<Verdict>, error: Option<EvalError>) -> OperationResult {
        OperationResult {
            index: 0,
            action: "s3:DeleteBucket".into(),
            resource: "arn:aws:s3:::prod-x".into(),
            description: String::new(),
            mode: ValidationMode::Fixture,
            expected,
            actual,
            messages: vec![],
            error: error.as_ref().map(EvalFailure::from),
        }
    }

    #[test]
    fn empty_report_matches() {
        assert_eq!(report().status, ReportStatus::Match);
    }

    #[test]
    fn mismatch_is_enumerated() {
        let mut r = report();
        r.push(result(Verdict::Allow, Some(Verdict::Allow), None));
        r.push(result(Verdict::Allow, Some(Verdict::Deny), None));
        assert_eq!(r.status, ReportStatus::Mismatch);
        assert_eq!(r.mismatches.len(), 1);
        assert_eq!(r.passed(), 1);
        assert_eq!(r.failed(), 1);
    }

    #[test]
    fn eval_error_dominates_mismatch() {
        let mut r = report();
        r.push(result(Verdict::Allow, Some(Verdict::Deny), None));
        r.push(result(
            Verdict::Allow,
            None,
            Some(EvalError::Timeout { after_ms: 10 }),
        ));
        assert_eq!(r.status, ReportStatus::EvalError);
        // The mismatch is still listed.
        assert_eq!(r.mismatches.len(), 1);
        assert!(r.is_transient_failure());
    }

    #[test]
    fn mixed_failures_are_not_transient() {
        let mut r = report();
        r.push(result(Verdict::Allow, None, Some(EvalError::Timeout { after_ms: 10 })));
        r.push(result(
            Verdict::Allow,
            None,
            Some(EvalError::TypeMismatch { mode: "deny_set".into(), found: "boolean (true)".into() }),
        ));
        assert!(!r.is_transient_failure());
    }

    #[test]
    fn absorb_renumbers_and_recomputes() {
        let mut a = report();
        a.push(result(Verdict::Allow, Some(Verdict::Allow), None));
        let mut b = report();
        b.push(result(Verdict::Allow, Some(Verdict::Deny), None));
        a.absorb(b);
        assert_eq!(a.total(), 2);
        assert_eq!(a.mismatches[0].index, 1);
        assert_eq!(a.status, ReportStatus::Mismatch);
    }

    #[test]
    fn summary_lists_mismatches() {
        let mut r = report();
        r.push(result(Verdict::Allow, Some(Verdict::Deny), None));
        let text = r.render_summary("deny-s3");
        assert!(text.contains("Status: MISMATCH"));
        assert!(text.contains("s3:DeleteBucket on arn:aws:s3:::prod-x: expected ALLOW, got DENY"));
    }
}
