// validator.rs — Differential validation of a rule set.
//
// Each operation becomes an evaluator input; the raw result is interpreted
// under the verdict mode and compared with the operation's expectation.
// Evaluation continues past per-operation failures so that every problem is
// reported in one pass.

use std::sync::Arc;

use gs_policy::{ChangeSet, RuleSet, Verdict, VerdictMode};
use gs_rules::{EvaluatorGateway, QueryPath};

use crate::error::ValidateError;
use crate::interpret::interpret;
use crate::report::{EvalFailure, OperationResult, ValidationMode, ValidationReport};

pub struct DifferentialValidator {
    gateway: Arc<EvaluatorGateway>,
}

impl DifferentialValidator {
    pub fn new(gateway: Arc<EvaluatorGateway>) -> Self {
        Self { gateway }
    }

    pub fn gateway(&self) -> &EvaluatorGateway {
        &self.gateway
    }

    /// Validate `rule_set` against every operation of `change_set`.
    ///
    /// In [`ValidationMode::Fixture`] every operation must carry an expected
    /// verdict. In [`ValidationMode::Gate`] the expectation is ALLOW and
    /// labels are ignored.
    pub fn validate(
        &self,
        rule_set: &RuleSet,
        change_set: &ChangeSet,
        mode: VerdictMode,
        query: &QueryPath,
        validation: ValidationMode,
    ) -> Result<ValidationReport, ValidateError> {
        let expectations = expectations(change_set, validation)?;
        let mut report = ValidationReport::new(rule_set, mode, query.as_str());

        if let Err(err) = self.gateway.check(&rule_set.rule_text) {
            tracing::warn!(
                policy_id = %rule_set.policy_id,
                generation = rule_set.generation,
                error = %err,
                "rule set failed to compile"
            );
            report.fail_compile(&err);
            return Ok(report);
        }

        for (index, (op, expected)) in change_set.operations.iter().zip(expectations).enumerate() {
            let mut result = OperationResult {
                index,
                action: op.action.clone(),
                resource: op.resource.clone(),
                description: op.description.clone(),
                mode: validation,
                expected,
                actual: None,
                messages: Vec::new(),
                error: None,
            };
            let outcome = self
                .gateway
                .evaluate(&rule_set.rule_text, query, &op.to_input())
                .and_then(|raw| {
                    result.messages = raw.messages().to_vec();
                    interpret(&raw, mode)
                });
            match outcome {
                Ok(actual) => result.actual = Some(actual),
                Err(err) => {
                    tracing::debug!(index, action = %op.action, error = %err, "operation evaluation failed");
                    result.error = Some(EvalFailure::from(&err));
                }
            }
            report.push(result);
        }

        tracing::info!(
            policy_id = %rule_set.policy_id,
            generation = rule_set.generation,
            mode = %validation,
            operations = report.total(),
            mismatches = report.mismatches.len(),
            status = %report.status,
            "validation finished"
        );
        Ok(report)
    }
}

fn expectations(change_set: &ChangeSet, validation: ValidationMode) -> Result<Vec<Verdict>, ValidateError> {
    change_set
        .operations
        .iter()
        .enumerate()
        .map(|(index, op)| match validation {
            ValidationMode::Gate => Ok(Verdict::Allow),
            ValidationMode::Fixture => op.expected.ok_or_else(|| ValidateError::MissingExpectation {
                index,
                action: op.action.clone(),
            }),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use gs_policy::{GovernancePolicy, Operation, PolicyDocument, Statement};
    use gs_rules::{EvalError, RawVerdict, RuleEvaluator};
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Denies any action starting with "iam:", fails on "boom:*".
    #[derive(Default)]
    struct PrefixEvaluator {
        evaluations: AtomicUsize,
    }

    impl RuleEvaluator for PrefixEvaluator {
        fn compile(&self, rules: &str) -> Result<(), EvalError> {
            if rules.contains("broken") {
                return Err(EvalError::Syntax { message: "1:1: unexpected token".into() });
            }
            Ok(())
        }

        fn evaluate(&self, _rules: &str, _query: &QueryPath, input: &Value) -> Result<RawVerdict, EvalError> {
            self.evaluations.fetch_add(1, Ordering::SeqCst);
            let action = input["action"].as_str().unwrap_or_default();
            if action.starts_with("boom:") {
                return Err(EvalError::Engine { message: "crashed".into() });
            }
            if action.starts_with("iam:") {
                return Ok(RawVerdict::Collection(vec![format!("{action} denied")]));
            }
            Ok(RawVerdict::Collection(vec![]))
        }

        fn name(&self) -> &str {
            "prefix"
        }
    }

    fn setup(rules: &str) -> (DifferentialValidator, RuleSet, Arc<PrefixEvaluator>) {
        let policy = GovernancePolicy::new(
            "p-1",
            "deny-iam",
            PolicyDocument::new(vec![Statement::deny(&["iam:*"])]),
        )
        .unwrap();
        let evaluator = Arc::new(PrefixEvaluator::default());
        let gateway = Arc::new(EvaluatorGateway::new(evaluator.clone(), Duration::from_secs(5)));
        (DifferentialValidator::new(gateway), RuleSet::pending(&policy, 1, rules), evaluator)
    }

    #[test]
    fn fixture_mode_compares_labels() {
        let (v, rs, _) = setup("package aws.scp");
        let cs = ChangeSet::new(vec![
            Operation::new("iam:CreateUser", "*").with_expected(Verdict::Deny),
            Operation::new("s3:GetObject", "*").with_expected(Verdict::Allow),
        ]);
        let report = v
            .validate(&rs, &cs, VerdictMode::DenySet, &QueryPath::default(), ValidationMode::Fixture)
            .unwrap();
        assert_eq!(report.status, crate::ReportStatus::Match);
        assert_eq!(report.results[0].messages, vec!["iam:CreateUser denied".to_string()]);
    }

    #[test]
    fn fixture_mode_requires_labels() {
        let (v, rs, evaluator) = setup("package aws.scp");
        let cs = ChangeSet::new(vec![Operation::new("s3:GetObject", "*")]);
        let err = v
            .validate(&rs, &cs, VerdictMode::DenySet, &QueryPath::default(), ValidationMode::Fixture)
            .unwrap_err();
        assert!(matches!(err, ValidateError::MissingExpectation { index: 0, .. }));
        assert_eq!(evaluator.evaluations.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn gate_mode_flags_every_deny() {
        let (v, rs, _) = setup("package aws.scp");
        let cs = ChangeSet::new(vec![
            Operation::new("iam:CreateUser", "*").with_expected(Verdict::Deny),
            Operation::new("s3:GetObject", "*"),
            Operation::new("iam:DeleteRole", "*"),
        ]);
        let report = v
            .validate(&rs, &cs, VerdictMode::DenySet, &QueryPath::default(), ValidationMode::Gate)
            .unwrap();
        assert_eq!(report.status, crate::ReportStatus::Mismatch);
        let indices: Vec<usize> = report.mismatches.iter().map(|m| m.index).collect();
        assert_eq!(indices, vec![0, 2]);
    }

    #[test]
    fn errors_do_not_stop_the_pass() {
        let (v, rs, evaluator) = setup("package aws.scp");
        let cs = ChangeSet::new(vec![
            Operation::new("boom:Now", "*"),
            Operation::new("iam:CreateUser", "*"),
            Operation::new("s3:GetObject", "*"),
        ]);
        let report = v
            .validate(&rs, &cs, VerdictMode::DenySet, &QueryPath::default(), ValidationMode::Gate)
            .unwrap();
        assert_eq!(report.status, crate::ReportStatus::EvalError);
        assert_eq!(evaluator.evaluations.load(Ordering::SeqCst), 3);
        assert_eq!(report.mismatches.len(), 1);
        assert!(report.is_transient_failure());
    }

    #[test]
    fn compile_failure_short_circuits() {
        let (v, rs, evaluator) = setup("broken rego");
        let cs = ChangeSet::new(vec![Operation::new("s3:GetObject", "*")]);
        let report = v
            .validate(&rs, &cs, VerdictMode::DenySet, &QueryPath::default(), ValidationMode::Gate)
            .unwrap();
        assert_eq!(report.status, crate::ReportStatus::EvalError);
        assert_eq!(report.compile_error.as_ref().unwrap().kind, "syntax");
        assert!(!report.is_transient_failure());
        assert_eq!(evaluator.evaluations.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn shape_mismatch_is_reported_per_operation() {
        let (v, rs, _) = setup("package aws.scp");
        let cs = ChangeSet::new(vec![Operation::new("s3:GetObject", "*")]);
        let report = v
            .validate(&rs, &cs, VerdictMode::AllowBool, &QueryPath::default(), ValidationMode::Gate)
            .unwrap();
        assert_eq!(report.status, crate::ReportStatus::EvalError);
        assert_eq!(report.results[0].error.as_ref().unwrap().kind, "type_mismatch");
    }
}
