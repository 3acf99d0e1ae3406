// suite.rs — The set of checks a rule set must pass before commit.

use gs_policy::{ChangeSet, GovernancePolicy, RuleSet, VerdictMode};
use gs_rules::QueryPath;

use crate::cases::CaseGenerator;
use crate::error::ValidateError;
use crate::report::{ValidationMode, ValidationReport};
use crate::validator::DifferentialValidator;

/// Fidelity cases and fixtures are validated in fixture mode, the candidate
/// change set in gate mode; the results are merged into one report.
#[derive(Debug, Clone, Default)]
pub struct ValidationSuite {
    fidelity: Option<CaseGenerator>,
    fixtures: Option<ChangeSet>,
    candidate: Option<ChangeSet>,
}

impl ValidationSuite {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive labelled cases from the source document on every run.
    pub fn with_fidelity(mut self, generator: CaseGenerator) -> Self {
        self.fidelity = Some(generator);
        self
    }

    pub fn with_fixtures(mut self, fixtures: ChangeSet) -> Self {
        self.fixtures = Some(fixtures);
        self
    }

    pub fn with_candidate(mut self, candidate: ChangeSet) -> Self {
        self.candidate = Some(candidate);
        self
    }

    pub fn run(
        &self,
        validator: &DifferentialValidator,
        policy: &GovernancePolicy,
        rule_set: &RuleSet,
        mode: VerdictMode,
        query: &QueryPath,
    ) -> Result<ValidationReport, ValidateError> {
        let mut labelled = Vec::new();
        if let Some(generator) = &self.fidelity {
            labelled.extend(generator.generate(policy).operations);
        }
        if let Some(fixtures) = &self.fixtures {
            labelled.extend(fixtures.operations.iter().cloned());
        }

        let mut report = validator.validate(
            rule_set,
            &ChangeSet::new(labelled),
            mode,
            query,
            ValidationMode::Fixture,
        )?;
        if let (Some(candidate), None) = (&self.candidate, &report.compile_error) {
            let gated = validator.validate(rule_set, candidate, mode, query, ValidationMode::Gate)?;
            report.absorb(gated);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::ReferenceEvaluator;
    use crate::report::ReportStatus;
    use gs_policy::{Operation, PolicyDocument, Statement, Verdict};
    use gs_rules::{EvalError, EvaluatorGateway, RawVerdict, RuleEvaluator};
    use serde_json::Value;
    use std::sync::Arc;
    use std::time::Duration;

    /// Faithful to a document that denies exactly "s3:DeleteBucket".
    struct DeleteBucketRules;

    impl RuleEvaluator for DeleteBucketRules {
        fn compile(&self, _rules: &str) -> Result<(), EvalError> {
            Ok(())
        }

        fn evaluate(&self, _rules: &str, _query: &QueryPath, input: &Value) -> Result<RawVerdict, EvalError> {
            if input["action"] == "s3:DeleteBucket" {
                Ok(RawVerdict::Collection(vec!["SCP: s3:DeleteBucket is explicitly denied".into()]))
            } else {
                Ok(RawVerdict::Undefined)
            }
        }

        fn name(&self) -> &str {
            "delete-bucket"
        }
    }

    fn fixture() -> (DifferentialValidator, GovernancePolicy, RuleSet) {
        let policy = GovernancePolicy::new(
            "p-1",
            "deny-delete-bucket",
            PolicyDocument::new(vec![Statement::deny(&["s3:DeleteBucket"])]),
        )
        .unwrap();
        let rs = RuleSet::pending(&policy, 1, "package aws.scp");
        let gw = EvaluatorGateway::new(Arc::new(DeleteBucketRules), Duration::from_secs(5));
        (DifferentialValidator::new(Arc::new(gw)), policy, rs)
    }

    #[test]
    fn faithful_rules_pass_fidelity() {
        let (v, policy, rs) = fixture();
        let suite = ValidationSuite::new().with_fidelity(CaseGenerator::new(ReferenceEvaluator::default()));
        let report = suite
            .run(&v, &policy, &rs, VerdictMode::DenySet, &QueryPath::default())
            .unwrap();
        assert!(report.total() > 0);
        assert_eq!(report.status, ReportStatus::Match);
    }

    #[test]
    fn candidate_denial_rejects() {
        let (v, policy, rs) = fixture();
        let suite = ValidationSuite::new()
            .with_fixtures(ChangeSet::new(vec![
                Operation::new("s3:GetObject", "*").with_expected(Verdict::Allow)
            ]))
            .with_candidate(ChangeSet::new(vec![
                Operation::new("s3:PutObject", "arn:aws:s3:::prod-x/a"),
                Operation::new("s3:DeleteBucket", "arn:aws:s3:::prod-x"),
            ]));
        let report = suite
            .run(&v, &policy, &rs, VerdictMode::DenySet, &QueryPath::default())
            .unwrap();
        assert_eq!(report.total(), 3);
        assert_eq!(report.status, ReportStatus::Mismatch);
        assert_eq!(report.mismatches.len(), 1);
        assert_eq!(report.mismatches[0].index, 2);
        assert_eq!(report.mismatches[0].action, "s3:DeleteBucket");
    }
}
