// cases.rs — Operation generation from a governance document.
//
// For each statement: operations that should hit it (positive, wildcard,
// NotAction/NotResource complements, condition satisfied) and operations
// that should miss it (different action or resource, condition violated).
// Expected verdicts come from the reference evaluator, never from the
// generator's own guess, so a case is only as good as the document.

use serde_json::{json, Value};

use gs_policy::{ChangeSet, GovernancePolicy, Operation, Statement};

use crate::reference::{wildcard_match, ReferenceEvaluator};

const PROBE_ACTION: &str = "s3:GetObject";
const PROBE_NOT_ACTION: &str = "ec2:DescribeInstances";
const PROBE_OTHER_ACTION: &str = "ec2:TerminateInstances";
const PROBE_RESOURCE: &str = "arn:aws:s3:::example-bucket/example.txt";
const PROBE_NOT_RESOURCE: &str = "arn:aws:s3:::test-bucket/*";
const PROBE_OTHER_RESOURCE: &str = "arn:aws:s3:::unrelated-bucket/*";
const WRONG_CONTEXT: &str = "wrong-value-12345";

#[derive(Debug, Clone, Default)]
pub struct CaseGenerator {
    reference: ReferenceEvaluator,
}

impl CaseGenerator {
    pub fn new(reference: ReferenceEvaluator) -> Self {
        Self { reference }
    }

    /// Generate labelled operations for every statement of `policy`.
    pub fn generate(&self, policy: &GovernancePolicy) -> ChangeSet {
        let mut ops = Vec::new();
        for (index, stmt) in policy.document.statements.iter().enumerate() {
            let label = stmt.label(index);
            for (op, what) in statement_cases(stmt) {
                let expected = self.reference.evaluate(&policy.document, &op);
                ops.push(
                    op.with_expected(expected)
                        .with_description(format!("{label}: {what}")),
                );
            }
        }
        tracing::debug!(policy_id = %policy.policy_id, cases = ops.len(), "generated fidelity cases");
        ChangeSet::new(ops).with_source(format!("generated:{}", policy.policy_id))
    }
}

fn statement_cases(stmt: &Statement) -> Vec<(Operation, String)> {
    let actions: &[String] = stmt.action.as_deref().unwrap_or(&[]);
    let resources: &[String] = stmt.resource.as_deref().unwrap_or(&[]);
    let first_action = actions.first().map(String::as_str);
    let first_resource = resources.first().map(String::as_str).unwrap_or("*");
    let concrete_action = first_action
        .filter(|a| *a != "*")
        .map(|a| a.to_string())
        .unwrap_or_else(|| PROBE_ACTION.to_string());

    let mut cases = Vec::new();

    if let Some(action) = first_action {
        cases.push((
            Operation::new(expand_action(action), expand_resource(first_resource)),
            "positive case".to_string(),
        ));
        if actions.iter().any(|a| a == "*") {
            cases.push((
                Operation::new(PROBE_ACTION, first_resource),
                "wildcard action".to_string(),
            ));
        }
        if resources.iter().any(|r| r == "*") || (stmt.resource.is_none() && stmt.not_resource.is_none()) {
            cases.push((
                Operation::new(action, PROBE_RESOURCE),
                "wildcard resource".to_string(),
            ));
        }
    }

    if let Some(excluded) = &stmt.not_action {
        if !excluded.iter().any(|p| wildcard_match(p, PROBE_NOT_ACTION)) {
            cases.push((
                Operation::new(PROBE_NOT_ACTION, first_resource),
                "action outside NotAction".to_string(),
            ));
        }
        if let Some(first) = excluded.first() {
            cases.push((
                Operation::new(expand_action(first), first_resource),
                "action inside NotAction".to_string(),
            ));
        }
    }

    if let Some(excluded) = &stmt.not_resource {
        if !excluded.iter().any(|p| wildcard_match(p, PROBE_NOT_RESOURCE)) {
            cases.push((
                Operation::new(concrete_action.clone(), PROBE_NOT_RESOURCE),
                "resource outside NotResource".to_string(),
            ));
        }
        if let Some(first) = excluded.first() {
            cases.push((
                Operation::new(concrete_action.clone(), expand_resource(first)),
                "resource inside NotResource".to_string(),
            ));
        }
    }

    if !actions.is_empty()
        && !actions.iter().any(|a| a == "*")
        && !actions.iter().any(|p| wildcard_match(p, PROBE_OTHER_ACTION))
    {
        cases.push((
            Operation::new(PROBE_OTHER_ACTION, first_resource),
            "different action".to_string(),
        ));
    }
    if !resources.is_empty()
        && !resources.iter().any(|r| r == "*")
        && !resources.iter().any(|p| wildcard_match(p, PROBE_OTHER_RESOURCE))
    {
        cases.push((
            Operation::new(concrete_action.clone(), PROBE_OTHER_RESOURCE),
            "different resource".to_string(),
        ));
    }

    for (operator, keys) in &stmt.condition {
        for (key, values) in keys {
            let satisfying = values.0.first().cloned().unwrap_or(Value::Null);
            cases.push((
                Operation::new(concrete_action.clone(), expand_resource(first_resource))
                    .with_context(key.clone(), satisfying),
                format!("condition {operator}:{key} satisfied"),
            ));
            cases.push((
                Operation::new(concrete_action.clone(), expand_resource(first_resource))
                    .with_context(key.clone(), json!(WRONG_CONTEXT)),
                format!("condition {operator}:{key} not satisfied"),
            ));
        }
    }

    cases
}

/// A concrete action matching a (possibly wildcarded) pattern.
fn expand_action(pattern: &str) -> String {
    if pattern == "*" {
        return PROBE_ACTION.to_string();
    }
    match pattern.strip_suffix('*') {
        Some("s3:") => "s3:GetObject".to_string(),
        Some("ec2:") => "ec2:DescribeInstances".to_string(),
        Some("iam:") => "iam:GetUser".to_string(),
        Some("dynamodb:") => "dynamodb:GetItem".to_string(),
        Some(prefix) => format!("{prefix}List"),
        None => pattern.to_string(),
    }
}

/// A concrete resource matching a (possibly wildcarded) pattern.
fn expand_resource(pattern: &str) -> String {
    if pattern == "*" {
        return PROBE_RESOURCE.to_string();
    }
    match pattern.strip_suffix('*') {
        Some(prefix) if prefix.ends_with('/') => format!("{prefix}example.txt"),
        Some(prefix) => format!("{prefix}example"),
        None => pattern.to_string(),
    }
}
