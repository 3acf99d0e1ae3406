// reference.rs — Reference guardrail evaluator.
//
// Evaluates a governance document directly with service-control-policy
// semantics. Used to label generated cases, so the generated rule text can
// be checked against the document it came from.
//
// Order: any matching Deny statement ⇒ DENY; else any matching Allow ⇒
// ALLOW; else the configured implicit verdict.

use std::collections::BTreeMap;

use glob::{MatchOptions, Pattern};
use serde_json::Value;

use gs_policy::document::{value_to_string, ConditionBlock};
use gs_policy::{Effect, Operation, PolicyDocument, Statement, Verdict};

#[derive(Debug, Clone, Copy)]
pub struct ReferenceEvaluator {
    implicit: Verdict,
}

impl ReferenceEvaluator {
    pub fn new(implicit: Verdict) -> Self {
        Self { implicit }
    }

    pub fn implicit(&self) -> Verdict {
        self.implicit
    }

    pub fn evaluate(&self, document: &PolicyDocument, op: &Operation) -> Verdict {
        let matching: Vec<&Statement> = document
            .statements
            .iter()
            .filter(|s| statement_matches(s, op))
            .collect();
        if matching.iter().any(|s| s.effect == Effect::Deny) {
            Verdict::Deny
        } else if matching.iter().any(|s| s.effect == Effect::Allow) {
            Verdict::Allow
        } else {
            self.implicit
        }
    }
}

impl Default for ReferenceEvaluator {
    fn default() -> Self {
        Self::new(Verdict::Allow)
    }
}

fn statement_matches(stmt: &Statement, op: &Operation) -> bool {
    let action = match (&stmt.action, &stmt.not_action) {
        (Some(patterns), _) => any_match(patterns, &op.action),
        (None, Some(excluded)) => !any_match(excluded, &op.action),
        (None, None) => true,
    };
    let resource = match (&stmt.resource, &stmt.not_resource) {
        (Some(patterns), _) => any_match(patterns, &op.resource),
        (None, Some(excluded)) => !any_match(excluded, &op.resource),
        (None, None) => true,
    };
    action && resource && conditions_hold(&stmt.condition, &op.context)
}

fn any_match(patterns: &[String], value: &str) -> bool {
    patterns.iter().any(|p| wildcard_match(p, value))
}

/// `*` matches any run of characters (including `/` and `:`), `?` one.
/// Every other character is literal, brackets included.
pub fn wildcard_match(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    let opts = MatchOptions {
        case_sensitive: true,
        require_literal_separator: false,
        require_literal_leading_dot: false,
    };
    match Pattern::new(&escape_literals(pattern)) {
        Ok(p) => p.matches_with(value, opts),
        Err(_) => pattern == value,
    }
}

fn escape_literals(pattern: &str) -> String {
    let mut escaped = String::with_capacity(pattern.len());
    let mut literal = String::new();
    for c in pattern.chars() {
        if c == '*' || c == '?' {
            escaped.push_str(&Pattern::escape(&literal));
            literal.clear();
            escaped.push(c);
        } else {
            literal.push(c);
        }
    }
    escaped.push_str(&Pattern::escape(&literal));
    escaped
}

/// Quantifier applied to multi-valued context keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SetQualifier {
    AnyValue,
    AllValues,
}

struct ParsedOperator<'a> {
    base: &'a str,
    if_exists: bool,
    qualifier: SetQualifier,
}

fn parse_operator(raw: &str) -> ParsedOperator<'_> {
    let (qualifier, rest) = if let Some(rest) = raw.strip_prefix("ForAllValues:") {
        (SetQualifier::AllValues, rest)
    } else if let Some(rest) = raw.strip_prefix("ForAnyValue:") {
        (SetQualifier::AnyValue, rest)
    } else {
        (SetQualifier::AnyValue, raw)
    };
    match rest.strip_suffix("IfExists") {
        Some(base) => ParsedOperator {
            base,
            if_exists: true,
            qualifier,
        },
        None => ParsedOperator {
            base: rest,
            if_exists: false,
            qualifier,
        },
    }
}

fn conditions_hold(block: &ConditionBlock, context: &BTreeMap<String, Value>) -> bool {
    block.iter().all(|(operator, keys)| {
        let op = parse_operator(operator);
        keys.iter().all(|(key, expected)| {
            let expected = &expected.0;
            match context.get(key) {
                None | Some(Value::Null) if op.if_exists => true,
                None | Some(Value::Null) => base_holds(op.base, None, expected),
                Some(Value::Array(items)) => match op.qualifier {
                    SetQualifier::AnyValue => items.iter().any(|v| base_holds(op.base, Some(v), expected)),
                    SetQualifier::AllValues => items.iter().all(|v| base_holds(op.base, Some(v), expected)),
                },
                Some(value) => base_holds(op.base, Some(value), expected),
            }
        })
    })
}

fn base_holds(operator: &str, actual: Option<&Value>, expected: &[Value]) -> bool {
    match operator {
        "StringEquals" => actual.is_some_and(|a| string_in(a, expected)),
        "StringNotEquals" => !actual.is_some_and(|a| string_in(a, expected)),
        "StringLike" => actual.is_some_and(|a| like(a, expected)),
        "StringNotLike" => !actual.is_some_and(|a| like(a, expected)),
        "NumericEquals" => numeric(actual, expected, |a, e| a == e),
        "NumericLessThan" => numeric(actual, expected, |a, e| a < e),
        "NumericGreaterThan" => numeric(actual, expected, |a, e| a > e),
        "Bool" => actual.is_some_and(|a| {
            expected
                .iter()
                .any(|e| value_to_string(a).eq_ignore_ascii_case(&value_to_string(e)))
        }),
        other => {
            tracing::debug!(operator = other, "unsupported condition operator; statement does not apply");
            false
        }
    }
}

fn string_in(actual: &Value, expected: &[Value]) -> bool {
    let actual = value_to_string(actual);
    expected.iter().any(|e| value_to_string(e) == actual)
}

fn like(actual: &Value, patterns: &[Value]) -> bool {
    let actual = value_to_string(actual);
    patterns.iter().any(|p| wildcard_match(&value_to_string(p), &actual))
}

fn numeric(actual: Option<&Value>, expected: &[Value], cmp: impl Fn(f64, f64) -> bool) -> bool {
    let Some(a) = actual.and_then(as_number) else {
        return false;
    };
    expected.iter().filter_map(as_number).any(|e| cmp(a, e))
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
