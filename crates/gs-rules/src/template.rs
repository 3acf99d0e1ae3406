// template.rs — Deterministic Rego rendering of governance documents.
//
// The statements are embedded verbatim as a data term and a fixed rule body
// walks them, so the output depends only on the document's canonical form.

use gs_policy::GovernancePolicy;

use crate::error::TranslationError;
use crate::translate::Translator;

const HEADER: &str = r#"package __PACKAGE__

import rego.v1

# Generated by guardsync from policy __NAME__ (__POLICY_ID__).
# Source content hash: __HASH__

statements := __STATEMENTS__

deny contains msg if {
	some stmt in statements
	stmt.Effect == "Deny"
	statement_applies(stmt)
	msg := sprintf("SCP: %s is explicitly denied", [input.action])
}
"#;

const IMPLICIT_DENY: &str = r#"
deny contains msg if {
	not explicitly_allowed
	not explicitly_denied
	msg := sprintf("SCP: %s is not explicitly allowed", [input.action])
}

explicitly_allowed if {
	some stmt in statements
	stmt.Effect == "Allow"
	statement_applies(stmt)
}

explicitly_denied if {
	some stmt in statements
	stmt.Effect == "Deny"
	statement_applies(stmt)
}
"#;

const HELPERS: &str = r#"
statement_applies(stmt) if {
	action_applies(stmt)
	resource_applies(stmt)
	conditions_hold(stmt)
}

action_applies(stmt) if {
	not stmt.Action
	not stmt.NotAction
}

action_applies(stmt) if {
	some pattern in stmt.Action
	glob.match(literal_glob(pattern), null, input.action)
}

action_applies(stmt) if {
	stmt.NotAction
	every pattern in stmt.NotAction {
		not glob.match(literal_glob(pattern), null, input.action)
	}
}

resource_applies(stmt) if {
	not stmt.Resource
	not stmt.NotResource
}

resource_applies(stmt) if {
	some pattern in stmt.Resource
	glob.match(literal_glob(pattern), null, input.resource)
}

resource_applies(stmt) if {
	stmt.NotResource
	every pattern in stmt.NotResource {
		not glob.match(literal_glob(pattern), null, input.resource)
	}
}

conditions_hold(stmt) if {
	not stmt.Condition
}

conditions_hold(stmt) if {
	stmt.Condition
	every operator, block in stmt.Condition {
		every key, values in block {
			condition_holds(operator, key, values)
		}
	}
}

# Only * and ? are wildcards; brackets and braces match themselves.
literal_glob(pattern) := replace(replace(replace(replace(pattern, "[", "\\["), "]", "\\]"), "{", "\\{"), "}", "\\}")

has_context(key) if {
	input.context[key] != null
}

unqualified(operator) := trim_prefix(trim_prefix(operator, "ForAllValues:"), "ForAnyValue:")

base_operator(operator) := trim_suffix(unqualified(operator), "IfExists")

all_values(operator) if {
	startswith(operator, "ForAllValues:")
}

condition_holds(operator, key, values) if {
	endswith(operator, "IfExists")
	not has_context(key)
}

condition_holds(operator, key, values) if {
	not has_context(key)
	base_operator(operator) in {"StringNotEquals", "StringNotLike"}
}

condition_holds(operator, key, values) if {
	has_context(key)
	not is_array(input.context[key])
	value_holds(base_operator(operator), input.context[key], values)
}

condition_holds(operator, key, values) if {
	is_array(input.context[key])
	not all_values(operator)
	some item in input.context[key]
	value_holds(base_operator(operator), item, values)
}

condition_holds(operator, key, values) if {
	is_array(input.context[key])
	all_values(operator)
	every item in input.context[key] {
		value_holds(base_operator(operator), item, values)
	}
}

value_text(value) := value if {
	is_string(value)
}

value_text(value) := sprintf("%v", [value]) if {
	not is_string(value)
}

string_equals(actual, values) if {
	some expected in values
	value_text(expected) == value_text(actual)
}

string_like(actual, values) if {
	some pattern in values
	glob.match(literal_glob(value_text(pattern)), null, value_text(actual))
}

value_holds("StringEquals", actual, values) if {
	string_equals(actual, values)
}

value_holds("StringNotEquals", actual, values) if {
	not string_equals(actual, values)
}

value_holds("StringLike", actual, values) if {
	string_like(actual, values)
}

value_holds("StringNotLike", actual, values) if {
	not string_like(actual, values)
}

value_holds("Bool", actual, values) if {
	some expected in values
	lower(value_text(actual)) == lower(value_text(expected))
}

value_holds("NumericEquals", actual, values) if {
	some expected in values
	to_number(actual) == to_number(expected)
}

value_holds("NumericLessThan", actual, values) if {
	some expected in values
	to_number(actual) < to_number(expected)
}

value_holds("NumericGreaterThan", actual, values) if {
	some expected in values
	to_number(actual) > to_number(expected)
}
"#;

/// Renders a document into a self-contained Rego module.
///
/// With `implicit_deny` set, an operation no statement matches is denied as
/// well; otherwise only explicit Deny statements contribute.
#[derive(Debug, Clone)]
pub struct TemplateTranslator {
    package: String,
    implicit_deny: bool,
}

impl TemplateTranslator {
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            implicit_deny: false,
        }
    }

    pub fn with_implicit_deny(mut self, implicit_deny: bool) -> Self {
        self.implicit_deny = implicit_deny;
        self
    }

    pub fn render(&self, policy: &GovernancePolicy) -> Result<String, TranslationError> {
        let statements = serde_json::to_string_pretty(&policy.document.statements)
            .map_err(|e| TranslationError::permanent(format!("cannot embed statements: {e}")))?;
        let mut text = HEADER
            .replace("__PACKAGE__", &self.package)
            .replace("__NAME__", &sanitize(&policy.name))
            .replace("__POLICY_ID__", &sanitize(&policy.policy_id))
            .replace("__HASH__", &policy.content_hash)
            .replace("__STATEMENTS__", &statements);
        if self.implicit_deny {
            text.push_str(IMPLICIT_DENY);
        }
        text.push_str(HELPERS);
        Ok(text)
    }
}

impl Default for TemplateTranslator {
    fn default() -> Self {
        Self::new("aws.scp")
    }
}

impl Translator for TemplateTranslator {
    fn translate(&self, policy: &GovernancePolicy) -> Result<String, TranslationError> {
        self.render(policy)
    }

    fn name(&self) -> &str {
        "template"
    }
}

// Names end up in a Rego comment; keep them on one line.
fn sanitize(s: &str) -> String {
    s.replace(['\n', '\r'], " ")
}
