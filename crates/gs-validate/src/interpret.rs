// interpret.rs — Raw evaluator output → ALLOW | DENY.
//
// Pure and total over shape-compatible inputs. A shape that does not fit the
// mode is a type mismatch, never a silent default.

use gs_policy::{Verdict, VerdictMode};
use gs_rules::{EvalError, RawVerdict};

/// Interpret `raw` under `mode`.
///
/// | mode         | undefined / null | bool        | collection         |
/// |--------------|------------------|-------------|--------------------|
/// | `deny_set`   | ALLOW            | mismatch    | DENY iff non-empty |
/// | `allow_bool` | DENY             | true ⇒ ALLOW | mismatch          |
/// | `deny_bool`  | ALLOW            | true ⇒ DENY  | mismatch          |
///
/// Any other value (number, string) is a mismatch in every mode.
pub fn interpret(raw: &RawVerdict, mode: VerdictMode) -> Result<Verdict, EvalError> {
    match (mode, raw) {
        (VerdictMode::DenySet, RawVerdict::Undefined | RawVerdict::Null) => Ok(Verdict::Allow),
        (VerdictMode::DenySet, RawVerdict::Collection(items)) if items.is_empty() => {
            Ok(Verdict::Allow)
        }
        (VerdictMode::DenySet, RawVerdict::Collection(_)) => Ok(Verdict::Deny),

        (VerdictMode::AllowBool, RawVerdict::Bool(true)) => Ok(Verdict::Allow),
        (VerdictMode::AllowBool, RawVerdict::Bool(false) | RawVerdict::Undefined | RawVerdict::Null) => {
            Ok(Verdict::Deny)
        }

        (VerdictMode::DenyBool, RawVerdict::Bool(true)) => Ok(Verdict::Deny),
        (VerdictMode::DenyBool, RawVerdict::Bool(false) | RawVerdict::Undefined | RawVerdict::Null) => {
            Ok(Verdict::Allow)
        }

        (mode, raw) => Err(EvalError::TypeMismatch {
            mode: mode.to_string(),
            found: raw.describe(),
        }),
    }
}
