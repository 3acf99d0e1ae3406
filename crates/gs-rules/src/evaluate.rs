// evaluate.rs — Rule evaluator gateway.
//
// Every evaluation is preceded by a compile check of the same rule text. The
// last successfully compiled rule hash is remembered so a change set of N
// operations compiles once, not N times.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;

use gs_policy::hash;

use crate::deadline::{call_with_deadline, CallError};
use crate::error::EvalError;
use crate::query::QueryPath;
use crate::raw::RawVerdict;

/// The evaluator capability: compile rule text, evaluate a query against
/// an input document.
pub trait RuleEvaluator: Send + Sync {
    /// Parse and compile. A failure is [`EvalError::Syntax`].
    fn compile(&self, rules: &str) -> Result<(), EvalError>;

    /// Evaluate `query` with `input` bound as the input document.
    fn evaluate(&self, rules: &str, query: &QueryPath, input: &Value)
        -> Result<RawVerdict, EvalError>;

    fn name(&self) -> &str;
}

/// Bounded front door to a [`RuleEvaluator`].
pub struct EvaluatorGateway {
    evaluator: Arc<dyn RuleEvaluator>,
    timeout: Duration,
    compiled: Mutex<Option<String>>,
}

impl EvaluatorGateway {
    pub fn new(evaluator: Arc<dyn RuleEvaluator>, timeout: Duration) -> Self {
        Self {
            evaluator,
            timeout,
            compiled: Mutex::new(None),
        }
    }

    pub fn evaluator_name(&self) -> &str {
        self.evaluator.name()
    }

    /// Compile `rules`, skipping the call when the same text already compiled.
    pub fn check(&self, rules: &str) -> Result<(), EvalError> {
        let rule_hash = hash::hash_str(rules);
        if self.last_compiled().as_deref() == Some(rule_hash.as_str()) {
            return Ok(());
        }

        let evaluator = Arc::clone(&self.evaluator);
        let owned = rules.to_string();
        self.bounded(move || evaluator.compile(&owned))?;

        if let Ok(mut guard) = self.compiled.lock() {
            *guard = Some(rule_hash);
        }
        Ok(())
    }

    /// Compile (if needed) then evaluate one query.
    pub fn evaluate(
        &self,
        rules: &str,
        query: &QueryPath,
        input: &Value,
    ) -> Result<RawVerdict, EvalError> {
        self.check(rules)?;
        let evaluator = Arc::clone(&self.evaluator);
        let (rules, query, input) = (rules.to_string(), query.clone(), input.clone());
        self.bounded(move || evaluator.evaluate(&rules, &query, &input))
    }

    fn last_compiled(&self) -> Option<String> {
        self.compiled.lock().ok().and_then(|guard| guard.clone())
    }

    fn bounded<T, F>(&self, f: F) -> Result<T, EvalError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, EvalError> + Send + 'static,
    {
        match call_with_deadline(self.timeout, f) {
            Ok(result) => result,
            Err(CallError::Elapsed) => Err(EvalError::Timeout {
                after_ms: self.timeout.as_millis() as u64,
            }),
            Err(CallError::Panicked) => Err(EvalError::Engine {
                message: format!("{} panicked", self.evaluator.name()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        compiles: AtomicUsize,
        evaluations: AtomicUsize,
    }

    impl RuleEvaluator for Counting {
        fn compile(&self, rules: &str) -> Result<(), EvalError> {
            self.compiles.fetch_add(1, Ordering::SeqCst);
            if rules.contains("syntax error") {
                return Err(EvalError::Syntax {
                    message: "unexpected token".into(),
                });
            }
            Ok(())
        }

        fn evaluate(
            &self,
            _rules: &str,
            _query: &QueryPath,
            input: &Value,
        ) -> Result<RawVerdict, EvalError> {
            self.evaluations.fetch_add(1, Ordering::SeqCst);
            if input["action"] == "slow" {
                std::thread::sleep(Duration::from_millis(500));
            }
            Ok(RawVerdict::Collection(vec![]))
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    fn gateway(timeout: Duration) -> (EvaluatorGateway, Arc<Counting>) {
        let e = Arc::new(Counting::default());
        (EvaluatorGateway::new(e.clone(), timeout), e)
    }

    #[test]
    fn compiles_once_per_rule_text() {
        let (gw, e) = gateway(Duration::from_secs(5));
        let q = QueryPath::default();
        for action in ["s3:GetObject", "s3:PutObject", "s3:DeleteBucket"] {
            gw.evaluate("package a", &q, &json!({"action": action})).unwrap();
        }
        assert_eq!(e.compiles.load(Ordering::SeqCst), 1);
        assert_eq!(e.evaluations.load(Ordering::SeqCst), 3);

        gw.evaluate("package b", &q, &json!({})).unwrap();
        assert_eq!(e.compiles.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn syntax_error_short_circuits() {
        let (gw, e) = gateway(Duration::from_secs(5));
        let err = gw
            .evaluate("syntax error", &QueryPath::default(), &json!({}))
            .unwrap_err();
        assert_eq!(err.kind(), "syntax");
        assert_eq!(e.evaluations.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failed_compile_is_not_memoized() {
        let (gw, e) = gateway(Duration::from_secs(5));
        assert!(gw.check("syntax error").is_err());
        assert!(gw.check("syntax error").is_err());
        assert_eq!(e.compiles.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn slow_evaluation_times_out() {
        let (gw, _) = gateway(Duration::from_millis(20));
        let err = gw
            .evaluate("package a", &QueryPath::default(), &json!({"action": "slow"}))
            .unwrap_err();
        assert!(matches!(err, EvalError::Timeout { after_ms: 20 }));
        assert!(err.is_transient());
    }
}
