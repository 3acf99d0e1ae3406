// translate.rs — Translation gateway.
//
// The gateway owns the call boundary around a Translator: input checks,
// deadline, and output cleanup. It never retries.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;

use gs_policy::GovernancePolicy;

use crate::deadline::{call_with_deadline, CallError};
use crate::error::TranslationError;

/// Turns a governance document into candidate rule text.
///
/// Implementations classify their own failures as transient or permanent.
pub trait Translator: Send + Sync {
    fn translate(&self, policy: &GovernancePolicy) -> Result<String, TranslationError>;

    /// Short name for logs and error records.
    fn name(&self) -> &str;
}

/// Bounded, non-retrying front door to a [`Translator`].
pub struct TranslationGateway {
    translator: Arc<dyn Translator>,
    timeout: Duration,
}

impl TranslationGateway {
    pub fn new(translator: Arc<dyn Translator>, timeout: Duration) -> Self {
        Self {
            translator,
            timeout,
        }
    }

    pub fn translator_name(&self) -> &str {
        self.translator.name()
    }

    /// Translate once. Empty output after fence stripping is transient.
    pub fn translate(&self, policy: &GovernancePolicy) -> Result<String, TranslationError> {
        if policy.document.statements.is_empty() {
            return Err(TranslationError::permanent(format!(
                "policy '{}' has no statements",
                policy.policy_id
            )));
        }

        let translator = Arc::clone(&self.translator);
        let owned = policy.clone();
        let raw = match call_with_deadline(self.timeout, move || translator.translate(&owned)) {
            Ok(result) => result?,
            Err(CallError::Elapsed) => {
                return Err(TranslationError::transient(format!(
                    "{} did not respond within {:?}",
                    self.translator.name(),
                    self.timeout
                )))
            }
            Err(CallError::Panicked) => {
                return Err(TranslationError::permanent(format!(
                    "{} panicked",
                    self.translator.name()
                )))
            }
        };

        let text = strip_fenced_code(&raw);
        if text.trim().is_empty() {
            return Err(TranslationError::transient(format!(
                "{} returned empty rule text",
                self.translator.name()
            )));
        }
        tracing::debug!(
            policy_id = %policy.policy_id,
            translator = %self.translator.name(),
            bytes = text.len(),
            "translation produced rule text"
        );
        Ok(text)
    }
}

fn fence_pattern() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n(.*?)```").ok())
        .as_ref()
}

/// Extract the first fenced code block, or return the trimmed text when
/// there is none.
pub fn strip_fenced_code(text: &str) -> String {
    fence_pattern()
        .and_then(|re| re.captures(text))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_else(|| text.trim().to_string())
}
