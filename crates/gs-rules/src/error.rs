// error.rs — Gateway error taxonomy.
//
// Transience is decided here, once, so the orchestrator never has to
// pattern-match on messages.

use thiserror::Error;

/// Failure of the translation collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TranslationError {
    /// Timeouts, rate limits, empty model output. Retryable.
    #[error("transient translation failure: {reason}")]
    Transient { reason: String },

    /// Malformed input or a collaborator that rejects it outright.
    #[error("permanent translation failure: {reason}")]
    Permanent { reason: String },
}

impl TranslationError {
    pub fn transient(reason: impl Into<String>) -> Self {
        TranslationError::Transient {
            reason: reason.into(),
        }
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        TranslationError::Permanent {
            reason: reason.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, TranslationError::Transient { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TranslationError::Transient { .. } => "translation_transient",
            TranslationError::Permanent { .. } => "translation_permanent",
        }
    }
}

/// Failure of the rule evaluator collaborator or of verdict interpretation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EvalError {
    /// The rule text does not parse or compile.
    #[error("rule syntax error: {message}")]
    Syntax { message: String },

    /// The raw verdict's shape does not fit the verdict mode.
    #[error("verdict type mismatch: mode {mode} cannot interpret {found}")]
    TypeMismatch { mode: String, found: String },

    /// The call exceeded its deadline.
    #[error("evaluation timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    /// The evaluator failed while running (crash, I/O, unparseable output).
    #[error("evaluator failure: {message}")]
    Engine { message: String },

    /// The evaluator cannot be used at all (binary missing, not executable).
    #[error("evaluator unavailable: {message}")]
    Unavailable { message: String },

    /// The query path is not a well-formed `data.` reference.
    #[error("invalid query path '{query}'")]
    InvalidQuery { query: String },
}

impl EvalError {
    pub fn is_transient(&self) -> bool {
        matches!(self, EvalError::Timeout { .. } | EvalError::Engine { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            EvalError::Syntax { .. } => "syntax",
            EvalError::TypeMismatch { .. } => "type_mismatch",
            EvalError::Timeout { .. } => "timeout",
            EvalError::Engine { .. } => "engine",
            EvalError::Unavailable { .. } => "unavailable",
            EvalError::InvalidQuery { .. } => "invalid_query",
        }
    }
}
