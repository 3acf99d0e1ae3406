//! # gs-rules
//!
//! Gateways to the two opaque collaborators of the pipeline.
//!
//! - [`TranslationGateway`] wraps a [`Translator`] (governance document in,
//!   rule text out). It never retries; retry policy belongs to the caller.
//! - [`EvaluatorGateway`] wraps a [`RuleEvaluator`] capability
//!   (`compile`, `evaluate`). Rules are always compiled before evaluation and
//!   a compile failure short-circuits with [`EvalError::Syntax`].
//!
//! Both gateways bound every call with a deadline regardless of the
//! implementation behind them. Concrete collaborators: [`TemplateTranslator`],
//! [`CommandTranslator`] and [`OpaEvaluator`].

pub mod command;
pub mod deadline;
pub mod error;
pub mod evaluate;
pub mod opa;
pub mod process;
pub mod query;
pub mod raw;
pub mod template;
pub mod translate;

pub use command::CommandTranslator;
pub use error::{EvalError, TranslationError};
pub use evaluate::{EvaluatorGateway, RuleEvaluator};
pub use opa::OpaEvaluator;
pub use query::QueryPath;
pub use raw::RawVerdict;
pub use template::TemplateTranslator;
pub use translate::{strip_fenced_code, TranslationGateway, Translator};
