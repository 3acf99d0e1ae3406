// error.rs — Error types for validation.
//
// Evaluator failures are not errors here: they are recorded per operation in
// the report. These variants cover inputs the validator cannot work with.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidateError {
    /// Fixture-mode validation needs a labelled expectation on every operation.
    #[error("operation {index} ({action}) has no expected verdict; fixture validation requires one")]
    MissingExpectation { index: usize, action: String },

    /// The fixture corpus contains no operations.
    #[error("no fixtures found under {0}")]
    EmptyCorpus(String),

    /// A fixture file could not be parsed.
    #[error("invalid fixture {path}: {reason}")]
    InvalidFixture { path: String, reason: String },

    #[error("I/O error at {path}: {source}")]
    IoError {
        path: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    Policy(#[from] gs_policy::PolicyError),
}
