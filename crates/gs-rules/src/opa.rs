// opa.rs — Open Policy Agent evaluator.
//
// Shells out to the `opa` binary: `opa check` to compile, `opa eval` with
// the rules and input written to scratch files. Each call is killed if it
// outlives the configured timeout.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use serde_json::Value;
use tempfile::NamedTempFile;

use crate::error::EvalError;
use crate::evaluate::RuleEvaluator;
use crate::process::{self, ProcessError, ProcessOutput};
use crate::query::QueryPath;
use crate::raw::RawVerdict;

#[derive(Debug, Clone)]
pub struct OpaEvaluator {
    binary: PathBuf,
    timeout: Duration,
}

impl OpaEvaluator {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    /// Resolve `opa_path` (a bare name is looked up on PATH).
    pub fn locate(opa_path: &str, timeout: Duration) -> Result<Self, EvalError> {
        let binary = which::which(opa_path).map_err(|e| EvalError::Unavailable {
            message: format!("cannot find '{opa_path}': {e}"),
        })?;
        Ok(Self::new(binary, timeout))
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn run(&self, args: &[&std::ffi::OsStr]) -> Result<ProcessOutput, EvalError> {
        let mut command = Command::new(&self.binary);
        command.args(args);
        process::run(command, None, self.timeout).map_err(|e| match e {
            ProcessError::Timeout { timeout, .. } => EvalError::Timeout {
                after_ms: timeout.as_millis() as u64,
            },
            ProcessError::Spawn { .. } => EvalError::Unavailable {
                message: e.to_string(),
            },
            ProcessError::Wait { .. } => EvalError::Engine {
                message: e.to_string(),
            },
        })
    }
}

impl RuleEvaluator for OpaEvaluator {
    fn compile(&self, rules: &str) -> Result<(), EvalError> {
        let file = scratch(".rego", rules.as_bytes())?;
        let output = self.run(&["check".as_ref(), file.path().as_os_str()])?;
        if output.success() {
            Ok(())
        } else {
            Err(EvalError::Syntax {
                message: output.diagnostics(),
            })
        }
    }

    fn evaluate(
        &self,
        rules: &str,
        query: &QueryPath,
        input: &Value,
    ) -> Result<RawVerdict, EvalError> {
        let rules_file = scratch(".rego", rules.as_bytes())?;
        let input_bytes = serde_json::to_vec(input).map_err(|e| EvalError::Engine {
            message: format!("cannot encode input: {e}"),
        })?;
        let input_file = scratch(".json", &input_bytes)?;

        let output = self.run(&[
            "eval".as_ref(),
            "--format".as_ref(),
            "json".as_ref(),
            "--data".as_ref(),
            rules_file.path().as_os_str(),
            "--input".as_ref(),
            input_file.path().as_os_str(),
            query.as_str().as_ref(),
        ])?;

        if !output.success() {
            let message = output.diagnostics();
            if message.contains("rego_parse_error") || message.contains("rego_compile_error") {
                return Err(EvalError::Syntax { message });
            }
            return Err(EvalError::Engine { message });
        }
        parse_eval_output(&output.stdout)
    }

    fn name(&self) -> &str {
        "opa"
    }
}

/// Extract the query value from `opa eval --format json` output.
///
/// An empty `result` (or no `result` key) means the query is undefined.
pub fn parse_eval_output(stdout: &str) -> Result<RawVerdict, EvalError> {
    let doc: Value = serde_json::from_str(stdout).map_err(|e| EvalError::Engine {
        message: format!("unparseable opa output: {e}"),
    })?;
    let value = doc
        .get("result")
        .and_then(Value::as_array)
        .and_then(|results| results.first())
        .and_then(|first| first.get("expressions"))
        .and_then(Value::as_array)
        .and_then(|exprs| exprs.first())
        .and_then(|expr| expr.get("value"))
        .cloned();
    Ok(RawVerdict::from_value(value))
}

fn scratch(suffix: &str, contents: &[u8]) -> Result<NamedTempFile, EvalError> {
    let io_err = |e: std::io::Error| EvalError::Engine {
        message: format!("cannot write scratch file: {e}"),
    };
    let mut file = tempfile::Builder::new()
        .prefix("guardsync-")
        .suffix(suffix)
        .tempfile()
        .map_err(io_err)?;
    file.write_all(contents).map_err(io_err)?;
    file.flush().map_err(io_err)?;
    Ok(file)
}
