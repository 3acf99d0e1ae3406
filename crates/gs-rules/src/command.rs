// command.rs — Translation through an external program.
//
// The program receives the policy as JSON on stdin and writes rule text to
// stdout. Exit code 75 (EX_TEMPFAIL) marks a retryable failure.

use std::process::Command;
use std::time::Duration;

use serde_json::json;

use gs_policy::GovernancePolicy;

use crate::error::TranslationError;
use crate::process::{self, ProcessError};
use crate::translate::Translator;

/// `sysexits.h` EX_TEMPFAIL.
pub const EXIT_TEMPFAIL: i32 = 75;

#[derive(Debug, Clone)]
pub struct CommandTranslator {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandTranslator {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    /// Build from a shell-style command line split on whitespace.
    pub fn from_command_line(line: &str, timeout: Duration) -> Result<Self, TranslationError> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| TranslationError::permanent("translator command is empty"))?;
        Ok(Self::new(program, parts.collect(), timeout))
    }

    fn request(policy: &GovernancePolicy) -> Result<Vec<u8>, TranslationError> {
        let body = json!({
            "policyId": policy.policy_id,
            "policyName": policy.name,
            "contentHash": policy.content_hash,
            "document": policy.document,
        });
        serde_json::to_vec(&body)
            .map_err(|e| TranslationError::permanent(format!("cannot encode request: {e}")))
    }
}

impl Translator for CommandTranslator {
    fn translate(&self, policy: &GovernancePolicy) -> Result<String, TranslationError> {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        let output = match process::run(command, Some(Self::request(policy)?), self.timeout) {
            Ok(output) => output,
            Err(ProcessError::Timeout { .. }) => {
                return Err(TranslationError::transient(format!(
                    "{} timed out after {:?}",
                    self.program, self.timeout
                )))
            }
            Err(e @ ProcessError::Spawn { .. }) => {
                return Err(TranslationError::permanent(e.to_string()))
            }
            Err(e @ ProcessError::Wait { .. }) => {
                return Err(TranslationError::transient(e.to_string()))
            }
        };

        match output.code() {
            Some(0) => Ok(output.stdout),
            Some(EXIT_TEMPFAIL) => Err(TranslationError::transient(format!(
                "{} asked for a retry: {}",
                self.program,
                output.diagnostics()
            ))),
            // Killed by a signal.
            None => Err(TranslationError::transient(format!(
                "{} terminated without an exit code",
                self.program
            ))),
            Some(code) => Err(TranslationError::permanent(format!(
                "{} exited with {code}: {}",
                self.program,
                output.diagnostics()
            ))),
        }
    }

    fn name(&self) -> &str {
        &self.program
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use gs_policy::{PolicyDocument, Statement};

    fn policy() -> GovernancePolicy {
        GovernancePolicy::new(
            "p-9",
            "deny-ec2",
            PolicyDocument::new(vec![Statement::deny(&["ec2:*"])]),
        )
        .unwrap()
    }

    fn sh(script: &str) -> CommandTranslator {
        CommandTranslator::new(
            "sh",
            vec!["-c".into(), script.into()],
            Duration::from_secs(10),
        )
    }

    #[test]
    fn stdout_is_rule_text() {
        let text = sh("cat >/dev/null; echo 'package aws.scp'")
            .translate(&policy())
            .unwrap();
        assert_eq!(text.trim(), "package aws.scp");
    }

    #[test]
    fn receives_policy_on_stdin() {
        let text = sh("cat").translate(&policy()).unwrap();
        let v: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["policyId"], "p-9");
        assert_eq!(v["document"]["Statement"][0]["Action"][0], "ec2:*");
    }

    #[test]
    fn tempfail_is_transient() {
        let err = sh("exit 75").translate(&policy()).unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn other_failures_are_permanent() {
        let err = sh("echo 'unsupported operator' >&2; exit 2")
            .translate(&policy())
            .unwrap_err();
        assert!(!err.is_transient());
        assert!(err.to_string().contains("unsupported operator"));
    }

    #[test]
    fn empty_command_line_is_rejected() {
        assert!(CommandTranslator::from_command_line("  ", Duration::from_secs(1)).is_err());
        let t = CommandTranslator::from_command_line("gen-rego --model x", Duration::from_secs(1))
            .unwrap();
        assert_eq!(t.name(), "gen-rego");
    }
}
