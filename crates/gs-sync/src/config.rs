//! Synchronization configuration and on-disk layout.
//!
//! Settings come from `guardsync.toml`; every field has a default so an
//! absent file (or an absent section) yields a working configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use gs_policy::{Verdict, VerdictMode};

use crate::error::SyncError;

/// Top-level configuration from guardsync.toml
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub lease: LeaseConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub validation: ValidationConfig,

    #[serde(default)]
    pub translator: TranslatorConfig,

    #[serde(default)]
    pub evaluator: EvaluatorConfig,
}

/// Retry discipline shared by every stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts allowed per stage, including the first.
    #[serde(default = "default_budget")]
    pub budget: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Randomise each delay in [0, computed delay].
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            budget: default_budget(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: true,
        }
    }
}

/// Single-flight lease settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaseConfig {
    #[serde(default = "default_lease_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_lease_ttl_secs(),
        }
    }
}

impl LeaseConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Upper bound on any single translator or evaluator call.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

impl GatewayConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationConfig {
    #[serde(default = "default_query")]
    pub query: String,

    #[serde(default)]
    pub mode: VerdictMode,

    /// Reference verdict for requests no statement matches.
    #[serde(default = "default_implicit_verdict")]
    pub implicit_verdict: Verdict,

    /// Validate generated fidelity cases on every run.
    #[serde(default = "default_true")]
    pub fidelity: bool,

    /// Candidate change set gated on every run.
    #[serde(default)]
    pub change_set: Option<PathBuf>,

    /// Labelled fixture corpus (allow/ and deny/ subdirectories).
    #[serde(default)]
    pub fixtures_dir: Option<PathBuf>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            query: default_query(),
            mode: VerdictMode::default(),
            implicit_verdict: default_implicit_verdict(),
            fidelity: true,
            change_set: None,
            fixtures_dir: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranslatorKind {
    /// Built-in deterministic renderer.
    #[default]
    Template,
    /// External command: policy JSON on stdin, rule text on stdout.
    Command,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslatorConfig {
    #[serde(default)]
    pub kind: TranslatorKind,

    /// argv for `kind = "command"`.
    #[serde(default)]
    pub command: Vec<String>,

    /// Package name for the template renderer.
    #[serde(default = "default_package")]
    pub package: String,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            kind: TranslatorKind::default(),
            command: Vec::new(),
            package: default_package(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    #[serde(default = "default_opa_path")]
    pub opa_path: String,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            opa_path: default_opa_path(),
        }
    }
}

fn default_budget() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

fn default_lease_ttl_secs() -> u64 {
    300
}

fn default_call_timeout_secs() -> u64 {
    10
}

fn default_query() -> String {
    "data.aws.scp.deny".to_string()
}

fn default_implicit_verdict() -> Verdict {
    Verdict::Allow
}

fn default_package() -> String {
    "aws.scp".to_string()
}

fn default_opa_path() -> String {
    "opa".to_string()
}

impl SyncConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, SyncError> {
        let content = std::fs::read_to_string(path).map_err(|source| SyncError::IoError {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|e| SyncError::Config {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Defaults when the file does not exist. A file that exists but does
    /// not parse is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self, SyncError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

/// Paths of the durable state for one project.
#[derive(Debug, Clone, PartialEq)]
pub struct StatePaths {
    pub project_root: PathBuf,
    pub config_file: PathBuf,
    pub state_dir: PathBuf,
    pub rules_dir: PathBuf,
    pub ledger: PathBuf,
    pub notifications_log: PathBuf,
}

impl StatePaths {
    pub fn for_project(project_root: impl AsRef<Path>) -> Self {
        let root = project_root.as_ref().to_path_buf();
        let state_dir = root.join(".guardsync");
        Self {
            config_file: root.join("guardsync.toml"),
            rules_dir: state_dir.join("rules"),
            ledger: state_dir.join("ledger.jsonl"),
            notifications_log: state_dir.join("notifications.jsonl"),
            state_dir,
            project_root: root,
        }
    }
}
