// validate.rs — Differential validation of governance document / rule text pairs.
//
// Pairs are matched by name: `<policies-dir>/<name>.json` and
// `<rules-dir>/<name>.rego`. Exit status: 0 when every pair matches; with
// `--fail-on-mismatch`, non-zero on any mismatch or evaluation error.

use std::path::{Path, PathBuf};

use clap::Args;
use gs_policy::{GovernancePolicy, RuleSet, VerdictMode};
use gs_rules::QueryPath;
use gs_validate::report::render_overall;
use gs_validate::{ReportStatus, ValidationReport};

use crate::context::Context;

#[derive(Args)]
pub struct ValidateArgs {
    /// Policy name; every policy in --policies-dir when omitted.
    pub policy: Option<String>,

    /// Directory of governance documents (`<name>.json`).
    #[arg(long, default_value = "policies")]
    pub policies_dir: PathBuf,

    /// Directory of rule text (`<name>.rego`).
    #[arg(long, default_value = "rules")]
    pub rules_dir: PathBuf,

    /// Labelled fixture corpus (defaults to validation.fixtures_dir).
    #[arg(long)]
    pub fixtures_dir: Option<PathBuf>,

    /// Query path (defaults to validation.query).
    #[arg(long)]
    pub query: Option<String>,

    /// Verdict mode: deny_set, allow_bool or deny_bool.
    #[arg(long)]
    pub mode: Option<String>,

    /// Skip cases generated from the governance document.
    #[arg(long)]
    pub no_fidelity: bool,

    /// Exit non-zero on any mismatch or evaluation error.
    #[arg(long)]
    pub fail_on_mismatch: bool,

    /// Print reports as JSON.
    #[arg(long)]
    pub json: bool,
}

pub fn execute(args: &ValidateArgs, ctx: &Context) -> anyhow::Result<()> {
    let policies_dir = ctx.resolve(&args.policies_dir);
    let rules_dir = ctx.resolve(&args.rules_dir);
    let query = QueryPath::parse(args.query.as_deref().unwrap_or(&ctx.config.validation.query))?;
    let mode = match &args.mode {
        Some(mode) => mode.parse::<VerdictMode>()?,
        None => ctx.config.validation.mode,
    };

    let names = match &args.policy {
        Some(name) => vec![name.clone()],
        None => policy_names(&policies_dir)?,
    };
    if names.is_empty() {
        println!("No policies found in {}", policies_dir.display());
        return Ok(());
    }

    let validator = ctx.validator()?;
    let suite = ctx.suite(args.fixtures_dir.as_deref(), !args.no_fidelity)?;

    let mut reports: Vec<(String, ValidationReport)> = Vec::new();
    let mut missing = Vec::new();
    for name in &names {
        let policy = GovernancePolicy::load(&policies_dir.join(format!("{name}.json")))?;
        let rule_path = rules_dir.join(format!("{name}.rego"));
        let rule_text = match std::fs::read_to_string(&rule_path) {
            Ok(text) => text,
            // A single named pair must exist; in a directory sweep it is reported.
            Err(e) if args.policy.is_none() && e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(policy = %name, path = %rule_path.display(), "no rule text for policy");
                missing.push(name.clone());
                continue;
            }
            Err(e) => anyhow::bail!("cannot read {}: {}", rule_path.display(), e),
        };
        let rule_set = RuleSet::pending(&policy, 1, rule_text);
        let report = suite.run(&validator, &policy, &rule_set, mode, &query)?;
        reports.push((name.clone(), report));
    }

    if args.json {
        let body: Vec<_> = reports
            .iter()
            .map(|(name, report)| serde_json::json!({ "policy": name, "report": report }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        for (name, report) in &reports {
            println!("{}", report.render_summary(name));
            println!();
        }
        if reports.len() > 1 || !missing.is_empty() {
            println!("{}", render_overall(&reports));
        }
        for name in &missing {
            println!("  - {name} (no rule text)");
        }
    }

    let issues = reports
        .iter()
        .filter(|(_, r)| r.status != ReportStatus::Match)
        .count()
        + missing.len();
    if args.fail_on_mismatch && issues > 0 {
        anyhow::bail!("{} polic(ies) did not validate", issues);
    }
    Ok(())
}

/// Stems of every `*.json` document in `dir`, sorted.
fn policy_names(dir: &Path) -> anyhow::Result<Vec<String>> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map_err(|e| anyhow::anyhow!("cannot read {}: {}", dir.display(), e))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
        .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().to_string()))
        .collect();
    names.sort();
    Ok(names)
}
