// gate.rs — Gate a proposed change set on the active rule sets.
//
// Every operation is expected to be allowed; any DENY or evaluation error
// blocks the change.

use std::path::PathBuf;

use clap::Args;
use gs_policy::{ChangeSet, VerdictMode};
use gs_rules::QueryPath;
use gs_sync::RuleSink;
use gs_validate::{ReportStatus, ValidationMode};

use crate::context::Context;

#[derive(Args)]
pub struct GateArgs {
    /// Change set to gate (JSON or YAML).
    #[arg(long)]
    pub change_set: PathBuf,

    /// Only gate against this policy's active rule set.
    #[arg(long)]
    pub policy_id: Option<String>,

    /// Query path (defaults to validation.query).
    #[arg(long)]
    pub query: Option<String>,

    /// Verdict mode: deny_set, allow_bool or deny_bool.
    #[arg(long)]
    pub mode: Option<String>,
}

pub fn execute(args: &GateArgs, ctx: &Context) -> anyhow::Result<()> {
    let change_set = ChangeSet::load(&ctx.resolve(&args.change_set))?;
    let query = QueryPath::parse(args.query.as_deref().unwrap_or(&ctx.config.validation.query))?;
    let mode = match &args.mode {
        Some(mode) => mode.parse::<VerdictMode>()?,
        None => ctx.config.validation.mode,
    };

    let sink = ctx.rule_store()?;
    let active = match &args.policy_id {
        Some(id) => match sink.active(id)? {
            Some(record) => vec![record],
            None => anyhow::bail!("No active rule set for {}", id),
        },
        None => sink.list_active()?,
    };
    if active.is_empty() {
        println!("No active rule sets; nothing to gate.");
        return Ok(());
    }

    let validator = ctx.validator()?;
    let mut blocked = Vec::new();
    for record in &active {
        let report = validator.validate(&record.rule_set, &change_set, mode, &query, ValidationMode::Gate)?;
        println!("{}", report.render_summary(record.policy_id()));
        if report.status != ReportStatus::Match {
            blocked.push(record.policy_id().to_string());
        }
    }

    println!();
    if blocked.is_empty() {
        println!(
            "Change set allowed by {} rule set(s): {} operation(s) checked.",
            active.len(),
            change_set.len()
        );
        return Ok(());
    }
    println!("Change set blocked by: {}", blocked.join(", "));
    anyhow::bail!("{} rule set(s) blocked the change set", blocked.len())
}
