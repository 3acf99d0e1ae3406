// sync.rs — Process policy event files.
//
// Each policy identifier runs on the blocking pool, so identifiers proceed
// concurrently. The durable lease still serializes runs across processes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Args;
use gs_sync::{PolicyEvent, RunOutcome, RunReport};

use super::ledger::truncate;
use crate::context::Context;

#[derive(Args)]
pub struct SyncArgs {
    /// Event files, or directories of `*.json` event files.
    #[arg(required = true)]
    pub events: Vec<PathBuf>,

    /// Print run reports as JSON.
    #[arg(long)]
    pub json: bool,
}

pub fn execute(args: &SyncArgs, ctx: &Context) -> anyhow::Result<()> {
    let mut files = Vec::new();
    for path in &args.events {
        collect_event_files(&ctx.resolve(path), &mut files)?;
    }
    if files.is_empty() {
        println!("No event files found.");
        return Ok(());
    }

    // Events for one identifier are handled in timestamp order so the newest
    // change receives the highest generation.
    let mut by_policy: BTreeMap<String, Vec<PolicyEvent>> = BTreeMap::new();
    for file in &files {
        let event = PolicyEvent::load(file)?;
        by_policy.entry(event.policy_id.clone()).or_default().push(event);
    }
    for events in by_policy.values_mut() {
        events.sort_by_key(|e| e.timestamp);
    }

    let orchestrator = Arc::new(ctx.orchestrator()?);
    tracing::info!(
        events = files.len(),
        policies = by_policy.len(),
        owner = %orchestrator.owner(),
        "processing events"
    );

    let runtime = tokio::runtime::Runtime::new()?;
    let reports = runtime.block_on(async {
        let mut handles = Vec::with_capacity(by_policy.len());
        for events in by_policy.into_values() {
            let orchestrator = Arc::clone(&orchestrator);
            handles.push(tokio::task::spawn_blocking(move || {
                events
                    .into_iter()
                    .map(|event| orchestrator.handle_event(event))
                    .collect::<Result<Vec<_>, _>>()
            }));
        }
        let mut reports = Vec::new();
        for handle in handles {
            reports.extend(handle.await??);
        }
        Ok::<_, anyhow::Error>(reports)
    })?;

    print_reports(&reports, args.json)?;

    let failed = reports.iter().filter(|r| r.outcome == RunOutcome::Failed).count();
    if failed > 0 {
        anyhow::bail!("{} run(s) failed", failed);
    }
    Ok(())
}

fn collect_event_files(path: &Path, files: &mut Vec<PathBuf>) -> anyhow::Result<()> {
    if !path.is_dir() {
        files.push(path.to_path_buf());
        return Ok(());
    }
    let mut found: Vec<PathBuf> = std::fs::read_dir(path)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    found.sort();
    files.extend(found);
    Ok(())
}

pub(crate) fn print_reports(reports: &[RunReport], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(reports)?);
        return Ok(());
    }
    if reports.is_empty() {
        println!("No runs.");
        return Ok(());
    }

    println!(
        "{:<10} {:<24} {:<10} {:>4} {:>5}  DETAIL",
        "RUN", "POLICY", "OUTCOME", "GEN", "T/V"
    );
    println!("{}", "-".repeat(80));
    for report in reports {
        let run = report
            .run_id
            .map(|id| id.to_string()[..8].to_string())
            .unwrap_or_else(|| "-".to_string());
        let generation = report
            .generation
            .map(|g| g.to_string())
            .unwrap_or_else(|| "-".to_string());
        let detail = report
            .last_error
            .as_ref()
            .map(|e| format!("{}: {}", e.kind, e.message))
            .unwrap_or_default();
        println!(
            "{:<10} {:<24} {:<10} {:>4} {:>5}  {}",
            run,
            truncate(&report.policy_id, 24),
            report.outcome.to_string(),
            generation,
            format!("{}/{}", report.translate_attempts, report.validate_attempts),
            truncate(&detail, 60),
        );
    }
    Ok(())
}
