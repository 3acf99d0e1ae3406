// status.rs — Runs, leases and active rule sets at a glance.

use std::collections::BTreeSet;

use chrono::Utc;
use gs_sync::RuleSink;

use super::ledger::{short_hash, truncate};
use crate::context::Context;

pub fn execute(ctx: &Context, policy_id: Option<&str>) -> anyhow::Result<()> {
    let store = ctx.store()?;
    let sink = ctx.rule_store()?;

    let runs = match policy_id {
        Some(id) => store.runs_for(id)?,
        None => store.list_runs()?,
    };

    if runs.is_empty() {
        println!("No runs.");
    } else {
        println!(
            "{:<10} {:<24} {:<12} {:>4} {:>5} {:<10} LAST ERROR",
            "RUN", "POLICY", "STATE", "GEN", "T/V", "OUTCOME"
        );
        println!("{}", "-".repeat(90));
        for run in &runs {
            let run_id = run.run_id.to_string();
            let outcome = run
                .outcome
                .map(|o| o.to_string())
                .unwrap_or_else(|| "running".to_string());
            let error = run
                .last_error
                .as_ref()
                .map(|e| format!("{} (attempt {}): {}", e.kind, e.attempt, e.message))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "{:<10} {:<24} {:<12} {:>4} {:>5} {:<10} {}",
                &run_id[..8],
                truncate(&run.policy_id, 24),
                run.state.to_string(),
                run.generation,
                format!("{}/{}", run.translate_attempts, run.validate_attempts),
                outcome,
                truncate(&error, 60),
            );
        }
    }

    let now = Utc::now();
    let mut policies: BTreeSet<String> = runs.iter().map(|r| r.policy_id.clone()).collect();
    if let Some(id) = policy_id {
        policies.insert(id.to_string());
    }
    let mut flight = Vec::new();
    for id in &policies {
        let lease = store.lease(id)?;
        let pending = store.peek_pending(id)?;
        if lease.is_some() || pending.is_some() {
            flight.push((id, lease, pending));
        }
    }
    if !flight.is_empty() {
        println!();
        println!("{:<24} {:<28} {:<10} QUEUED", "POLICY", "LEASE HOLDER", "EXPIRES");
        println!("{}", "-".repeat(80));
        for (id, lease, pending) in flight {
            let (holder, expires) = match &lease {
                Some(l) if l.is_expired(now) => (l.owner.clone(), "expired".to_string()),
                Some(l) => (
                    l.owner.clone(),
                    format!("{}s", (l.expires_at - now).num_seconds()),
                ),
                None => ("-".to_string(), "-".to_string()),
            };
            let queued = pending
                .map(|e| format!("{} @ {}", e.event_name, e.timestamp.format("%H:%M:%S")))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "{:<24} {:<28} {:<10} {}",
                truncate(id, 24),
                truncate(&holder, 28),
                expires,
                queued
            );
        }
    }

    let active: Vec<_> = sink
        .list_active()?
        .into_iter()
        .filter(|r| policy_id.map_or(true, |id| r.policy_id() == id))
        .collect();
    println!();
    if active.is_empty() {
        println!("No active rule sets.");
        return Ok(());
    }
    println!(
        "{:<24} {:>4} {:<20} {:<13} RULE HASH",
        "ACTIVE POLICY", "GEN", "COMMITTED", "SOURCE HASH"
    );
    println!("{}", "-".repeat(80));
    for record in &active {
        println!(
            "{:<24} {:>4} {:<20} {:<13} {}",
            truncate(record.policy_id(), 24),
            record.generation(),
            record.committed_at.format("%Y-%m-%d %H:%M:%S"),
            short_hash(record.source_hash()),
            short_hash(&record.rule_set.rule_hash),
        );
    }
    Ok(())
}
