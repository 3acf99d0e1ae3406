// ledger.rs — Ledger subcommands: verify, tail.

use std::path::PathBuf;

use clap::Subcommand;
use gs_ledger::{Ledger, LedgerError};

use crate::context::Context;

#[derive(Subcommand)]
pub enum LedgerCommands {
    /// Verify the ledger hash chain integrity.
    Verify {
        /// Path to the ledger (defaults to .guardsync/ledger.jsonl).
        #[arg(long)]
        ledger: Option<PathBuf>,
    },
    /// Show recent ledger entries.
    Tail {
        /// Path to the ledger (defaults to .guardsync/ledger.jsonl).
        #[arg(long)]
        ledger: Option<PathBuf>,
        /// Number of entries to show.
        #[arg(short, default_value = "10")]
        n: usize,
        /// Only entries for this policy identifier.
        #[arg(long)]
        policy_id: Option<String>,
    },
}

pub fn execute(cmd: &LedgerCommands, ctx: &Context) -> anyhow::Result<()> {
    match cmd {
        LedgerCommands::Verify { ledger } => {
            let path = ledger
                .as_ref()
                .map(|p| ctx.resolve(p))
                .unwrap_or_else(|| ctx.paths.ledger.clone());

            if !path.exists() {
                println!("No ledger found at {}", path.display());
                return Ok(());
            }

            match Ledger::verify_chain(&path) {
                Ok(count) => {
                    println!("Ledger verified: {} entr(ies), hash chain intact.", count);
                }
                Err(LedgerError::IntegrityViolation {
                    line,
                    expected,
                    actual,
                }) => {
                    println!("INTEGRITY VIOLATION at line {}:", line);
                    println!("  Expected previous_hash: {}", expected);
                    println!("  Actual previous_hash:   {}", actual);
                    println!();
                    println!("The ledger may have been tampered with.");
                    anyhow::bail!("Ledger integrity check failed");
                }
                Err(e) => return Err(e.into()),
            }
        }

        LedgerCommands::Tail {
            ledger,
            n,
            policy_id,
        } => {
            let path = ledger
                .as_ref()
                .map(|p| ctx.resolve(p))
                .unwrap_or_else(|| ctx.paths.ledger.clone());

            if !path.exists() {
                println!("No ledger found at {}", path.display());
                return Ok(());
            }

            let entries: Vec<_> = Ledger::read_all(&path)?
                .into_iter()
                .filter(|e| policy_id.as_deref().map_or(true, |id| e.policy_id == id))
                .collect();
            let start = entries.len().saturating_sub(*n);
            let recent = &entries[start..];

            if recent.is_empty() {
                println!("No ledger entries.");
                return Ok(());
            }

            println!(
                "{:<20} {:<11} {:<24} {:>4}  RULE HASH",
                "TIMESTAMP", "ACTION", "POLICY", "GEN"
            );
            println!("{}", "-".repeat(80));

            for entry in recent {
                println!(
                    "{:<20} {:<11} {:<24} {:>4}  {}",
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    entry.action.to_string(),
                    truncate(&entry.policy_id, 24),
                    entry
                        .generation
                        .map(|g| g.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    entry.rule_hash.as_deref().map(short_hash).unwrap_or("-"),
                );
            }
        }
    }

    Ok(())
}

pub(crate) fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

pub(crate) fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        s.to_string()
    } else {
        let head: String = s.chars().take(width.saturating_sub(1)).collect();
        format!("{head}…")
    }
}
