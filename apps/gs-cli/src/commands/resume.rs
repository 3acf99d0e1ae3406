// resume.rs — Re-enter runs interrupted mid-flight.

use crate::context::Context;

pub fn execute(ctx: &Context, json: bool) -> anyhow::Result<()> {
    let orchestrator = ctx.orchestrator()?;
    let reports = orchestrator.resume_incomplete()?;
    tracing::info!(resumed = reports.len(), owner = %orchestrator.owner(), "resume pass complete");
    if reports.is_empty() && !json {
        println!("No interrupted runs to resume.");
        return Ok(());
    }
    super::sync::print_reports(&reports, json)
}
