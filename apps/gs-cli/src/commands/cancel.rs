// cancel.rs — Request cancellation of an in-flight run.

use crate::context::Context;

pub fn execute(ctx: &Context, policy_id: &str) -> anyhow::Result<()> {
    let store = ctx.store()?;
    let Some(lease) = store.lease(policy_id)? else {
        println!("No run in flight for {}.", policy_id);
        return Ok(());
    };
    store.request_cancel(policy_id)?;
    tracing::info!(policy_id = %policy_id, run_id = %lease.run_id, "cancellation requested");
    println!(
        "Cancellation requested for {} (run {}, held by {}).",
        policy_id, lease.run_id, lease.owner
    );
    println!("The run stops at its next checkpoint.");
    Ok(())
}
