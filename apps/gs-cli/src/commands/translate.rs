// translate.rs — Render one governance document into rule text.

use std::path::PathBuf;

use clap::Args;
use gs_policy::GovernancePolicy;

use crate::context::Context;

#[derive(Args)]
pub struct TranslateArgs {
    /// Governance document (JSON).
    pub policy: PathBuf,

    /// Write the rule text here instead of stdout.
    #[arg(long)]
    pub out: Option<PathBuf>,
}

pub fn execute(args: &TranslateArgs, ctx: &Context) -> anyhow::Result<()> {
    let policy = GovernancePolicy::load(&ctx.resolve(&args.policy))?;
    let gateway = ctx.translation()?;
    let rule_text = gateway.translate(&policy)?;
    tracing::info!(
        policy_id = %policy.policy_id,
        translator = gateway.translator_name(),
        content_hash = %policy.content_hash,
        "policy translated"
    );

    match &args.out {
        Some(out) => {
            let out = ctx.resolve(out);
            if let Some(parent) = out.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&out, &rule_text)?;
            println!("Wrote {} ({} bytes)", out.display(), rule_text.len());
        }
        None => print!("{}", rule_text),
    }
    Ok(())
}
