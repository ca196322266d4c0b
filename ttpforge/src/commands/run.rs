use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::{info, warn};
use ttpforge_core::{Engine, Platform};

use crate::cli::RunArgs;
use crate::commands::{current_dir, load_reference, parse_bound_args};
use crate::config::Runtime;
use crate::output::CliProgress;

pub fn run(rt: Runtime, args: &RunArgs) -> Result<i32> {
    let repos = Arc::new(rt.repo_collection()?);
    let cwd = current_dir()?;
    let platform = Platform::current();
    let cli_args = parse_bound_args(&args.args)?;
    let (doc, bound) = load_reference(&repos, rt.fs.as_ref(), &args.reference, &cli_args, &cwd, &platform)?;

    let mut ctx = ttpforge_core::ExecutionContext::new(cwd, rt.fs.clone());
    ctx.args_bound = bound;
    ctx.repos = Some(repos);
    ctx.dry_run = args.dry_run;
    ctx.no_cleanup = args.no_cleanup;
    if let Some(seconds) = args.cleanup_delay_seconds {
        ctx.cleanup_delay = Duration::from_secs(seconds);
    }

    install_ctrlc_handler(ctx.cancel.clone());

    let report = Engine.run_with_progress(&doc, &mut ctx, &CliProgress)?;

    if report.skipped {
        info!(
            "skipped `{}`: {}",
            doc.preamble.name,
            report.skip_reason.unwrap_or_default()
        );
        return Ok(0);
    }

    for step in &report.steps {
        if let Some(output) = &step.output {
            if !output.stdout.is_empty() {
                print!("{}", output.stdout);
            }
        }
    }
    Ok(0)
}

/// Install a Ctrl-C handler that cancels `cancel` once. Idempotent: a
/// second Ctrl-C while cleanup is draining is a no-op, not a hard kill,
/// matching the cooperative cancellation the engine implements.
fn install_ctrlc_handler(cancel: ttpforge_core::CancellationToken) {
    let result = ctrlc::set_handler(move || {
        warn!("interrupt received, cancelling run...");
        cancel.cancel();
    });
    if let Err(e) = result {
        warn!("could not install Ctrl-C handler: {e}");
    }
}
