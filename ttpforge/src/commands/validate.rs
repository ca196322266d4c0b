use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};
use log::{error, info, warn};
use ttpforge_core::{Platform, Severity, Validator};

use crate::cli::ValidateArgs;
use crate::commands::current_dir;
use crate::config::Runtime;

pub fn run(rt: Runtime, args: &ValidateArgs) -> Result<i32> {
    let repos = rt.repo_collection()?;
    let cwd = current_dir()?;
    let platform = Platform::current();

    let (_repo, path) = repos
        .resolve_ref(&args.reference)
        .with_context(|| format!("resolving `{}`", args.reference))?;
    let (doc, _bound, source) =
        ttpforge_core::render_ttp_file(rt.fs.as_ref(), &path, &BTreeMap::new(), &cwd, &platform)
            .with_context(|| format!("rendering `{}`", args.reference))?;

    let report = Validator.check(&doc, &source);
    for message in &report.messages {
        match message.severity {
            Severity::Error => error!("{}", message.message),
            Severity::Warning => warn!("{}", message.message),
            Severity::Info => info!("{}", message.message),
        }
    }

    if report.has_errors() {
        return Err(anyhow!("validation failed for `{}`", args.reference));
    }
    info!("`{}` is valid", args.reference);

    if args.run_tests {
        let test_args = crate::cli::TestArgs {
            reference: args.reference.clone(),
            time_out_seconds: None,
        };
        return super::test::run(rt, &test_args);
    }
    Ok(0)
}
