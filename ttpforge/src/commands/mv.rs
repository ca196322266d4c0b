use anyhow::{Context, Result};
use log::{info, warn};

use crate::cli::MoveArgs;
use crate::commands::current_dir;
use crate::config::Runtime;

/// Move a TTP file and rewrite `target:` references to its old location in
/// every other discoverable TTP.
pub fn run(rt: Runtime, args: &MoveArgs) -> Result<i32> {
    let repos = rt.repo_collection()?;
    let cwd = current_dir()?;

    let (repo, old_abs) = repos
        .resolve_ref(&args.src)
        .with_context(|| format!("resolving `{}`", args.src))?;
    let old_ref = repo
        .convert_abs_path_to_abs_ref(&old_abs)
        .unwrap_or_else(|_| args.src.clone());

    let new_abs = if args.dst.is_absolute() {
        args.dst.clone()
    } else {
        cwd.join(&args.dst)
    };
    let new_ref = repo
        .convert_abs_path_to_abs_ref(&new_abs)
        .unwrap_or_else(|_| new_abs.display().to_string());

    rt.fs
        .rename(&old_abs, &new_abs)
        .with_context(|| format!("moving {} to {}", old_abs.display(), new_abs.display()))?;
    info!("moved `{old_ref}` to `{new_ref}`");

    let mut rewritten = 0usize;
    for reference in repos.list_ttps().unwrap_or_default() {
        if reference == new_ref {
            continue;
        }
        let Ok((_, path)) = repos.resolve_ref(&reference) else {
            continue;
        };
        let Ok(bytes) = rt.fs.read_file(&path) else {
            continue;
        };
        let Ok(text) = String::from_utf8(bytes) else {
            continue;
        };
        if !text.contains(&old_ref) {
            continue;
        }
        let updated = text.replace(&old_ref, &new_ref);
        if let Err(e) = rt.fs.write_file(&path, updated.as_bytes(), 0o644) {
            warn!("could not rewrite reference in {}: {e}", path.display());
            continue;
        }
        rewritten += 1;
    }
    if rewritten > 0 {
        info!("rewrote {rewritten} reference(s) to `{old_ref}`");
    }
    Ok(0)
}
