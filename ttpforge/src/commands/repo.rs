use anyhow::{anyhow, Result};
use log::info;
use ttpforge_core::{GitSpec, Repo, RepoSpec};

use crate::cli::{InstallTarget, RemoveTarget};
use crate::config::Runtime;

pub fn install(mut rt: Runtime, what: &InstallTarget) -> Result<i32> {
    let InstallTarget::Repo { url, name, branch } = what;

    if rt.config.repos.iter().any(|r| &r.name == name) {
        return Err(anyhow!("repository `{name}` is already registered"));
    }

    let is_local_path = std::path::Path::new(url).is_absolute() || url.starts_with("./") || url.starts_with("../");
    let spec = if is_local_path {
        RepoSpec {
            name: name.clone(),
            path: Some(url.clone()),
            git: None,
        }
    } else {
        RepoSpec {
            name: name.clone(),
            path: Some(name.clone()),
            git: Some(GitSpec {
                url: url.clone(),
                branch: branch.clone(),
            }),
        }
    };

    // Ensure it actually resolves (and, for a git source, clones) before
    // persisting the config entry.
    let config_dir = rt.config_dir();
    Repo::load(&spec, &config_dir, rt.fs.clone())?;

    rt.config.repos.push(spec);
    rt.save()?;
    info!("installed repository `{name}`");
    Ok(0)
}

pub fn remove(mut rt: Runtime, what: &RemoveTarget) -> Result<i32> {
    let RemoveTarget::Repo { name } = what;
    let before = rt.config.repos.len();
    rt.config.repos.retain(|r| &r.name != name);
    if rt.config.repos.len() == before {
        return Err(anyhow!("no repository named `{name}` is configured"));
    }
    rt.save()?;
    info!("removed repository `{name}` from the config (files left on disk)");
    Ok(0)
}
