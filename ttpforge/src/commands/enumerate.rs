use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use log::warn;
use ttpforge_core::{Action, Platform};

use crate::cli::EnumTarget;
use crate::commands::{current_dir, load_reference};
use crate::config::Runtime;

pub fn run(rt: Runtime, what: &EnumTarget) -> Result<i32> {
    match what {
        EnumTarget::Ttps => enum_ttps(&rt),
        EnumTarget::Authors => enum_authors(&rt),
        EnumTarget::Dependencies => enum_dependencies(&rt),
    }
}

fn enum_ttps(rt: &Runtime) -> Result<i32> {
    let repos = rt.repo_collection()?;
    for reference in repos.list_ttps()? {
        println!("{reference}");
    }
    Ok(0)
}

fn enum_authors(rt: &Runtime) -> Result<i32> {
    let repos = rt.repo_collection()?;
    let cwd = current_dir()?;
    let platform = Platform::current();
    let mut authors: BTreeSet<String> = BTreeSet::new();

    for reference in repos.list_ttps()? {
        match load_reference(&repos, rt.fs.as_ref(), &reference, &BTreeMap::new(), &cwd, &platform) {
            Ok((doc, _)) => authors.extend(doc.preamble.authors),
            Err(e) => warn!("skipping `{reference}`: {e}"),
        }
    }
    for author in authors {
        println!("{author}");
    }
    Ok(0)
}

fn enum_dependencies(rt: &Runtime) -> Result<i32> {
    let repos = rt.repo_collection()?;
    let cwd = current_dir()?;
    let platform = Platform::current();
    let mut targets: BTreeSet<String> = BTreeSet::new();

    for reference in repos.list_ttps()? {
        match load_reference(&repos, rt.fs.as_ref(), &reference, &BTreeMap::new(), &cwd, &platform) {
            Ok((doc, _)) => {
                for step in &doc.steps {
                    if let Action::SubTtp(sub) = &step.action {
                        targets.insert(sub.target.clone());
                    }
                }
            }
            Err(e) => warn!("skipping `{reference}`: {e}"),
        }
    }
    for target in targets {
        println!("{target}");
    }
    Ok(0)
}
