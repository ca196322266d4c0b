//! Subcommand dispatch. Each module owns one subcommand's behaviour; this
//! file only routes and holds helpers shared across more than one of them.

mod completions;
mod create;
mod enumerate;
mod init;
mod list;
mod mv;
mod repo;
mod run;
mod show;
mod test;
mod validate;

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use ttpforge_core::{ArgValue, Filesystem, Platform, RepoCollection, TtpDocument};

use crate::cli::Command;
use crate::config::Runtime;

pub fn dispatch(command: &Command, rt: Runtime) -> Result<i32> {
    match command {
        Command::Init => init::run(rt),
        Command::List { what } => list::run(rt, what),
        Command::Show { what } => show::run(rt, what),
        Command::Run(args) => run::run(rt, args),
        Command::Test(args) => test::run(rt, args),
        Command::Validate(args) => validate::run(rt, args),
        Command::Install { what } => repo::install(rt, what),
        Command::Remove { what } => repo::remove(rt, what),
        Command::Create { what } => create::run(rt, what),
        Command::Move(args) => mv::run(rt, args),
        Command::Enum { what } => enumerate::run(rt, what),
        Command::Completions { shell } => completions::run(shell),
    }
}

/// Parse `--arg key=value` flags into the `BTreeMap` the loader expects.
pub fn parse_bound_args(raw: &[String]) -> Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    for entry in raw {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| anyhow!("invalid --arg `{entry}`: expected KEY=VALUE"))?;
        out.insert(key.to_string(), value.to_string());
    }
    Ok(out)
}

/// Resolve `reference` against `repos`, read it, and fully load/bind it.
pub fn load_reference(
    repos: &RepoCollection,
    fs: &dyn Filesystem,
    reference: &str,
    cli_args: &BTreeMap<String, String>,
    invocation_cwd: &Path,
    platform: &Platform,
) -> Result<(TtpDocument, BTreeMap<String, ArgValue>)> {
    let (_repo, path) = repos
        .resolve_ref(reference)
        .with_context(|| format!("resolving `{reference}`"))?;
    ttpforge_core::load_ttp_file(fs, &path, cli_args, invocation_cwd, platform)
        .map_err(anyhow::Error::from)
        .with_context(|| format!("loading `{reference}`"))
}

pub fn current_dir() -> Result<std::path::PathBuf> {
    std::env::current_dir().context("determining the current working directory")
}
