//! Command-line surface: argument parsing only, no behaviour.

use std::path::PathBuf;

use clap::builder::styling::{AnsiColor, Effects};
use clap::builder::Styles;
use clap::{Args, Parser, Subcommand, ValueEnum};

fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Red.on_default() | Effects::BOLD)
        .usage(AnsiColor::Red.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default())
}

/// Run declarative YAML adversary-emulation playbooks (TTPs).
#[derive(Parser, Debug)]
#[command(author, about, name = "ttpforge", styles = styles(), version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug)]
pub struct GlobalOpts {
    /// Increase log verbosity; repeat for more (-v, -vv, -vvv).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Append logs to this file in addition to stderr.
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Program config file; defaults to `$TTPFORGE_CONFIG` or the OS config dir.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a fresh program config if one doesn't already exist.
    Init,

    /// List configured repositories or discoverable TTPs.
    List {
        #[command(subcommand)]
        what: ListTarget,
    },

    /// Show a loaded TTP's rendered metadata and steps.
    Show {
        #[command(subcommand)]
        what: ShowTarget,
    },

    /// Run a TTP.
    Run(RunArgs),

    /// Run every `tests:` case declared in a TTP's preamble.
    Test(TestArgs),

    /// Statically validate a TTP without running it.
    Validate(ValidateArgs),

    /// Register a repository.
    Install {
        #[command(subcommand)]
        what: InstallTarget,
    },

    /// Unregister a repository.
    Remove {
        #[command(subcommand)]
        what: RemoveTarget,
    },

    /// Scaffold a new TTP document.
    Create {
        #[command(subcommand)]
        what: CreateTarget,
    },

    /// Move a TTP file, rewriting `ttp:` references that target it.
    Move(MoveArgs),

    /// Enumerate cross-cutting TTP metadata.
    Enum {
        #[command(subcommand)]
        what: EnumTarget,
    },

    /// Generate shell completions.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand, Debug)]
pub enum ListTarget {
    /// Configured repositories.
    Repos,
    /// TTPs discoverable across every configured repository.
    Ttps,
}

#[derive(Subcommand, Debug)]
pub enum ShowTarget {
    /// Show a single TTP.
    Ttp {
        /// `repo//relpath`, a plain filesystem path, or an ad-hoc-repo-relative path.
        reference: String,
    },
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// `repo//relpath`, a plain filesystem path, or an ad-hoc-repo-relative path.
    pub reference: String,

    /// Bind a declared argument, e.g. `--arg target=example.com`.
    #[arg(long = "arg", value_name = "KEY=VALUE")]
    pub args: Vec<String>,

    /// Evaluate the TTP without running any action or draining cleanup.
    #[arg(long)]
    pub dry_run: bool,

    /// Skip draining the cleanup stack after a successful run.
    #[arg(long)]
    pub no_cleanup: bool,

    /// Delay between each cleanup frame as it drains.
    #[arg(long, value_name = "SECONDS")]
    pub cleanup_delay_seconds: Option<u64>,
}

#[derive(Args, Debug)]
pub struct TestArgs {
    /// `repo//relpath`, a plain filesystem path, or an ad-hoc-repo-relative path.
    pub reference: String,

    /// Per-case wall-clock timeout, overriding each case's own and the 10s default.
    #[arg(long, value_name = "SECONDS")]
    pub time_out_seconds: Option<u64>,
}

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// `repo//relpath`, a plain filesystem path, or an ad-hoc-repo-relative path.
    pub reference: String,

    /// Also run the TTP's declared test cases after static validation passes.
    #[arg(long)]
    pub run_tests: bool,
}

#[derive(Subcommand, Debug)]
pub enum InstallTarget {
    /// Register a repository, cloning it with git if it doesn't exist locally.
    Repo {
        /// Git clone URL, or a local path when `--name` already has a `path:` entry.
        url: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        branch: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum RemoveTarget {
    /// Unregister a repository by name. Leaves its files on disk.
    Repo { name: String },
}

#[derive(Subcommand, Debug)]
pub enum CreateTarget {
    /// Write a minimal valid TTP skeleton at the given path.
    Ttp { path: PathBuf },
}

#[derive(Args, Debug)]
pub struct MoveArgs {
    pub src: String,
    pub dst: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum EnumTarget {
    /// Every discoverable TTP reference.
    Ttps,
    /// Every distinct author name across discoverable TTPs.
    Authors,
    /// Every distinct sub-TTP reference used by `ttp:` steps.
    Dependencies,
}

#[derive(Clone, Debug, ValueEnum)]
pub enum Shell {
    Bash,
    Fish,
    Zsh,
    Powershell,
}
