/*!
Core engine for TTPForge, an offensive-security simulation runner.

# Overview

This crate implements the hard-engineering core of TTPForge: resolving TTP
references across named repositories, loading TTP documents through a
two-phase preprocess/template pipeline, and running the resulting step
graph with LIFO cleanup, dry-run, and cancellation support. The CLI crate
(`ttpforge`) is a thin shell over this library; nothing in here reaches for
process-global state or does its own argument parsing.

# Crate features

*   **cli** -
    Enables `clap` derives on option structs shared with the CLI crate.
*/

#![forbid(unsafe_code)]
#![warn(
    rust_2018_idioms,
    trivial_casts,
    unused_lifetimes,
    unused_qualifications,
    clippy::nursery,
    bad_style,
    dead_code,
    improper_ctypes,
    missing_copy_implementations,
    missing_debug_implementations,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    overflowing_literals,
    path_statements,
    patterns_in_fns_without_body,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unconditional_recursion,
    unused_allocation,
    unused_comparisons,
    unused_parens,
    while_true,
    clippy::cast_lossless,
    clippy::default_trait_access,
    clippy::doc_markdown,
    clippy::manual_string_new,
    clippy::match_same_arms,
    clippy::semicolon_if_nothing_returned,
    clippy::trivially_copy_pass_by_ref
)]
#![allow(clippy::module_name_repetitions, clippy::redundant_pub_crate)]

pub(crate) mod action;
pub(crate) mod args;
pub(crate) mod checks;
pub(crate) mod context;
pub(crate) mod engine;
pub(crate) mod error;
pub(crate) mod filesystem;
pub(crate) mod loader;
pub(crate) mod platform;
pub(crate) mod preprocess;
pub(crate) mod process;
pub(crate) mod progress;
pub(crate) mod repo_config;
pub(crate) mod repository;
pub(crate) mod template;
pub(crate) mod ttp;
pub(crate) mod validator;

// TTPForge Core Public API
pub use crate::{
    action::{Action, ActionBehavior, ActionOutcome},
    args::{ArgBinder, ArgValue},
    checks::{CommandCheck, Condition, ConditionKind, PathExistsCheck},
    context::{CancellationToken, ExecutionContext},
    engine::{CleanupFrame, CleanupUnit, Engine, RunReport, StepRecord, StepState},
    error::{
        ActionErrorKind, ArgErrorKind, CleanupFailure, ConditionErrorKind, PreprocessErrorKind,
        RepositoryErrorKind, RequirementErrorKind, TemplateErrorKind, TtpForgeError,
        TtpForgeErrorKind, TtpForgeResult, ValidationErrorKind,
    },
    filesystem::{Filesystem, Metadata, OsFilesystem},
    loader::{load_ttp_bytes, load_ttp_file, render_ttp_bytes, render_ttp_file},
    platform::{Arch, Os, Platform},
    preprocess::{preprocess, PreprocessedTtp},
    progress::{NoProgress, Progress},
    repo_config::{GitSpec, ProgramConfig, RepoConfigFile, RepoSpec},
    repository::{Repo, RepoCollection},
    template::render_document,
    ttp::{
        ArgKind, ArgSpec, Mitre, Preamble, Requirements, Step, StepOutput, TestCase, TtpDocument,
    },
    validator::{Severity, ValidationMessage, ValidationReport, Validator},
};
