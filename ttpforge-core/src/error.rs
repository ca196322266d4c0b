//! Error types and Result module.

use std::path::PathBuf;

use displaydoc::Display;
use thiserror::Error;

/// Result type that is returned from methods that can fail and thus have [`TtpForgeError`]s.
pub type TtpForgeResult<T> = Result<T, TtpForgeError>;

/// Errors that can result from running TTPForge.
///
/// Opaque and easy to keep compatible: the primary failure is an opaque
/// [`TtpForgeErrorKind`], plus any failures recorded while draining the
/// cleanup stack after it, per the propagation policy (the primary error is
/// what the run reports; cleanup errors are appended after it).
#[derive(Debug)]
pub struct TtpForgeError {
    kind: TtpForgeErrorKind,
    cleanup_failures: Vec<CleanupFailure>,
}

impl TtpForgeError {
    /// Expose the inner error kind.
    ///
    /// Useful for matching on the error kind without exposing the enum's
    /// constructors publicly.
    pub fn into_inner(self) -> TtpForgeErrorKind {
        self.kind
    }

    /// Failures recorded while draining the cleanup stack that followed
    /// this error, in the order they were drained. Empty for errors not
    /// produced by the engine (e.g. validation or loading failures).
    #[must_use]
    pub fn cleanup_failures(&self) -> &[CleanupFailure] {
        &self.cleanup_failures
    }

    /// Attach cleanup failures collected after this error was raised.
    #[must_use]
    pub(crate) fn with_cleanup_failures(mut self, failures: Vec<CleanupFailure>) -> Self {
        self.cleanup_failures = failures;
        self
    }
}

impl std::fmt::Display for TtpForgeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)?;
        if !self.cleanup_failures.is_empty() {
            write!(f, "\ncleanup errors:")?;
            for failure in &self.cleanup_failures {
                write!(f, "\n  - {}: {}", failure.step_name, failure.message)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for TtpForgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

impl From<TtpForgeErrorKind> for TtpForgeError {
    fn from(kind: TtpForgeErrorKind) -> Self {
        Self {
            kind,
            cleanup_failures: Vec::new(),
        }
    }
}

/// [`TtpForgeErrorKind`] describes the errors that can happen while resolving,
/// loading, validating, or running a TTP.
///
/// This is a non-exhaustive enum, so additional variants may be added in future.
/// It is recommended to match against the wildcard `_` instead of listing all
/// possible variants, to avoid problems when new variants are added.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum TtpForgeErrorKind {
    /// [`RepositoryErrorKind`] describes errors resolving repositories and TTP references
    #[error(transparent)]
    Repository(#[from] RepositoryErrorKind),

    /// [`PreprocessErrorKind`] describes errors splitting a TTP document into preamble/steps
    #[error(transparent)]
    Preprocess(#[from] PreprocessErrorKind),

    /// [`TemplateErrorKind`] describes errors rendering the document template
    #[error(transparent)]
    Template(#[from] TemplateErrorKind),

    /// [`ValidationErrorKind`] describes structural validation failures
    #[error(transparent)]
    Validation(#[from] ValidationErrorKind),

    /// [`ArgErrorKind`] describes errors binding CLI/default arguments
    #[error(transparent)]
    Arg(#[from] ArgErrorKind),

    /// [`RequirementErrorKind`] describes a TTP whose requirements are not met by the runtime
    #[error(transparent)]
    Requirement(#[from] RequirementErrorKind),

    /// [`ConditionErrorKind`] describes a failed check/condition evaluation
    #[error(transparent)]
    Condition(#[from] ConditionErrorKind),

    /// [`ActionErrorKind`] describes an action that failed during execution
    #[error(transparent)]
    Action(#[from] ActionErrorKind),

    /// run was cancelled
    #[error("run was cancelled")]
    Cancelled,

    /// [`std::io::Error`]
    #[error(transparent)]
    StdIo(#[from] std::io::Error),
}

/// Marker for the leaf `*ErrorKind` types that can be converted directly
/// into a [`TtpForgeError`] via `.into()`/`?`, without callers naming the
/// intermediate [`TtpForgeErrorKind`] variant.
trait TtpForgeErrorMarker {}

impl TtpForgeErrorMarker for RepositoryErrorKind {}
impl TtpForgeErrorMarker for PreprocessErrorKind {}
impl TtpForgeErrorMarker for TemplateErrorKind {}
impl TtpForgeErrorMarker for ValidationErrorKind {}
impl TtpForgeErrorMarker for ArgErrorKind {}
impl TtpForgeErrorMarker for RequirementErrorKind {}
impl TtpForgeErrorMarker for ConditionErrorKind {}
impl TtpForgeErrorMarker for ActionErrorKind {}
impl TtpForgeErrorMarker for std::io::Error {}

impl<E> From<E> for TtpForgeError
where
    E: TtpForgeErrorMarker,
    TtpForgeErrorKind: From<E>,
{
    fn from(value: E) -> Self {
        TtpForgeErrorKind::from(value).into()
    }
}

/// A single cleanup failure recorded while draining the cleanup stack.
#[derive(Debug, Clone)]
pub struct CleanupFailure {
    /// Name of the step whose cleanup failed.
    pub step_name: String,
    /// Human-readable error message.
    pub message: String,
}

/// [`RepositoryErrorKind`] describes the errors that can be returned while resolving
/// repositories and TTP references.
#[derive(Error, Debug, Display)]
pub enum RepositoryErrorKind {
    /// repository name `{0}` is already registered
    DuplicateName(String),
    /// no repository named `{0}` is configured
    NotFound(String),
    /// reference `{0}` has too many `//` occurrences
    TooManySeparators(String),
    /// TTP `{0}` not found in repository `{1}`
    TtpNotFound(String, String),
    /// template `{0}` not found in repository `{1}`
    TemplateNotFound(String, String),
    /// path `{0:?}` does not exist
    PathDoesNotExist(PathBuf),
    /// must create a repo config in the repo root: `{0:?}`
    NoRepoConfigFound(PathBuf),
    /// `{0:?}` is not under any of repository `{1}`'s search paths
    NotUnderSearchPath(PathBuf, String),
    /// repo config at `{0:?}` is malformed: {1}
    MalformedRepoConfig(PathBuf, String),
    /// git clone of `{0}` into `{1:?}` failed: {2}
    GitCloneFailed(String, PathBuf, String),
    /// repository `{0}` has no path and no git source configured
    NoSourceConfigured(String),
    /// program config at `{0:?}` is malformed: {1}
    MalformedProgramConfig(PathBuf, String),
}

/// [`PreprocessErrorKind`] describes the errors that can happen while splitting a
/// raw TTP document into its preamble and steps portions.
#[derive(Error, Debug, Display, Clone, Copy)]
pub enum PreprocessErrorKind {
    /// no top-level `steps:` key found
    MissingSteps,
    /// top-level `steps:` key appears more than once
    DuplicateSteps,
    /// a top-level key appears after `steps:`
    KeyAfterSteps,
}

/// [`TemplateErrorKind`] describes the errors that can happen while rendering the
/// document template.
#[derive(Error, Debug, Display)]
pub enum TemplateErrorKind {
    /// template syntax error: {0}
    Syntax(String),
    /// undefined template variable: `{0}`
    UndefinedVariable(String),
    /// rendered document is not valid YAML: {0}
    InvalidYaml(String),
}

/// [`ValidationErrorKind`] describes structural validation failures.
#[derive(Error, Debug, Display)]
pub enum ValidationErrorKind {
    /// required top-level key `{0}` is missing
    MissingKey(&'static str),
    /// top-level key `{0}` appears more than once
    DuplicateKey(&'static str),
    /// `uuid` field `{0}` is not a valid RFC-4122 v4 UUID
    InvalidUuid(String),
    /// unknown platform os `{0}`
    UnknownOs(String),
    /// unknown platform arch `{0}`
    UnknownArch(String),
    /// platform spec has neither `os` nor `arch` set
    EmptyPlatformSpec,
    /// step at index {0} has no name
    StepMissingName(usize),
    /// step name `{0}` is used more than once
    DuplicateStepName(String),
    /// step `{0}` declares no action
    NoAction(String),
    /// step `{0}` declares more than one action: {1:?}
    AmbiguousAction(String, Vec<&'static str>),
    /// condition on step `{0}` declares more than one variant
    AmbiguousConditionType(String),
    /// condition on step `{0}` declares no variant
    EmptyConditionType(String),
    /// argument name `{0}` is not a valid identifier
    InvalidArgName(String),
    /// argument `{0}`'s default value is not among its declared choices
    DefaultNotInChoices(String),
    /// step `{0}` references undeclared arg `{1}`
    UndeclaredArgReference(String, String),
    /// step `{0}` references outputvar `{1}` before it is declared
    UndeclaredOutputVarReference(String, String),
    /// outputvar name `{0}` is used by more than one step
    DuplicateOutputVar(String),
}

/// [`ArgErrorKind`] describes the errors that can happen while binding arguments.
#[derive(Error, Debug, Display)]
pub enum ArgErrorKind {
    /// `--arg` given for undeclared argument `{0}`
    UndeclaredArg(String),
    /// failed to parse `{0}` as an int: {1}
    InvalidInt(String, String),
    /// failed to parse `{0}` as a bool: {1}
    InvalidBool(String, String),
    /// value `{0}` for argument `{1}` is not one of the declared choices: {2:?}
    NotInChoices(String, String, Vec<String>),
    /// required argument `{0}` has no value and no default
    MissingRequired(String),
}

/// [`RequirementErrorKind`] describes a TTP whose requirements are not met by the
/// runtime. This causes a **skip**, not a failure.
#[derive(Error, Debug, Display, Clone)]
pub enum RequirementErrorKind {
    /// none of the declared platforms match this runtime ({0})
    PlatformMismatch(String),
    /// this TTP requires superuser privileges
    SuperuserRequired,
}

/// [`ConditionErrorKind`] describes a failed check/condition evaluation.
#[derive(Error, Debug, Display)]
pub enum ConditionErrorKind {
    /// condition failed: {0}
    Failed(String),
    /// error evaluating condition: {0}
    EvaluationFailed(String),
}

/// [`ActionErrorKind`] describes an action that failed during `execute()`.
#[derive(Error, Debug, Display)]
pub enum ActionErrorKind {
    /// step `{0}` failed (exit code {1}): {2}
    NonZeroExit(String, i32, String),
    /// step `{0}` failed: {1}
    Failed(String, String),
    /// io error while running step `{0}`: {1}
    Io(String, String),
    /// checksum mismatch for `{0:?}`: expected {1}, got {2}
    ChecksumMismatch(PathBuf, String, String),
    /// timed out after {1:?} waiting for pattern in step `{0}`
    ExpectTimeout(String, std::time::Duration),
    /// no process matching `{0}` found
    NoSuchProcess(String),
}
