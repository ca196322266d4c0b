//! The action set: one enum variant per step action kind, dispatched
//! through a uniform [`ActionBehavior`] contract.

use std::{
    collections::BTreeMap,
    io::Write as _,
    path::{Path, PathBuf},
    time::Duration,
};

use log::{debug, info};
use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::Value as YamlValue;
use sha2::{Digest, Sha256};

use crate::{
    checks::ChecksumSpec,
    context::ExecutionContext,
    error::{ActionErrorKind, TemplateErrorKind, TtpForgeError, TtpForgeResult, ValidationErrorKind},
    process::{self, Signal},
    template::runtime_context,
    ttp::StepOutput,
};

/// What a completed [`ActionBehavior::execute`] observed: the step's output
/// and whether running the action produced any real side effect.
///
/// `side_effect` gates synthesised cleanup: per the pinned design decision,
/// a synthesised cleanup is pushed whenever the action reports any side
/// effect at all, even if the action itself then failed (e.g. `create_file`
/// that wrote the file but then failed to `chmod` it).
pub struct ActionOutcome {
    /// The step output (stdout/stderr/exit code/parsed JSON).
    pub output: StepOutput,
    /// Whether this action caused a real, rollback-worthy side effect.
    pub side_effect: bool,
    /// `Ok(())` if the action succeeded, otherwise the typed failure.
    pub result: Result<(), TtpForgeError>,
}

impl ActionOutcome {
    fn ok(output: StepOutput, side_effect: bool) -> Self {
        Self {
            output,
            side_effect,
            result: Ok(()),
        }
    }

    fn failed(output: StepOutput, side_effect: bool, err: TtpForgeError) -> Self {
        Self {
            output,
            side_effect,
            result: Err(err),
        }
    }
}

/// Validation-time context: what's known about declared args/earlier steps,
/// used by actions whose `validate()` checks cross-references.
#[derive(Debug, Default)]
pub struct ValidationContext {
    /// Names of declared arguments.
    pub declared_args: Vec<String>,
}

/// Shared contract every action variant implements.
pub trait ActionBehavior {
    /// Structural / reference validation independent of running the action.
    fn validate(&self, vctx: &ValidationContext) -> Result<(), ValidationErrorKind>;

    /// Run the action for real. Must honour `ctx.dry_run` by short-circuiting
    /// to [`StepOutput::empty`] with no side effect when set — callers that
    /// route through [`Action::execute`] get this for free.
    fn execute(&self, ctx: &mut ExecutionContext) -> ActionOutcome;

    /// Build the cleanup action this action synthesises for itself, if any,
    /// given whether it actually produced a side effect.
    fn synthesize_cleanup(&self, side_effect: bool) -> Option<Action> {
        let _ = side_effect;
        None
    }
}

/// One step's action. Exactly one field is ever populated at the YAML
/// level; see the custom [`Deserialize`] impl below.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Action {
    /// Run a one-liner through the platform shell.
    Inline(InlineSpec),
    /// Run a file on disk.
    File(FileSpec),
    /// Resolve and run another TTP as a child run.
    SubTtp(SubTtpSpec),
    /// Write a new file, with a synthesised `remove_path` cleanup.
    CreateFile(CreateFileSpec),
    /// Copy a file or directory tree.
    CopyPath(CopyPathSpec),
    /// Delete a file or directory tree.
    RemovePath(RemovePathSpec),
    /// Apply ordered text edits to a file.
    EditFile(EditFileSpec),
    /// HTTP GET a URI to a local file.
    FetchUri(FetchUriSpec),
    /// Print a literal string to stdout.
    PrintStr(PrintStrSpec),
    /// Push the cwd stack and change directory.
    Cd(CdSpec),
    /// Terminate a process by name or pid.
    KillProcess(KillProcessSpec),
    /// Drive an interactive shell through send/expect pairs.
    Expect(ExpectSpec),
}

const ACTION_KEYS: [&str; 12] = [
    "inline",
    "file",
    "ttp",
    "create_file",
    "copy_path",
    "remove_path",
    "edit_file",
    "fetch_uri",
    "print_str",
    "cd",
    "kill_process",
    "expect",
];

impl<'de> Deserialize<'de> for Action {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let map = YamlValue::deserialize(deserializer)?;
        let YamlValue::Mapping(map) = map else {
            return Err(serde::de::Error::custom("step is not a mapping"));
        };
        let present: Vec<&str> = ACTION_KEYS
            .iter()
            .copied()
            .filter(|k| map.contains_key(&YamlValue::String((*k).to_string())))
            .collect();
        match present.as_slice() {
            [] => Err(serde::de::Error::custom(
                "step declares no action (expected exactly one of: inline, file, ttp, \
                 create_file, copy_path, remove_path, edit_file, fetch_uri, print_str, cd, \
                 kill_process, expect)",
            )),
            [one] => {
                let value = map
                    .get(&YamlValue::String((*one).to_string()))
                    .cloned()
                    .unwrap_or(YamlValue::Null);
                decode_one(one, value).map_err(serde::de::Error::custom)
            }
            many => Err(serde::de::Error::custom(format!(
                "step declares more than one action: {many:?}"
            ))),
        }
    }
}

fn decode_one(key: &str, value: YamlValue) -> Result<Action, String> {
    macro_rules! str_or_struct {
        ($variant:ident, $spec:ty, $field:ident) => {{
            if let YamlValue::String(s) = &value {
                Ok(Action::$variant(<$spec>::from_scalar(s.clone())))
            } else {
                serde_yaml::from_value::<$spec>(value)
                    .map(Action::$variant)
                    .map_err(|e| e.to_string())
            }
        }};
    }
    match key {
        "inline" => str_or_struct!(Inline, InlineSpec, command),
        "file" => serde_yaml::from_value(value)
            .map(Action::File)
            .map_err(|e| e.to_string()),
        "ttp" => serde_yaml::from_value(value)
            .map(Action::SubTtp)
            .map_err(|e| e.to_string()),
        "create_file" => serde_yaml::from_value(value)
            .map(Action::CreateFile)
            .map_err(|e| e.to_string()),
        "copy_path" => serde_yaml::from_value(value)
            .map(Action::CopyPath)
            .map_err(|e| e.to_string()),
        "remove_path" => str_or_struct!(RemovePath, RemovePathSpec, path),
        "edit_file" => serde_yaml::from_value(value)
            .map(Action::EditFile)
            .map_err(|e| e.to_string()),
        "fetch_uri" => serde_yaml::from_value(value)
            .map(Action::FetchUri)
            .map_err(|e| e.to_string()),
        "print_str" => str_or_struct!(PrintStr, PrintStrSpec, value),
        "cd" => str_or_struct!(Cd, CdSpec, path),
        "kill_process" => serde_yaml::from_value(value)
            .map(Action::KillProcess)
            .map_err(|e| e.to_string()),
        "expect" => serde_yaml::from_value(value)
            .map(Action::Expect)
            .map_err(|e| e.to_string()),
        other => Err(format!("unknown action key `{other}`")),
    }
}

impl Action {
    /// Dispatch to the underlying variant's [`ActionBehavior`].
    pub fn validate(&self, vctx: &ValidationContext) -> Result<(), ValidationErrorKind> {
        self.as_behavior().validate(vctx)
    }

    /// Dispatch to the underlying variant's `execute`, honouring dry-run.
    pub fn execute(&self, ctx: &mut ExecutionContext) -> ActionOutcome {
        if ctx.dry_run {
            return ActionOutcome::ok(StepOutput::empty(), false);
        }
        self.as_behavior().execute(ctx)
    }

    /// Dispatch to the underlying variant's cleanup synthesis.
    pub fn synthesize_cleanup(&self, side_effect: bool) -> Option<Action> {
        self.as_behavior().synthesize_cleanup(side_effect)
    }

    /// Re-render every template-bearing string field of this action against
    /// `ctx`'s current `args`/`step_vars`/`platform`.
    ///
    /// [`crate::template::render_document`] renders the whole document once
    /// at load time, before any step has run, so it deliberately leaves
    /// `{{ step_vars.* }}` expressions unevaluated rather than erroring on
    /// them as undefined. This is where a step's action finally sees the
    /// real value an earlier step's `outputvar` produced, immediately
    /// before it executes.
    pub(crate) fn rerender(&self, ctx: &ExecutionContext) -> Result<Action, TemplateErrorKind> {
        let context = runtime_context(ctx);
        let render = |s: &str| crate::template::render_runtime_field(s, &context);
        Ok(match self {
            Action::Inline(a) => Action::Inline(InlineSpec {
                command: render(&a.command)?,
            }),
            Action::File(a) => Action::File(FileSpec {
                path: render(&a.path)?,
                executor: a.executor.as_deref().map(render).transpose()?,
                args: a.args.iter().map(|s| render(s)).collect::<Result<_, _>>()?,
            }),
            Action::SubTtp(a) => Action::SubTtp(SubTtpSpec {
                target: render(&a.target)?,
                args: a
                    .args
                    .iter()
                    .map(|(k, v)| render(v).map(|v| (k.clone(), v)))
                    .collect::<Result<_, _>>()?,
            }),
            Action::CreateFile(a) => Action::CreateFile(CreateFileSpec {
                path: render(&a.path)?,
                contents: render(&a.contents)?,
                mode: a.mode.as_deref().map(render).transpose()?,
            }),
            Action::CopyPath(a) => Action::CopyPath(CopyPathSpec {
                src: render(&a.src)?,
                dest: render(&a.dest)?,
                overwrite: a.overwrite,
                recursive: a.recursive,
            }),
            Action::RemovePath(a) => Action::RemovePath(RemovePathSpec {
                path: render(&a.path)?,
                optional: a.optional,
            }),
            Action::EditFile(a) => Action::EditFile(EditFileSpec {
                path: render(&a.path)?,
                edits: a
                    .edits
                    .iter()
                    .map(|e| {
                        Ok::<_, TemplateErrorKind>(EditSpec {
                            old: render(&e.old)?,
                            new: render(&e.new)?,
                            regexp: e.regexp,
                            count: e.count,
                        })
                    })
                    .collect::<Result<_, _>>()?,
            }),
            Action::FetchUri(a) => Action::FetchUri(FetchUriSpec {
                uri: render(&a.uri)?,
                location: render(&a.location)?,
                overwrite: a.overwrite,
                checksum: a
                    .checksum
                    .as_ref()
                    .map(|c| {
                        Ok::<_, TemplateErrorKind>(ChecksumSpec {
                            sha256: render(&c.sha256)?,
                        })
                    })
                    .transpose()?,
            }),
            Action::PrintStr(a) => Action::PrintStr(PrintStrSpec {
                value: render(&a.value)?,
            }),
            Action::Cd(a) => Action::Cd(CdSpec {
                path: render(&a.path)?,
            }),
            Action::KillProcess(a) => Action::KillProcess(KillProcessSpec {
                name: a.name.as_deref().map(render).transpose()?,
                pid: a.pid,
                signal: a.signal.as_deref().map(render).transpose()?,
                grace_seconds: a.grace_seconds,
            }),
            Action::Expect(a) => Action::Expect(ExpectSpec {
                chdir: a.chdir.as_deref().map(render).transpose()?,
                inline: render(&a.inline)?,
                cleanup: a.cleanup.as_deref().map(render).transpose()?,
                responses: a
                    .responses
                    .iter()
                    .map(|t| {
                        Ok::<_, TemplateErrorKind>(ExpectTurn {
                            response: render(&t.response)?,
                            expect: render(&t.expect)?,
                            timeout_seconds: t.timeout_seconds,
                        })
                    })
                    .collect::<Result<_, _>>()?,
                timeout_seconds: a.timeout_seconds,
            }),
        })
    }

    fn as_behavior(&self) -> &dyn ActionBehavior {
        match self {
            Self::Inline(a) => a,
            Self::File(a) => a,
            Self::SubTtp(a) => a,
            Self::CreateFile(a) => a,
            Self::CopyPath(a) => a,
            Self::RemovePath(a) => a,
            Self::EditFile(a) => a,
            Self::FetchUri(a) => a,
            Self::PrintStr(a) => a,
            Self::Cd(a) => a,
            Self::KillProcess(a) => a,
            Self::Expect(a) => a,
        }
    }
}

// ---------------------------------------------------------------- inline --

/// `inline: <shell command>`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InlineSpec {
    /// Shell one-liner.
    pub command: String,
}

impl InlineSpec {
    fn from_scalar(command: String) -> Self {
        Self { command }
    }
}

impl ActionBehavior for InlineSpec {
    fn validate(&self, _vctx: &ValidationContext) -> Result<(), ValidationErrorKind> {
        Ok(())
    }

    fn execute(&self, ctx: &mut ExecutionContext) -> ActionOutcome {
        match process::run_capture(&self.command, ctx) {
            Ok(captured) => {
                let parsed_json = parse_stdout_json(&captured.stdout);
                let output = StepOutput {
                    stdout: captured.stdout,
                    stderr: captured.stderr.clone(),
                    exit_code: captured.exit_code,
                    parsed_json,
                    error: None,
                };
                if captured.exit_code == 0 {
                    ActionOutcome::ok(output, false)
                } else {
                    let err = ActionErrorKind::NonZeroExit(
                        "inline".to_string(),
                        captured.exit_code,
                        captured.stderr,
                    );
                    let mut out = output;
                    out.error = Some(err.to_string());
                    ActionOutcome::failed(out, false, err.into())
                }
            }
            Err(e) => io_failure("inline", e),
        }
    }
}

fn parse_stdout_json(stdout: &str) -> Option<serde_json::Value> {
    let trimmed = stdout.trim_end_matches('\n');
    serde_json::from_str(trimmed).ok()
}

fn io_failure(step: &str, e: std::io::Error) -> ActionOutcome {
    let err = ActionErrorKind::Io(step.to_string(), e.to_string());
    let mut output = StepOutput::empty();
    output.error = Some(err.to_string());
    ActionOutcome::failed(output, false, err.into())
}

// ------------------------------------------------------------------ file --

/// `file: {path, executor?, args?}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSpec {
    /// Path to the file to execute.
    pub path: String,
    /// Explicit executor; falls back to the file's shebang, then the
    /// platform default shell.
    #[serde(default)]
    pub executor: Option<String>,
    /// Positional arguments passed to the file.
    #[serde(default)]
    pub args: Vec<String>,
}

impl ActionBehavior for FileSpec {
    fn validate(&self, _vctx: &ValidationContext) -> Result<(), ValidationErrorKind> {
        Ok(())
    }

    fn execute(&self, ctx: &mut ExecutionContext) -> ActionOutcome {
        let path = resolve_path(&self.path, ctx);
        let executor = self
            .executor
            .clone()
            .or_else(|| detect_shebang(&path, ctx))
            .unwrap_or_else(default_shell);

        let mut cmd = std::process::Command::new(&executor);
        cmd.arg(&path);
        cmd.args(&self.args);
        match process::run_command(&mut cmd, ctx) {
            Ok(captured) => {
                let parsed_json = parse_stdout_json(&captured.stdout);
                let output = StepOutput {
                    stdout: captured.stdout,
                    stderr: captured.stderr.clone(),
                    exit_code: captured.exit_code,
                    parsed_json,
                    error: None,
                };
                if captured.exit_code == 0 {
                    ActionOutcome::ok(output, false)
                } else {
                    let err = ActionErrorKind::NonZeroExit(
                        "file".to_string(),
                        captured.exit_code,
                        captured.stderr,
                    );
                    let mut out = output;
                    out.error = Some(err.to_string());
                    ActionOutcome::failed(out, false, err.into())
                }
            }
            Err(e) => io_failure("file", e),
        }
    }
}

fn detect_shebang(path: &Path, ctx: &ExecutionContext) -> Option<String> {
    let bytes = ctx.fs.read_file(path).ok()?;
    let first_line = bytes
        .split(|&b| b == b'\n')
        .next()
        .map(|l| String::from_utf8_lossy(l).into_owned())?;
    first_line
        .strip_prefix("#!")
        .map(|rest| rest.trim().to_string())
}

fn default_shell() -> String {
    if cfg!(windows) {
        "cmd.exe".to_string()
    } else {
        "sh".to_string()
    }
}

/// Resolve a step-declared path against the logical working directory: the
/// top of `cwd_stack` if a `cd` has run, `invocation_cwd` otherwise. No
/// action here performs a real OS `chdir()`, so every path-taking action
/// must resolve through this instead of the real process cwd.
fn resolve_path(raw: &str, ctx: &ExecutionContext) -> PathBuf {
    let path = PathBuf::from(raw);
    if path.is_absolute() {
        path
    } else {
        ctx.cwd_stack
            .last()
            .cloned()
            .unwrap_or_else(|| ctx.invocation_cwd.clone())
            .join(path)
    }
}

// ------------------------------------------------------------------ ttp ---

/// `ttp: {target, args}` — resolve and run another TTP as a child step.
///
/// Resolution against a [`crate::repository::RepoCollection`] happens in
/// the engine (which owns the collection); this spec only carries the
/// reference and the args to bind for the child run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTtpSpec {
    /// TTP reference (`repo//path` or filesystem path) to run.
    pub target: String,
    /// Arguments to bind in the child run.
    #[serde(default)]
    pub args: BTreeMap<String, String>,
}

impl ActionBehavior for SubTtpSpec {
    fn validate(&self, _vctx: &ValidationContext) -> Result<(), ValidationErrorKind> {
        Ok(())
    }

    fn execute(&self, _ctx: &mut ExecutionContext) -> ActionOutcome {
        // The engine intercepts `Action::SubTtp` before calling `execute()`
        // so it can recurse with access to the `RepoCollection`; this path
        // only runs if a sub-TTP action is executed in isolation (e.g. by
        // a future caller that doesn't special-case it), which is treated
        // as a configuration error.
        let err = ActionErrorKind::Failed(
            "ttp".to_string(),
            "sub-TTP actions must be dispatched by the engine".to_string(),
        );
        let mut output = StepOutput::empty();
        output.error = Some(err.to_string());
        ActionOutcome::failed(output, false, err.into())
    }
}

// ----------------------------------------------------------- create_file --

/// `create_file: {path, contents, mode?}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFileSpec {
    /// Destination path.
    pub path: String,
    /// File contents to write.
    #[serde(default)]
    pub contents: String,
    /// Octal mode string (e.g. `"0644"`); defaults to 0644.
    #[serde(default)]
    pub mode: Option<String>,
}

impl CreateFileSpec {
    fn mode_bits(&self) -> u32 {
        self.mode
            .as_deref()
            .and_then(|m| u32::from_str_radix(m.trim_start_matches("0o"), 8).ok())
            .unwrap_or(0o644)
    }
}

impl ActionBehavior for CreateFileSpec {
    fn validate(&self, _vctx: &ValidationContext) -> Result<(), ValidationErrorKind> {
        Ok(())
    }

    fn execute(&self, ctx: &mut ExecutionContext) -> ActionOutcome {
        let path = resolve_path(&self.path, ctx);
        match ctx
            .fs
            .write_file(&path, self.contents.as_bytes(), self.mode_bits())
        {
            Ok(()) => {
                debug!("created {path:?}");
                ActionOutcome::ok(StepOutput::empty(), true)
            }
            Err(e) => io_failure("create_file", e),
        }
    }

    fn synthesize_cleanup(&self, side_effect: bool) -> Option<Action> {
        side_effect.then(|| {
            Action::RemovePath(RemovePathSpec {
                path: self.path.clone(),
                optional: true,
            })
        })
    }
}

// ------------------------------------------------------------- copy_path --

/// `copy_path: {src, dest, overwrite?, recursive?}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyPathSpec {
    /// Source path.
    pub src: String,
    /// Destination path.
    pub dest: String,
    /// Allow overwriting an existing destination.
    #[serde(default)]
    pub overwrite: bool,
    /// Required to copy a directory tree.
    #[serde(default)]
    pub recursive: bool,
}

impl ActionBehavior for CopyPathSpec {
    fn validate(&self, _vctx: &ValidationContext) -> Result<(), ValidationErrorKind> {
        Ok(())
    }

    fn execute(&self, ctx: &mut ExecutionContext) -> ActionOutcome {
        let src = resolve_path(&self.src, ctx);
        let dest = resolve_path(&self.dest, ctx);

        if ctx.fs.exists(&dest) && !self.overwrite {
            let err = ActionErrorKind::Failed(
                "copy_path".to_string(),
                format!("{dest:?} already exists and overwrite is false"),
            );
            let mut output = StepOutput::empty();
            output.error = Some(err.to_string());
            return ActionOutcome::failed(output, false, err.into());
        }

        let meta = match ctx.fs.metadata(&src) {
            Ok(m) => m,
            Err(e) => return io_failure("copy_path", e),
        };

        if meta.is_dir {
            if !self.recursive {
                let err = ActionErrorKind::Failed(
                    "copy_path".to_string(),
                    format!("{src:?} is a directory; recursive was not set"),
                );
                let mut output = StepOutput::empty();
                output.error = Some(err.to_string());
                return ActionOutcome::failed(output, false, err.into());
            }
            match copy_tree(ctx, &src, &dest) {
                Ok(()) => ActionOutcome::ok(StepOutput::empty(), true),
                Err(e) => io_failure("copy_path", e),
            }
        } else {
            match ctx.fs.read_file(&src) {
                Ok(bytes) => {
                    let mode = meta.mode.unwrap_or(0o644);
                    match ctx.fs.write_file(&dest, &bytes, mode) {
                        Ok(()) => ActionOutcome::ok(StepOutput::empty(), true),
                        Err(e) => io_failure("copy_path", e),
                    }
                }
                Err(e) => io_failure("copy_path", e),
            }
        }
    }

    fn synthesize_cleanup(&self, side_effect: bool) -> Option<Action> {
        side_effect.then(|| {
            Action::RemovePath(RemovePathSpec {
                path: self.dest.clone(),
                optional: true,
            })
        })
    }
}

fn copy_tree(ctx: &ExecutionContext, src: &Path, dest: &Path) -> std::io::Result<()> {
    ctx.fs.create_dir_all(dest)?;
    for entry in ctx.fs.walk(src)? {
        let rel = entry.strip_prefix(src).unwrap_or(&entry);
        let target = dest.join(rel);
        let meta = ctx.fs.metadata(&entry)?;
        if meta.is_dir {
            ctx.fs.create_dir_all(&target)?;
        } else if meta.is_file {
            let bytes = ctx.fs.read_file(&entry)?;
            ctx.fs
                .write_file(&target, &bytes, meta.mode.unwrap_or(0o644))?;
        }
    }
    Ok(())
}

// ----------------------------------------------------------- remove_path --

/// `remove_path: <path>` or `remove_path: {path, optional?}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemovePathSpec {
    /// Path to remove.
    pub path: String,
    /// If true, absence of `path` is not an error.
    #[serde(default)]
    pub optional: bool,
}

impl RemovePathSpec {
    fn from_scalar(path: String) -> Self {
        Self {
            path,
            optional: false,
        }
    }
}

impl ActionBehavior for RemovePathSpec {
    fn validate(&self, _vctx: &ValidationContext) -> Result<(), ValidationErrorKind> {
        Ok(())
    }

    fn execute(&self, ctx: &mut ExecutionContext) -> ActionOutcome {
        let path = resolve_path(&self.path, ctx);
        if !ctx.fs.exists(&path) {
            return if self.optional {
                ActionOutcome::ok(StepOutput::empty(), false)
            } else {
                let err = ActionErrorKind::Failed(
                    "remove_path".to_string(),
                    format!("{path:?} does not exist"),
                );
                let mut output = StepOutput::empty();
                output.error = Some(err.to_string());
                ActionOutcome::failed(output, false, err.into())
            };
        }
        match ctx.fs.remove_tree(&path) {
            Ok(()) => ActionOutcome::ok(StepOutput::empty(), true),
            Err(e) => io_failure("remove_path", e),
        }
    }
}

// ------------------------------------------------------------- edit_file --

/// One ordered edit applied by `edit_file`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditSpec {
    /// Text (or pattern, if `regexp` is set) to find.
    pub old: String,
    /// Replacement text.
    pub new: String,
    /// If true, `old` is a regex.
    #[serde(default)]
    pub regexp: bool,
    /// Exact number of matches required, if given.
    #[serde(default)]
    pub count: Option<usize>,
}

/// `edit_file: {path, edits: [...]}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditFileSpec {
    /// File to edit in place.
    pub path: String,
    /// Ordered list of edits to apply.
    pub edits: Vec<EditSpec>,
}

impl ActionBehavior for EditFileSpec {
    fn validate(&self, _vctx: &ValidationContext) -> Result<(), ValidationErrorKind> {
        Ok(())
    }

    fn execute(&self, ctx: &mut ExecutionContext) -> ActionOutcome {
        let path = resolve_path(&self.path, ctx);
        let original = match ctx.fs.read_file(&path) {
            Ok(b) => b,
            Err(e) => return io_failure("edit_file", e),
        };
        let mut text = match String::from_utf8(original) {
            Ok(s) => s,
            Err(e) => {
                return io_failure("edit_file", std::io::Error::other(e.to_string()));
            }
        };

        for edit in &self.edits {
            match apply_edit(&text, edit) {
                Ok(new_text) => text = new_text,
                Err(message) => {
                    let err = ActionErrorKind::Failed("edit_file".to_string(), message);
                    let mut output = StepOutput::empty();
                    output.error = Some(err.to_string());
                    return ActionOutcome::failed(output, false, err.into());
                }
            }
        }

        match ctx.fs.write_file(&path, text.as_bytes(), 0o644) {
            Ok(()) => ActionOutcome::ok(StepOutput::empty(), true),
            Err(e) => io_failure("edit_file", e),
        }
    }

    fn synthesize_cleanup(&self, side_effect: bool) -> Option<Action> {
        side_effect.then(|| {
            let reversed = self
                .edits
                .iter()
                .rev()
                .map(|e| EditSpec {
                    old: e.new.clone(),
                    new: e.old.clone(),
                    regexp: false,
                    count: e.count,
                })
                .collect();
            Action::EditFile(EditFileSpec {
                path: self.path.clone(),
                edits: reversed,
            })
        })
    }
}

fn apply_edit(text: &str, edit: &EditSpec) -> Result<String, String> {
    if edit.regexp {
        let re = regex::Regex::new(&edit.old).map_err(|e| e.to_string())?;
        let matches = re.find_iter(text).count();
        if matches == 0 {
            return Err(format!("pattern `{}` did not match", edit.old));
        }
        if let Some(expected) = edit.count {
            if matches != expected {
                return Err(format!(
                    "pattern `{}` matched {matches} times, expected {expected}",
                    edit.old
                ));
            }
        }
        Ok(re.replace_all(text, edit.new.as_str()).into_owned())
    } else {
        let matches = text.matches(edit.old.as_str()).count();
        if matches == 0 {
            return Err(format!("text `{}` not found", edit.old));
        }
        if let Some(expected) = edit.count {
            if matches != expected {
                return Err(format!(
                    "text `{}` matched {matches} times, expected {expected}",
                    edit.old
                ));
            }
        }
        Ok(text.replace(edit.old.as_str(), edit.new.as_str()))
    }
}

// ------------------------------------------------------------- fetch_uri --

/// `fetch_uri: {uri, location, overwrite?, checksum?}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchUriSpec {
    /// URI to GET.
    pub uri: String,
    /// Destination path for the response body.
    pub location: String,
    /// Allow overwriting an existing destination.
    #[serde(default)]
    pub overwrite: bool,
    /// Expected checksum of the downloaded body.
    #[serde(default)]
    pub checksum: Option<ChecksumSpec>,
}

impl ActionBehavior for FetchUriSpec {
    fn validate(&self, _vctx: &ValidationContext) -> Result<(), ValidationErrorKind> {
        Ok(())
    }

    fn execute(&self, ctx: &mut ExecutionContext) -> ActionOutcome {
        let location = resolve_path(&self.location, ctx);
        if ctx.fs.exists(&location) && !self.overwrite {
            let err = ActionErrorKind::Failed(
                "fetch_uri".to_string(),
                format!("{location:?} already exists and overwrite is false"),
            );
            let mut output = StepOutput::empty();
            output.error = Some(err.to_string());
            return ActionOutcome::failed(output, false, err.into());
        }

        let body = match reqwest::blocking::get(&self.uri).and_then(|r| r.bytes()) {
            Ok(b) => b,
            Err(e) => {
                let err = ActionErrorKind::Failed("fetch_uri".to_string(), e.to_string());
                let mut output = StepOutput::empty();
                output.error = Some(err.to_string());
                return ActionOutcome::failed(output, false, err.into());
            }
        };

        if let Err(e) = ctx.fs.write_file(&location, &body, 0o644) {
            return io_failure("fetch_uri", e);
        }

        if let Some(checksum) = &self.checksum {
            let digest = format!("{:x}", Sha256::digest(&body));
            if !digest.eq_ignore_ascii_case(&checksum.sha256) {
                // pinned design decision: remove the partial download before
                // reporting failure
                let _ = ctx.fs.remove_file(&location);
                let err = ActionErrorKind::ChecksumMismatch(
                    location.clone(),
                    checksum.sha256.clone(),
                    digest,
                );
                let mut output = StepOutput::empty();
                output.error = Some(err.to_string());
                return ActionOutcome::failed(output, false, err.into());
            }
        }

        ActionOutcome::ok(StepOutput::empty(), true)
    }

    fn synthesize_cleanup(&self, side_effect: bool) -> Option<Action> {
        side_effect.then(|| {
            Action::RemovePath(RemovePathSpec {
                path: self.location.clone(),
                optional: true,
            })
        })
    }
}

// ------------------------------------------------------------- print_str --

/// `print_str: <value>` or `print_str: {value}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrintStrSpec {
    /// Value to write to stdout, verbatim.
    pub value: String,
}

impl PrintStrSpec {
    fn from_scalar(value: String) -> Self {
        Self { value }
    }
}

impl ActionBehavior for PrintStrSpec {
    fn validate(&self, _vctx: &ValidationContext) -> Result<(), ValidationErrorKind> {
        Ok(())
    }

    fn execute(&self, _ctx: &mut ExecutionContext) -> ActionOutcome {
        // Written directly to stdout, never through the logger, so
        // `expected_stdout` test assertions stay deterministic.
        println!("{}", self.value);
        let _ = std::io::stdout().flush();
        ActionOutcome::ok(
            StepOutput {
                stdout: format!("{}\n", self.value),
                ..StepOutput::empty()
            },
            false,
        )
    }
}

// -------------------------------------------------------------------- cd --

/// `cd: <path>` or `cd: {path}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdSpec {
    /// Directory to change into.
    pub path: String,
}

impl CdSpec {
    fn from_scalar(path: String) -> Self {
        Self { path }
    }
}

impl ActionBehavior for CdSpec {
    fn validate(&self, _vctx: &ValidationContext) -> Result<(), ValidationErrorKind> {
        Ok(())
    }

    fn execute(&self, ctx: &mut ExecutionContext) -> ActionOutcome {
        let resolved = resolve_path(&self.path, ctx);
        if !ctx.fs.exists(&resolved) {
            let err = ActionErrorKind::Failed(
                "cd".to_string(),
                format!("{resolved:?} does not exist"),
            );
            let mut output = StepOutput::empty();
            output.error = Some(err.to_string());
            return ActionOutcome::failed(output, false, err.into());
        }
        ctx.cwd_stack.push(resolved);
        ActionOutcome::ok(StepOutput::empty(), true)
    }

    fn synthesize_cleanup(&self, side_effect: bool) -> Option<Action> {
        // The pop is performed by the engine (it owns `cwd_stack`), not by a
        // synthesised `Action`; `CdPop` marks the frame so the engine knows.
        side_effect.then(|| Action::Cd(CdSpec {
            path: CD_POP_MARKER.to_string(),
        }))
    }
}

/// Sentinel path recognised by the engine's cleanup drain to mean "pop the
/// cwd stack" rather than "change into a literal directory named this".
pub const CD_POP_MARKER: &str = "\u{0}ttpforge-cd-pop";

// ------------------------------------------------------------ kill_process --

/// `kill_process: {name?, pid?, signal?, grace_seconds?}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillProcessSpec {
    /// Match processes by exact name.
    #[serde(default)]
    pub name: Option<String>,
    /// Match a single process by pid.
    #[serde(default)]
    pub pid: Option<u32>,
    /// Signal to send first; defaults to `"TERM"`.
    #[serde(default)]
    pub signal: Option<String>,
    /// Seconds to wait before escalating to `SIGKILL`.
    #[serde(default)]
    pub grace_seconds: Option<u64>,
}

impl ActionBehavior for KillProcessSpec {
    fn validate(&self, _vctx: &ValidationContext) -> Result<(), ValidationErrorKind> {
        Ok(())
    }

    fn execute(&self, ctx: &mut ExecutionContext) -> ActionOutcome {
        let pids = match self.resolve_pids(ctx) {
            Ok(p) if !p.is_empty() => p,
            Ok(_) => {
                let target = self.name.clone().unwrap_or_default();
                let err = ActionErrorKind::NoSuchProcess(target);
                let mut output = StepOutput::empty();
                output.error = Some(err.to_string());
                return ActionOutcome::failed(output, false, err.into());
            }
            Err(e) => return io_failure("kill_process", e),
        };

        let first_signal = match self.signal.as_deref().unwrap_or("TERM") {
            "KILL" | "SIGKILL" | "9" => Signal::Kill,
            _ => Signal::Term,
        };
        let grace = Duration::from_secs(self.grace_seconds.unwrap_or(5));

        // all-or-none: signal every match; if any delivery fails, the whole
        // step fails (even though already-signalled processes stay signalled).
        let mut failures = Vec::new();
        for pid in &pids {
            process::signal_group(*pid, first_signal);
        }
        std::thread::sleep(grace.min(Duration::from_millis(200)));
        for pid in &pids {
            if still_alive(*pid) {
                process::signal_group(*pid, Signal::Kill);
            }
        }
        for pid in &pids {
            if still_alive(*pid) {
                failures.push(*pid);
            }
        }

        if failures.is_empty() {
            ActionOutcome::ok(StepOutput::empty(), true)
        } else {
            let err = ActionErrorKind::Failed(
                "kill_process".to_string(),
                format!("failed to terminate pids {failures:?}"),
            );
            let mut output = StepOutput::empty();
            output.error = Some(err.to_string());
            ActionOutcome::failed(output, true, err.into())
        }
    }
}

impl KillProcessSpec {
    fn resolve_pids(&self, ctx: &ExecutionContext) -> std::io::Result<Vec<u32>> {
        if let Some(pid) = self.pid {
            return Ok(vec![pid]);
        }
        let name = self.name.clone().unwrap_or_default();
        let captured = process::run_capture(&format!("pgrep -x {name}"), ctx)?;
        Ok(captured
            .stdout
            .lines()
            .filter_map(|l| l.trim().parse().ok())
            .collect())
    }
}

#[cfg(unix)]
fn still_alive(pid: u32) -> bool {
    use nix::{sys::signal, unistd::Pid};
    signal::kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(not(unix))]
fn still_alive(_pid: u32) -> bool {
    false
}

// ----------------------------------------------------------------- expect --

/// One `{response, expect}` turn of an `expect` action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpectTurn {
    /// Text sent to the child's stdin, followed by a newline.
    pub response: String,
    /// Pattern the child's stdout must contain before the next turn sends.
    pub expect: String,
    /// Per-turn timeout override.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

/// `expect: {chdir?, inline, cleanup?, responses}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpectSpec {
    /// Directory to run the interactive shell in.
    #[serde(default)]
    pub chdir: Option<String>,
    /// Shell command that starts the interactive program.
    pub inline: String,
    /// Command run afterwards regardless of outcome, best-effort.
    #[serde(default)]
    pub cleanup: Option<String>,
    /// Ordered send/expect turns.
    pub responses: Vec<ExpectTurn>,
    /// Default per-turn timeout when a turn doesn't override it.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl ActionBehavior for ExpectSpec {
    fn validate(&self, _vctx: &ValidationContext) -> Result<(), ValidationErrorKind> {
        Ok(())
    }

    #[cfg(unix)]
    fn execute(&self, ctx: &mut ExecutionContext) -> ActionOutcome {
        use rexpect::session::spawn_command;

        let mut cmd = std::process::Command::new("sh");
        cmd.arg("-c").arg(&self.inline);
        let dir = match &self.chdir {
            Some(chdir) => resolve_path(chdir, ctx),
            None => ctx
                .cwd_stack
                .last()
                .cloned()
                .unwrap_or_else(|| ctx.invocation_cwd.clone()),
        };
        cmd.current_dir(dir);

        let default_timeout = self.timeout_seconds.or(Some(30));
        let mut session = match spawn_command(cmd, default_timeout.map(|s| (s * 1000) as u64)) {
            Ok(s) => s,
            Err(e) => {
                let err = ActionErrorKind::Failed("expect".to_string(), e.to_string());
                let mut output = StepOutput::empty();
                output.error = Some(err.to_string());
                return ActionOutcome::failed(output, false, err.into());
            }
        };

        let mut transcript = String::new();
        for turn in &self.responses {
            if ctx.cancel.is_cancelled() {
                let err = crate::error::TtpForgeErrorKind::Cancelled;
                let mut output = StepOutput::empty();
                output.stdout = transcript;
                output.error = Some("cancelled".to_string());
                return ActionOutcome::failed(output, true, err.into());
            }
            match session.exp_string(&turn.expect) {
                Ok(before) => transcript.push_str(&before),
                Err(e) => {
                    let err = ActionErrorKind::ExpectTimeout(
                        "expect".to_string(),
                        Duration::from_secs(turn.timeout_seconds.or(self.timeout_seconds).unwrap_or(30)),
                    );
                    let mut output = StepOutput::empty();
                    output.stdout = transcript;
                    output.error = Some(format!("{err} ({e})"));
                    return ActionOutcome::failed(output, true, err.into());
                }
            }
            if let Err(e) = session.send_line(&turn.response) {
                let err = ActionErrorKind::Failed("expect".to_string(), e.to_string());
                let mut output = StepOutput::empty();
                output.stdout = transcript;
                output.error = Some(err.to_string());
                return ActionOutcome::failed(output, true, err.into());
            }
        }

        ActionOutcome::ok(
            StepOutput {
                stdout: transcript,
                ..StepOutput::empty()
            },
            true,
        )
    }

    #[cfg(not(unix))]
    fn execute(&self, _ctx: &mut ExecutionContext) -> ActionOutcome {
        let err = ActionErrorKind::Failed(
            "expect".to_string(),
            "interactive shell driving is only supported on unix".to_string(),
        );
        let mut output = StepOutput::empty();
        output.error = Some(err.to_string());
        ActionOutcome::failed(output, false, err.into())
    }

    fn synthesize_cleanup(&self, side_effect: bool) -> Option<Action> {
        if !side_effect {
            return None;
        }
        self.cleanup
            .clone()
            .map(|command| Action::Inline(InlineSpec { command }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_rejects_multiple_action_keys() {
        let yaml = "name: s\ninline: echo hi\ncreate_file: {path: x, contents: y}\n";
        let err = serde_yaml::from_str::<crate::ttp::Step>(yaml).unwrap_err();
        assert!(err.to_string().contains("more than one action"));
    }

    #[test]
    fn inline_rejects_zero_action_keys() {
        let yaml = "name: s\n";
        assert!(serde_yaml::from_str::<crate::ttp::Step>(yaml).is_err());
    }

    #[test]
    fn inline_scalar_form_parses() {
        let yaml = "name: s\ninline: echo hi\n";
        let step: crate::ttp::Step = serde_yaml::from_str(yaml).unwrap();
        match step.action {
            Action::Inline(spec) => assert_eq!(spec.command, "echo hi"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn create_file_synthesizes_remove_path_only_on_side_effect() {
        let spec = CreateFileSpec {
            path: "/tmp/x".to_string(),
            contents: String::new(),
            mode: None,
        };
        assert!(spec.synthesize_cleanup(false).is_none());
        assert!(matches!(
            spec.synthesize_cleanup(true),
            Some(Action::RemovePath(_))
        ));
    }

    #[test]
    fn edit_file_cleanup_reverses_edits_in_order() {
        let spec = EditFileSpec {
            path: "f".to_string(),
            edits: vec![
                EditSpec {
                    old: "a".into(),
                    new: "b".into(),
                    regexp: false,
                    count: None,
                },
                EditSpec {
                    old: "b".into(),
                    new: "c".into(),
                    regexp: false,
                    count: None,
                },
            ],
        };
        let Some(Action::EditFile(reverse)) = spec.synthesize_cleanup(true) else {
            panic!("expected EditFile cleanup")
        };
        assert_eq!(reverse.edits[0].old, "c");
        assert_eq!(reverse.edits[0].new, "b");
        assert_eq!(reverse.edits[1].old, "b");
        assert_eq!(reverse.edits[1].new, "a");
    }
}
