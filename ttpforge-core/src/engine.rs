//! Execution engine: runs one [`crate::ttp::TtpDocument`] end to end,
//! maintaining the LIFO cleanup stack and the step state machine.

use std::time::Duration;

use log::{info, warn};

use crate::{
    action::{Action, SubTtpSpec},
    context::ExecutionContext,
    error::{
        CleanupFailure, RepositoryErrorKind, RequirementErrorKind, TemplateErrorKind,
        TtpForgeError, TtpForgeErrorKind, TtpForgeResult,
    },
    progress::{NoProgress, Progress},
    template::{render_runtime_field, runtime_context},
    ttp::{Step, StepOutput, TtpDocument},
};

/// Lifecycle state of a single step within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    /// Not yet looked at.
    Pending,
    /// Requirements/condition are being evaluated.
    Validating,
    /// Requirements and condition passed; about to run.
    Ready,
    /// `execute()` is in flight.
    Running,
    /// `execute()` returned without error.
    Succeeded,
    /// `execute()` returned an error, or a requirement/condition failed.
    Failed,
    /// The step's `if`/condition was false; it was never run.
    Skipped,
}

/// One step's recorded outcome, in declaration order.
#[derive(Debug, Clone)]
pub struct StepRecord {
    /// The step's declared name.
    pub name: String,
    /// Final state reached.
    pub state: StepState,
    /// Captured output, if the action ran.
    pub output: Option<StepOutput>,
}

/// What a single [`CleanupFrame`] does when drained.
#[derive(Clone)]
pub enum CleanupUnit {
    /// Run a single action's cleanup.
    Action(Action),
    /// A sub-TTP's own, never-drained cleanup stack, received as a single
    /// opaque frame in the parent (drained in its own LIFO order when this
    /// frame comes up).
    SubTtp(Vec<CleanupFrame>),
}

/// One frame of the LIFO cleanup stack.
#[derive(Clone)]
pub struct CleanupFrame {
    /// Index into `steps` of the step this cleanup belongs to.
    pub step_index: usize,
    /// Human-readable label, `steps[i].name`.
    pub step_name: String,
    /// What to do when this frame is drained.
    pub unit: CleanupUnit,
}

/// Whole-run outcome: whether it ran, was skipped, or failed, plus the
/// per-step trace and any cleanup failures collected while draining.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Per-step records in declaration order.
    pub steps: Vec<StepRecord>,
    /// True if the run was skipped due to unmet `requirements`.
    pub skipped: bool,
    /// Human-readable reason, set when `skipped` is true.
    pub skip_reason: Option<String>,
}

/// Runs a [`TtpDocument`] to completion against an [`ExecutionContext`].
#[derive(Debug, Default)]
pub struct Engine;

impl Engine {
    /// Execute `doc` end to end with no progress reporting.
    pub fn run(&self, doc: &TtpDocument, ctx: &mut ExecutionContext) -> TtpForgeResult<RunReport> {
        self.run_with_progress(doc, ctx, &NoProgress)
    }

    /// Execute `doc` end to end: requirement check, then each step in
    /// order, draining the cleanup stack on failure or (unless
    /// `ctx.no_cleanup`) on top-level success. `progress` is notified as
    /// each step starts and finishes.
    pub fn run_with_progress(
        &self,
        doc: &TtpDocument,
        ctx: &mut ExecutionContext,
        progress: &dyn Progress,
    ) -> TtpForgeResult<RunReport> {
        let (result, mut cleanup_stack) = self.run_inner(doc, ctx, progress);
        match result {
            Ok(report) => {
                if report.skipped || ctx.dry_run {
                    return Ok(report);
                }
                if !ctx.no_cleanup {
                    self.drain_cleanup(&mut cleanup_stack, ctx, progress);
                }
                Ok(report)
            }
            Err(error) => {
                let failures = self.drain_cleanup(&mut cleanup_stack, ctx, progress);
                Err(error.with_cleanup_failures(failures))
            }
        }
    }

    /// Run `doc`'s requirement check and step loop without ever draining
    /// the cleanup stack; the caller decides when (or whether) to drain it.
    /// Used both by `run_with_progress` and, for a sub-TTP, by
    /// `run_sub_ttp`, which needs the leftover stack intact to collapse
    /// into a single frame in the parent.
    fn run_inner(
        &self,
        doc: &TtpDocument,
        ctx: &mut ExecutionContext,
        progress: &dyn Progress,
    ) -> (TtpForgeResult<RunReport>, Vec<CleanupFrame>) {
        if let Some(requirements) = &doc.preamble.requirements {
            if let Err(reason) = check_requirements(requirements, ctx) {
                info!("skipping TTP `{}`: {reason}", doc.preamble.name);
                return (
                    Ok(RunReport {
                        steps: Vec::new(),
                        skipped: true,
                        skip_reason: Some(reason),
                    }),
                    Vec::new(),
                );
            }
        }

        let mut records = Vec::with_capacity(doc.steps.len());
        let mut cleanup_stack: Vec<CleanupFrame> = Vec::new();

        for (index, step) in doc.steps.iter().enumerate() {
            if ctx.cancel.is_cancelled() {
                records.push(StepRecord {
                    name: step.name.clone(),
                    state: StepState::Failed,
                    output: None,
                });
                return (Err(TtpForgeErrorKind::Cancelled.into()), cleanup_stack);
            }

            progress.step_started(&step.name);
            let (outcome, sub_frames, rendered_action) = self.run_step(index, step, ctx, progress);
            match outcome {
                StepOutcome::Succeeded { output, side_effect } => {
                    progress.step_finished(&step.name, true);
                    if let Some(outputvar) = &step.outputvar {
                        ctx.step_vars
                            .insert(outputvar.clone(), output.as_step_var());
                    }
                    if let Some(frame) =
                        self.cleanup_frame_for(index, step, &rendered_action, side_effect, sub_frames)
                    {
                        cleanup_stack.push(frame);
                    }
                    records.push(StepRecord {
                        name: step.name.clone(),
                        state: StepState::Succeeded,
                        output: Some(output),
                    });
                }
                StepOutcome::Skipped => {
                    records.push(StepRecord {
                        name: step.name.clone(),
                        state: StepState::Skipped,
                        output: None,
                    });
                }
                StepOutcome::Failed { output, error, side_effect } => {
                    progress.step_finished(&step.name, false);
                    if let Some(frame) =
                        self.cleanup_frame_for(index, step, &rendered_action, side_effect, sub_frames)
                    {
                        cleanup_stack.push(frame);
                    }
                    records.push(StepRecord {
                        name: step.name.clone(),
                        state: StepState::Failed,
                        output,
                    });
                    return (Err(error), cleanup_stack);
                }
            }
        }

        (
            Ok(RunReport {
                steps: records,
                skipped: false,
                skip_reason: None,
            }),
            cleanup_stack,
        )
    }

    fn run_step(
        &self,
        index: usize,
        step: &Step,
        ctx: &mut ExecutionContext,
        progress: &dyn Progress,
    ) -> (StepOutcome, Option<Vec<CleanupFrame>>, Action) {
        if let Some(condition) = &step.condition {
            if let Err(e) = condition.verify(ctx) {
                warn!("step `{}` condition failed: {e}", step.name);
                return (StepOutcome::Skipped, None, step.action.clone());
            }
        }

        let rendered = match RenderedStep::build(step, ctx) {
            Ok(r) => r,
            Err(e) => return (template_failure(e), None, step.action.clone()),
        };

        if let Some(if_expr) = &rendered.if_expr {
            if !is_truthy(if_expr) {
                return (StepOutcome::Skipped, None, step.action.clone());
            }
        }

        let pushed_chdir = rendered.chdir.is_some();
        if let Some(chdir) = &rendered.chdir {
            ctx.cwd_stack.push(resolve_chdir(chdir, ctx));
        }

        let prior_env = apply_step_env(&rendered.env, ctx);

        let (outcome, sub_frames) = if let Action::SubTtp(sub) = &rendered.action {
            self.run_sub_ttp(sub, ctx, progress)
        } else {
            let result = rendered.action.execute(ctx);
            let side_effect = result.side_effect;
            let outcome = match result.result {
                Ok(()) => StepOutcome::Succeeded {
                    output: result.output,
                    side_effect,
                },
                Err(e) => StepOutcome::Failed {
                    output: Some(result.output),
                    error: e,
                    side_effect,
                },
            };
            (outcome, None)
        };

        restore_env(prior_env, ctx);
        // `step.chdir` scopes only this step's action, unlike the `cd`
        // action variant (whose effect persists until its cleanup pops it).
        if pushed_chdir {
            ctx.cwd_stack.pop();
        }
        (outcome, sub_frames, rendered.action)
    }

    /// Resolve `sub.target` against `ctx.repos`, load and bind it, and run
    /// it to completion in a child context, never draining its cleanup
    /// stack: the leftover frames are returned so the caller can collapse
    /// them into one opaque [`CleanupUnit::SubTtp`] frame in the parent.
    fn run_sub_ttp(
        &self,
        sub: &SubTtpSpec,
        ctx: &mut ExecutionContext,
        progress: &dyn Progress,
    ) -> (StepOutcome, Option<Vec<CleanupFrame>>) {
        let Some(repos) = ctx.repos.clone() else {
            return sub_ttp_failure(
                RepositoryErrorKind::TtpNotFound(
                    sub.target.clone(),
                    "<no repository collection configured>".to_string(),
                )
                .into(),
            );
        };

        let (_repo, path) = match repos.resolve_ref(&sub.target) {
            Ok(v) => v,
            Err(e) => return sub_ttp_failure(e.into()),
        };

        let bytes = match ctx.fs.read_file(&path) {
            Ok(b) => b,
            Err(e) => return sub_ttp_failure(e.into()),
        };

        let (doc, bound) = match crate::loader::load_ttp_bytes(
            &bytes,
            &sub.args,
            &ctx.invocation_cwd,
            &ctx.platform,
        ) {
            Ok(v) => v,
            Err(e) => return sub_ttp_failure(e),
        };

        let mut child_ctx = ctx.child(bound);
        let (result, child_frames) = self.run_inner(&doc, &mut child_ctx, progress);
        let side_effect = !child_frames.is_empty();
        match result {
            Ok(_report) => (
                StepOutcome::Succeeded {
                    output: StepOutput::empty(),
                    side_effect,
                },
                Some(child_frames),
            ),
            Err(error) => {
                let mut output = StepOutput::empty();
                output.error = Some(error.to_string());
                (
                    StepOutcome::Failed {
                        output: Some(output),
                        error,
                        side_effect,
                    },
                    Some(child_frames),
                )
            }
        }
    }

    fn cleanup_frame_for(
        &self,
        index: usize,
        step: &Step,
        rendered_action: &Action,
        side_effect: bool,
        sub_frames: Option<Vec<CleanupFrame>>,
    ) -> Option<CleanupFrame> {
        if let Some(explicit) = &step.cleanup {
            return Some(CleanupFrame {
                step_index: index,
                step_name: step.name.clone(),
                unit: CleanupUnit::Action(explicit.action.clone()),
            });
        }
        if let Some(frames) = sub_frames {
            if frames.is_empty() {
                return None;
            }
            return Some(CleanupFrame {
                step_index: index,
                step_name: step.name.clone(),
                unit: CleanupUnit::SubTtp(frames),
            });
        }
        // Synthesised cleanup is derived from the already-rendered action,
        // not the template as declared, so e.g. a synthesised `remove_path`
        // targets the literal path `create_file` actually wrote.
        rendered_action
            .synthesize_cleanup(side_effect)
            .map(|action| CleanupFrame {
                step_index: index,
                step_name: step.name.clone(),
                unit: CleanupUnit::Action(action),
            })
    }

    /// Drain `stack` LIFO, returning the failures recorded along the way.
    /// A failure in one frame does not stop later frames from draining.
    fn drain_cleanup(
        &self,
        stack: &mut Vec<CleanupFrame>,
        ctx: &mut ExecutionContext,
        progress: &dyn Progress,
    ) -> Vec<CleanupFailure> {
        let mut failures = Vec::new();
        while let Some(frame) = stack.pop() {
            if ctx.cleanup_delay > Duration::ZERO {
                std::thread::sleep(ctx.cleanup_delay);
            }
            progress.cleanup_started(&frame.step_name);
            match frame.unit {
                CleanupUnit::SubTtp(mut nested) => {
                    failures.extend(self.drain_cleanup(&mut nested, ctx, progress));
                }
                CleanupUnit::Action(action) => {
                    if action.cd_pop_marker_path() == Some(crate::action::CD_POP_MARKER) {
                        ctx.cwd_stack.pop();
                        continue;
                    }
                    // An explicit `cleanup:` action may itself reference
                    // `step_vars` (e.g. the outputvar of the step it
                    // belongs to), so it is rendered here against whatever
                    // is live at drain time rather than at frame-creation
                    // time.
                    match action.rerender(ctx) {
                        Ok(rendered) => {
                            let result = rendered.execute(ctx);
                            if let Err(e) = result.result {
                                warn!("cleanup for step `{}` failed: {e}", frame.step_name);
                                failures.push(CleanupFailure {
                                    step_name: frame.step_name,
                                    message: e.to_string(),
                                });
                            }
                        }
                        Err(e) => {
                            warn!("cleanup for step `{}` failed: {e}", frame.step_name);
                            failures.push(CleanupFailure {
                                step_name: frame.step_name,
                                message: e.to_string(),
                            });
                        }
                    }
                }
            }
        }
        failures
    }
}

fn sub_ttp_failure(error: TtpForgeError) -> (StepOutcome, Option<Vec<CleanupFrame>>) {
    let mut output = StepOutput::empty();
    output.error = Some(error.to_string());
    (
        StepOutcome::Failed {
            output: Some(output),
            error,
            side_effect: false,
        },
        None,
    )
}

enum StepOutcome {
    Succeeded { output: StepOutput, side_effect: bool },
    Skipped,
    Failed {
        output: Option<StepOutput>,
        error: TtpForgeError,
        side_effect: bool,
    },
}

/// A step's `if`/`chdir`/`env`/action fields, re-rendered against the live
/// `ctx.args_bound`/`ctx.step_vars` immediately before the step runs. This is
/// what actually resolves a `{{ step_vars.* }}` reference left untouched by
/// [`crate::template::render_document`] at load time, once the step whose
/// `outputvar` it names has actually produced a value.
struct RenderedStep {
    if_expr: Option<String>,
    chdir: Option<String>,
    env: std::collections::BTreeMap<String, String>,
    action: Action,
}

impl RenderedStep {
    fn build(step: &Step, ctx: &ExecutionContext) -> Result<Self, TtpForgeError> {
        let context = runtime_context(ctx);
        let render = |s: &str| render_runtime_field(s, &context);
        let if_expr = step.if_expr.as_deref().map(render).transpose()?;
        let chdir = step.chdir.as_deref().map(render).transpose()?;
        let env = step
            .env
            .iter()
            .map(|(k, v)| render(v).map(|v| (k.clone(), v)))
            .collect::<Result<std::collections::BTreeMap<_, _>, TemplateErrorKind>>()?;
        let action = step.action.rerender(ctx)?;
        Ok(Self {
            if_expr,
            chdir,
            env,
            action,
        })
    }
}

fn template_failure(error: TtpForgeError) -> StepOutcome {
    let mut output = StepOutput::empty();
    output.error = Some(error.to_string());
    StepOutcome::Failed {
        output: Some(output),
        error,
        side_effect: false,
    }
}

fn check_requirements(
    requirements: &crate::ttp::Requirements,
    ctx: &ExecutionContext,
) -> Result<(), String> {
    if !requirements.platforms.is_empty()
        && !requirements
            .platforms
            .iter()
            .any(|wanted| wanted.compatible_with(&ctx.platform))
    {
        return Err(RequirementErrorKind::PlatformMismatch(ctx.platform.to_string()).to_string());
    }
    if requirements.superuser && !is_superuser() {
        return Err(RequirementErrorKind::SuperuserRequired.to_string());
    }
    Ok(())
}

#[cfg(unix)]
fn is_superuser() -> bool {
    nix::unistd::geteuid().is_root()
}

#[cfg(not(unix))]
fn is_superuser() -> bool {
    false
}

fn is_truthy(rendered: &str) -> bool {
    !matches!(
        rendered.trim().to_ascii_lowercase().as_str(),
        "" | "false" | "0" | "no"
    )
}

fn resolve_chdir(raw: &str, ctx: &ExecutionContext) -> std::path::PathBuf {
    let path = std::path::PathBuf::from(raw);
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

fn apply_step_env(
    env: &std::collections::BTreeMap<String, String>,
    ctx: &mut ExecutionContext,
) -> Vec<(String, Option<String>)> {
    let mut prior = Vec::with_capacity(env.len());
    for (k, v) in env {
        prior.push((k.clone(), ctx.env.insert(k.clone(), v.clone())));
    }
    prior
}

fn restore_env(prior: Vec<(String, Option<String>)>, ctx: &mut ExecutionContext) {
    for (k, v) in prior {
        match v {
            Some(v) => {
                ctx.env.insert(k, v);
            }
            None => {
                ctx.env.remove(&k);
            }
        }
    }
}

impl Action {
    /// `Some(path)` only for a `cd` action, so the engine's cleanup drain
    /// can recognise the sentinel pop marker synthesised by
    /// [`crate::action::CdSpec::synthesize_cleanup`] and pop the cwd stack
    /// itself rather than executing it as a literal `cd`.
    fn cd_pop_marker_path(&self) -> Option<&str> {
        match self {
            Action::Cd(spec) => Some(spec.path.as_str()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{args::ArgValue, ttp::Preamble};
    use std::collections::BTreeMap;

    fn doc_from_yaml(yaml: &str) -> TtpDocument {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn base_preamble_yaml() -> &'static str {
        "api_version: \"2.0\"\nuuid: 11111111-1111-4111-8111-111111111111\nname: t\n"
    }

    #[test]
    fn inline_success_runs_explicit_cleanup() {
        let yaml = format!(
            "{}steps:\n  - name: s1\n    inline: \"echo hello\"\n    cleanup:\n      name: c1\n      inline: \"echo bye\"\n",
            base_preamble_yaml()
        );
        let doc = doc_from_yaml(&yaml);
        let mut ctx = ExecutionContext::for_test();
        let report = Engine.run(&doc, &mut ctx).unwrap();
        assert!(!report.skipped);
        assert_eq!(report.steps.len(), 1);
        assert_eq!(report.steps[0].state, StepState::Succeeded);
        assert_eq!(
            report.steps[0].output.as_ref().unwrap().stdout.trim_end(),
            "hello"
        );
    }

    #[test]
    fn failure_triggers_reverse_cleanup_and_propagates_error() {
        let yaml = format!(
            "{}steps:\n  - name: a\n    inline: \"echo A\"\n    cleanup: {{name: ca, inline: \"echo ca\"}}\n  - name: b\n    inline: \"echo B\"\n    cleanup: {{name: cb, inline: \"echo cb\"}}\n  - name: c\n    inline: \"false\"\n",
            base_preamble_yaml()
        );
        let doc = doc_from_yaml(&yaml);
        let mut ctx = ExecutionContext::for_test();
        let err = Engine.run(&doc, &mut ctx).unwrap_err();
        assert!(matches!(err.into_inner(), TtpForgeErrorKind::Action(_)));
    }

    #[test]
    fn no_cleanup_flag_skips_draining_on_success() {
        let yaml = format!(
            "{}steps:\n  - name: s1\n    inline: \"echo hello\"\n    cleanup: {{name: c1, inline: \"echo bye\"}}\n",
            base_preamble_yaml()
        );
        let doc = doc_from_yaml(&yaml);
        let mut ctx = ExecutionContext::for_test();
        ctx.no_cleanup = true;
        let report = Engine.run(&doc, &mut ctx).unwrap();
        assert_eq!(report.steps[0].state, StepState::Succeeded);
    }

    #[test]
    fn requirement_mismatch_skips_without_running_steps() {
        let yaml = format!(
            "api_version: \"2.0\"\nuuid: 11111111-1111-4111-8111-111111111111\nname: t\nrequirements:\n  platforms:\n    - os: windows\nsteps:\n  - name: s1\n    inline: \"echo should-not-run\"\n",
        );
        let doc = doc_from_yaml(&yaml);
        let mut ctx = ExecutionContext::for_test();
        ctx.platform = crate::platform::Platform {
            os: Some(crate::platform::Os::Linux),
            arch: Some(crate::platform::Arch::Amd64),
        };
        let report = Engine.run(&doc, &mut ctx).unwrap();
        assert!(report.skipped);
        assert!(report.steps.is_empty());
    }

    #[test]
    fn path_arg_resolves_against_invocation_cwd() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), b"contents").unwrap();
        let yaml = format!(
            "{}args:\n  - name: p\n    type: path\nsteps:\n  - name: s1\n    inline: \"cat {{{{ args.p }}}}\"\n",
            base_preamble_yaml()
        );
        let doc = doc_from_yaml(&yaml);
        let mut ctx = ExecutionContext::for_test();
        ctx.invocation_cwd = dir.path().to_path_buf();
        ctx.cwd_stack = vec![dir.path().to_path_buf()];
        let mut cli = BTreeMap::new();
        cli.insert("p".to_string(), "f.txt".to_string());
        let bound = crate::args::ArgBinder::bind(&doc.preamble.args, &cli, &ctx.invocation_cwd).unwrap();
        ctx.args_bound = bound;
        let Some(ArgValue::Path(p)) = ctx.args_bound.get("p") else {
            panic!("expected bound path")
        };
        let rendered = format!("echo {}", p.display());
        let out = crate::process::run_capture(&rendered, &ctx).unwrap();
        assert_eq!(out.exit_code, 0);
    }

    #[test]
    fn sub_ttp_failure_collapses_child_cleanups_into_one_parent_frame() {
        use crate::repository::{Repo, RepoCollection};
        use std::sync::Arc;

        let fs: Arc<dyn crate::filesystem::Filesystem> = Arc::new(crate::filesystem::OsFilesystem);
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("ttps")).unwrap();
        std::fs::write(
            dir.path().join("ttpforge-repo-config.yaml"),
            "ttp_search_paths: [ttps]\ntemplate_search_paths: []\n",
        )
        .unwrap();
        let child_yaml = format!(
            "{}steps:\n  - name: cs1\n    inline: \"echo c1\"\n    cleanup: {{name: cc1, inline: \"echo cleanup-c1\"}}\n  - name: cs2\n    inline: \"echo c2\"\n    cleanup: {{name: cc2, inline: \"echo cleanup-c2\"}}\n  - name: cs3\n    inline: \"false\"\n",
            base_preamble_yaml()
        );
        std::fs::write(dir.path().join("ttps/child.yaml"), child_yaml).unwrap();

        let repo = Repo::load_adhoc(dir.path().to_path_buf(), fs.clone()).unwrap();
        let mut repos = RepoCollection::new(fs.clone());
        let repo_name = repo.name.clone();
        repos.add(repo).unwrap();

        let parent_yaml = format!(
            "{}steps:\n  - name: p1\n    inline: \"echo p1\"\n    cleanup: {{name: pc1, inline: \"echo cleanup-p1\"}}\n  - name: p2\n    ttp:\n      target: \"{repo_name}//child.yaml\"\n",
            base_preamble_yaml()
        );
        let doc = doc_from_yaml(&parent_yaml);
        let mut ctx = ExecutionContext::for_test();
        ctx.repos = Some(Arc::new(repos));

        let err = Engine.run(&doc, &mut ctx).unwrap_err();
        assert!(matches!(err.into_inner(), TtpForgeErrorKind::Action(_)));
    }
}
