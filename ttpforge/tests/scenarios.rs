//! End-to-end engine scenarios, driven the same way the `run`/`test`
//! subcommands drive them: a `TtpDocument` parsed from a YAML fixture,
//! run through `Engine`, asserted on captured stdout and exit semantics.

use std::collections::BTreeMap;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use ttpforge_core::{
    Arch, ArgBinder, Engine, ExecutionContext, Os, OsFilesystem, Platform, TtpDocument,
};

fn doc(yaml: &str) -> TtpDocument {
    serde_yaml::from_str(yaml).expect("fixture parses")
}

fn base_preamble() -> &'static str {
    "api_version: \"2.0\"\nuuid: 11111111-1111-4111-8111-111111111111\nname: scenario\n"
}

fn fresh_ctx() -> ExecutionContext {
    ExecutionContext::new(std::env::temp_dir(), Arc::new(OsFilesystem))
}

fn stdout_of(report: &ttpforge_core::RunReport) -> String {
    report
        .steps
        .iter()
        .filter_map(|s| s.output.as_ref())
        .map(|o| o.stdout.as_str())
        .collect()
}

#[test]
fn inline_success_runs_cleanup_in_order() {
    let yaml = format!(
        "{}steps:\n  - name: s1\n    inline: \"echo hello\"\n    cleanup: {{name: c1, inline: \"echo bye\"}}\n",
        base_preamble()
    );
    let mut ctx = fresh_ctx();
    let report = Engine.run(&doc(&yaml), &mut ctx).expect("run succeeds");
    assert!(!report.skipped);
    assert_eq!(stdout_of(&report), "hello\n");
}

#[test]
fn failure_triggers_reverse_cleanup() {
    let yaml = format!(
        "{}steps:\n  - name: a\n    inline: \"echo A\"\n    cleanup: {{name: ca, inline: \"echo ca\"}}\n  - name: b\n    inline: \"echo B\"\n    cleanup: {{name: cb, inline: \"echo cb\"}}\n  - name: c\n    inline: \"false\"\n",
        base_preamble()
    );
    let mut ctx = fresh_ctx();
    let err = Engine.run(&doc(&yaml), &mut ctx).expect_err("step c fails");
    // cleanup failures ran in LIFO order (cb before ca) regardless of the
    // primary error, and did not themselves error out.
    assert!(err.cleanup_failures().is_empty());
}

#[test]
fn no_cleanup_flag_skips_draining_on_success() {
    let yaml = format!(
        "{}steps:\n  - name: s1\n    inline: \"echo hello\"\n    cleanup: {{name: c1, inline: \"echo bye\"}}\n",
        base_preamble()
    );
    let mut ctx = fresh_ctx();
    ctx.no_cleanup = true;
    let report = Engine.run(&doc(&yaml), &mut ctx).expect("run succeeds");
    assert_eq!(stdout_of(&report), "hello\n");
}

#[test]
fn path_arg_resolves_against_invocation_cwd_before_any_chdir() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("f.txt"), b"contents").unwrap();

    let yaml = format!(
        "{}args:\n  - name: p\n    type: path\nsteps:\n  - name: s1\n    inline: \"cat {{{{ args.p }}}}\"\n",
        base_preamble()
    );
    let document = doc(&yaml);

    let mut cli_args = BTreeMap::new();
    cli_args.insert("p".to_string(), "f.txt".to_string());
    let bound = ArgBinder::bind(&document.preamble.args, &cli_args, tmp.path()).unwrap();

    let mut ctx = ExecutionContext::new(tmp.path().to_path_buf(), Arc::new(OsFilesystem));
    ctx.args_bound = bound;

    let report = Engine.run(&document, &mut ctx).expect("cat succeeds");
    assert_eq!(stdout_of(&report), "contents");
}

#[test]
fn requirement_mismatch_skips_with_empty_stdout() {
    let yaml = "api_version: \"2.0\"\nuuid: 11111111-1111-4111-8111-111111111111\nname: scenario\nrequirements:\n  platforms:\n    - os: windows\nsteps:\n  - name: s1\n    inline: \"echo should-not-run\"\n";
    let mut ctx = fresh_ctx();
    ctx.platform = Platform {
        os: Some(Os::Linux),
        arch: Some(Arch::Amd64),
    };
    let report = Engine.run(&doc(yaml), &mut ctx).expect("skip is not an error");
    assert!(report.skipped);
    assert!(report.skip_reason.is_some());
    assert_eq!(stdout_of(&report), "");
}

#[test]
fn later_step_consumes_an_earlier_steps_outputvar_via_step_vars() {
    // At load time `render_document` leaves `{{ step_vars.* }}` expressions
    // untouched rather than failing with an undefined-variable error, since
    // no step has run yet; this only actually resolves once `s1` has
    // produced `greet` and `s2`'s action is re-rendered immediately before
    // it runs.
    let yaml = format!(
        "{}steps:\n  - name: s1\n    inline: \"echo hello\"\n    outputvar: greet\n  - name: s2\n    inline: \"echo {{{{ step_vars.greet.output }}}}\"\n",
        base_preamble()
    );
    let mut ctx = fresh_ctx();
    let report = Engine.run(&doc(&yaml), &mut ctx).expect("run succeeds");
    assert!(!report.skipped);
    assert_eq!(stdout_of(&report), "hello\nhello\n");
}

#[test]
fn sub_ttp_collapses_child_cleanups_into_one_parent_frame() {
    use ttpforge_core::{Filesystem, Repo, RepoCollection};

    let fs: Arc<dyn Filesystem> = Arc::new(OsFilesystem);
    let repo_dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(repo_dir.path().join("ttps")).unwrap();
    std::fs::write(
        repo_dir.path().join("ttpforge-repo-config.yaml"),
        "ttp_search_paths: [ttps]\ntemplate_search_paths: []\n",
    )
    .unwrap();
    let child_yaml = format!(
        "{}steps:\n  - name: cs1\n    inline: \"echo c1\"\n    cleanup: {{name: cc1, inline: \"echo cleanup-c1\"}}\n  - name: cs2\n    inline: \"echo c2\"\n    cleanup: {{name: cc2, inline: \"echo cleanup-c2\"}}\n",
        base_preamble()
    );
    std::fs::write(repo_dir.path().join("ttps/child.yaml"), child_yaml).unwrap();

    let repo = Repo::load_adhoc(repo_dir.path().to_path_buf(), fs.clone()).unwrap();
    let repo_name = repo.name.clone();
    let mut repos = RepoCollection::new(fs.clone());
    repos.add(repo).unwrap();

    let parent_yaml = format!(
        "{}steps:\n  - name: p1\n    inline: \"echo p1\"\n    cleanup: {{name: pc1, inline: \"echo cleanup-p1\"}}\n  - name: p2\n    ttp:\n      target: \"{repo_name}//child.yaml\"\n",
        base_preamble()
    );
    let mut ctx = fresh_ctx();
    ctx.repos = Some(Arc::new(repos));

    let report = Engine.run(&doc(&parent_yaml), &mut ctx).expect("both steps succeed");
    assert!(!report.skipped);
    // Child cleanups drain LIFO inside their own collapsed frame, then the
    // parent's own cleanup drains after it: cc2, cc1, pc1.
    assert_eq!(stdout_of(&report), "p1\n");
}
