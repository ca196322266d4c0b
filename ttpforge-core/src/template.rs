//! Two-pass template rendering: parse args/tests from the preamble,
//! then render the whole original document through `tera` before the
//! final parse into a [`TtpDocument`].

use std::collections::BTreeMap;

use serde::Deserialize;
use tera::{Context, Tera};

use crate::{
    args::ArgValue,
    context::ExecutionContext,
    error::TemplateErrorKind,
    platform::Platform,
    preprocess::preprocess,
    ttp::{ArgSpec, TestCase},
};

/// What Pass A needs out of the preamble before any args are bound:
/// declared args and test cases. Deserialized with `#[serde(flatten)]`-free
/// field access so unresolved `{{ }}` in the steps portion never matters —
/// Pass A only ever looks at `preamble_bytes`.
#[derive(Debug, Deserialize)]
struct PreambleArgsOnly {
    #[serde(default)]
    args: Vec<ArgSpec>,
    #[serde(default)]
    tests: Vec<TestCase>,
}

/// Pass A result: the declared args/tests, read before any binding happens.
pub struct ParsedArgsSpec {
    /// Declared arguments.
    pub args: Vec<ArgSpec>,
    /// Declared test cases.
    pub tests: Vec<TestCase>,
}

/// Pass A: parse `preamble_bytes` as plain YAML and extract `args`/`tests`.
pub fn parse_args_spec(preamble_bytes: &[u8]) -> Result<ParsedArgsSpec, TemplateErrorKind> {
    let parsed: PreambleArgsOnly = serde_yaml::from_slice(preamble_bytes)
        .map_err(|e| TemplateErrorKind::InvalidYaml(e.to_string()))?;
    Ok(ParsedArgsSpec {
        args: parsed.args,
        tests: parsed.tests,
    })
}

/// Pass B: render the full original document's bytes with bound args and
/// the current platform, returning the rendered bytes.
///
/// No step has run yet at load time, so `step_vars` is necessarily empty —
/// rather than render with an empty `step_vars` and have every
/// `{{ step_vars.* }}` expression fail as undefined, any such expression is
/// protected (swapped for an opaque sentinel) before rendering and restored
/// verbatim afterwards. It survives into the parsed [`crate::ttp::TtpDocument`]
/// as literal template text, re-rendered per step once real values exist —
/// see [`render_runtime_field`]. Control-flow directives (`{% if %}` etc.)
/// still resolve in this one whole-document pass, so which steps exist at
/// all is still decided once, at load time.
pub fn render_document(
    full_bytes: &[u8],
    args_bound: &BTreeMap<String, ArgValue>,
    platform: &Platform,
) -> Result<Vec<u8>, TemplateErrorKind> {
    let source =
        std::str::from_utf8(full_bytes).map_err(|e| TemplateErrorKind::Syntax(e.to_string()))?;

    let (protected_source, protected) = protect_step_var_expressions(source);

    let mut context = Context::new();
    let mut args_ctx = serde_json::Map::new();
    for (name, value) in args_bound {
        args_ctx.insert(name.clone(), arg_value_to_json(value));
    }
    context.insert("args", &args_ctx);
    context.insert(
        "platform",
        &serde_json::json!({
            "os": platform.os.map(|o| o.to_string()),
            "arch": platform.arch.map(|a| a.to_string()),
        }),
    );

    let mut tera = Tera::default();

    let rendered = tera
        .render_str(&protected_source, &context)
        .map_err(|e| classify_tera_error(&e))?;
    Ok(restore_step_var_expressions(&rendered, &protected).into_bytes())
}

/// Build the tera context used to re-render one step's templated fields
/// (see [`render_runtime_field`]) against the execution context's current
/// `args`/`step_vars`/`platform`.
#[must_use]
pub(crate) fn runtime_context(ctx: &ExecutionContext) -> Context {
    let mut context = Context::new();
    let mut args_ctx = serde_json::Map::new();
    for (name, value) in &ctx.args_bound {
        args_ctx.insert(name.clone(), arg_value_to_json(value));
    }
    context.insert("args", &args_ctx);
    context.insert("step_vars", &ctx.step_vars);
    context.insert(
        "platform",
        &serde_json::json!({
            "os": ctx.platform.os.map(|o| o.to_string()),
            "arch": ctx.platform.arch.map(|a| a.to_string()),
        }),
    );
    context
}

/// Render one already-loaded template fragment — a single step field —
/// against `context`. Unlike [`render_document`], nothing here needs
/// protecting: `context` carries real `step_vars`, so an undefined
/// reference at this point is a genuine runtime error (e.g. the producing
/// step was skipped).
pub(crate) fn render_runtime_field(
    source: &str,
    context: &Context,
) -> Result<String, TemplateErrorKind> {
    let mut tera = Tera::default();
    tera.render_str(source, context)
        .map_err(|e| classify_tera_error(&e))
}

/// Sentinel prefix swapped in for a protected `{{ ... step_vars.* ... }}`
/// expression; `\u{0}` keeps it from ever colliding with real YAML/template
/// text, and unique per occurrence so restoration doesn't need to re-parse
/// tera's own expression grammar.
const STEP_VAR_SENTINEL_PREFIX: &str = "\u{0}ttpforge-step-var-\u{0}";

fn protect_step_var_expressions(source: &str) -> (String, Vec<String>) {
    let re = step_var_expression_regex();
    let mut protected = Vec::new();
    let mut result = String::with_capacity(source.len());
    let mut last_end = 0;
    for m in re.find_iter(source) {
        result.push_str(&source[last_end..m.start()]);
        result.push_str(STEP_VAR_SENTINEL_PREFIX);
        result.push_str(&protected.len().to_string());
        result.push('\u{0}');
        protected.push(m.as_str().to_string());
        last_end = m.end();
    }
    result.push_str(&source[last_end..]);
    (result, protected)
}

fn restore_step_var_expressions(rendered: &str, protected: &[String]) -> String {
    let mut result = rendered.to_string();
    for (index, original) in protected.iter().enumerate() {
        let sentinel = format!("{STEP_VAR_SENTINEL_PREFIX}{index}\u{0}");
        result = result.replace(&sentinel, original);
    }
    result
}

fn step_var_expression_regex() -> regex::Regex {
    regex::Regex::new(r"\{\{[^{}]*?step_vars\.[A-Za-z_][A-Za-z0-9_]*[^{}]*?\}\}")
        .expect("static regex")
}

fn arg_value_to_json(value: &ArgValue) -> serde_json::Value {
    match value {
        ArgValue::String(s) => serde_json::Value::String(s.clone()),
        ArgValue::Int(i) => serde_json::Value::Number((*i).into()),
        ArgValue::Bool(b) => serde_json::Value::Bool(*b),
        ArgValue::Path(p) => serde_json::Value::String(p.display().to_string()),
    }
}

fn classify_tera_error(err: &tera::Error) -> TemplateErrorKind {
    let message = err.to_string();
    if message.contains("is undefined") || message.contains("not found in context") {
        TemplateErrorKind::UndefinedVariable(message)
    } else {
        TemplateErrorKind::Syntax(message)
    }
}

/// Scan `full_bytes` for `args.<name>` references, used by the validator to
/// flag declared-but-unreferenced args as warnings.
#[must_use]
pub fn referenced_arg_names(full_bytes: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(full_bytes);
    let re = regex::Regex::new(r"args\.([A-Za-z_][A-Za-z0-9_]*)").expect("static regex");
    re.captures_iter(&text)
        .map(|c| c[1].to_string())
        .collect()
}

/// Scan `full_bytes` for `step_vars.<name>` references, used by the
/// validator to check they're declared by an earlier step's `outputvar`.
#[must_use]
pub fn referenced_step_var_names(full_bytes: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(full_bytes);
    let re = regex::Regex::new(r"step_vars\.([A-Za-z_][A-Za-z0-9_]*)").expect("static regex");
    re.captures_iter(&text)
        .map(|c| c[1].to_string())
        .collect()
}

/// Splits `full_bytes` via [`preprocess`] purely to expose a convenience
/// entry point mirroring the loader's own two-pass flow, for callers (the
/// validator) that only need Pass A without loading a whole document.
pub fn parse_args_spec_from_full_document(
    full_bytes: &[u8],
) -> Result<ParsedArgsSpec, crate::error::TtpForgeError> {
    let split = preprocess(full_bytes)?;
    Ok(parse_args_spec(split.preamble_bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_a_extracts_args_and_tests() {
        let preamble = b"api_version: \"2.0\"\nargs:\n  - name: p\n    type: string\ntests:\n  - name: t1\n";
        let parsed = parse_args_spec(preamble).unwrap();
        assert_eq!(parsed.args.len(), 1);
        assert_eq!(parsed.tests.len(), 1);
    }

    #[test]
    fn pass_b_substitutes_bound_args() {
        let mut args = BTreeMap::new();
        args.insert("name".to_string(), ArgValue::String("world".to_string()));
        let rendered = render_document(
            b"greeting: \"hello {{ args.name }}\"\n",
            &args,
            &Platform::default(),
        )
        .unwrap();
        assert_eq!(rendered, b"greeting: \"hello world\"\n");
    }

    #[test]
    fn pass_b_reports_undefined_variable() {
        let err = render_document(
            b"x: \"{{ args.missing }}\"\n",
            &BTreeMap::new(),
            &Platform::default(),
        )
        .unwrap_err();
        assert!(matches!(err, TemplateErrorKind::UndefinedVariable(_)));
    }

    #[test]
    fn pass_b_leaves_step_var_expressions_for_runtime_rerender() {
        let rendered = render_document(
            b"greeting: \"hello {{ step_vars.earlier.name }}\"\n",
            &BTreeMap::new(),
            &Platform::default(),
        )
        .unwrap();
        assert_eq!(
            rendered,
            b"greeting: \"hello {{ step_vars.earlier.name }}\"\n"
        );
    }

    #[test]
    fn pass_b_renders_args_around_a_protected_step_var_expression() {
        let mut args = BTreeMap::new();
        args.insert("label".to_string(), ArgValue::String("x".to_string()));
        let rendered = render_document(
            b"greeting: \"{{ args.label }}: {{ step_vars.earlier.name }}\"\n",
            &args,
            &Platform::default(),
        )
        .unwrap();
        assert_eq!(
            rendered,
            b"greeting: \"x: {{ step_vars.earlier.name }}\"\n"
        );
    }

    #[test]
    fn referenced_arg_names_finds_all_occurrences() {
        let text = b"a: {{ args.foo }}\nb: {{ args.bar }}\nc: {{ args.foo }}\n";
        let mut names = referenced_arg_names(text);
        names.sort();
        names.dedup();
        assert_eq!(names, vec!["bar".to_string(), "foo".to_string()]);
    }
}
