//! The TTP document model: preamble metadata plus an ordered step list.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{action::Action, checks::Condition, platform::Platform};

/// Declared type of an [`ArgSpec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgKind {
    /// Raw string, used verbatim.
    String,
    /// Parsed as a signed decimal integer.
    Int,
    /// Parsed case-insensitively from `true|false|1|0`.
    Bool,
    /// Resolved to an absolute path against the invocation working
    /// directory at bind time.
    Path,
}

/// One declared argument of a TTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArgSpec {
    /// Argument name; must match `[A-Za-z_][A-Za-z0-9_]*`.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: Option<String>,
    /// Declared type, used for coercion at bind time.
    #[serde(rename = "type")]
    pub kind: ArgKind,
    /// Default value used when no `--arg` override is given.
    #[serde(default)]
    pub default: Option<String>,
    /// If non-empty, the bound value must be one of these.
    #[serde(default)]
    pub choices: Vec<String>,
}

/// `requirements.platforms[]` entry plus the `superuser` flag.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Requirements {
    /// Compatible platforms; the TTP is skipped if none match the runtime.
    #[serde(default)]
    pub platforms: Vec<Platform>,
    /// If true, the TTP is skipped when not run with elevated privileges.
    #[serde(default)]
    pub superuser: bool,
}

/// MITRE ATT&CK metadata, carried through for reporting but not evaluated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Mitre {
    /// Tactic identifiers/names.
    #[serde(default)]
    pub tactics: Vec<String>,
    /// Technique identifiers/names.
    #[serde(default)]
    pub techniques: Vec<String>,
    /// Sub-technique identifiers/names.
    #[serde(default)]
    pub subtechniques: Vec<String>,
}

/// One declared entry of `preamble.tests`, consumed by the `test` subcommand.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestCase {
    /// Name of the test case, for reporting.
    pub name: String,
    /// `--arg k=v` values to bind for this case.
    #[serde(default)]
    pub args: BTreeMap<String, String>,
    /// Whether to run this case in dry-run mode.
    #[serde(default)]
    pub dry_run: bool,
    /// Expected stdout, compared verbatim when present.
    #[serde(default)]
    pub expected_stdout: Option<String>,
    /// Per-case timeout override; the `test` subcommand default is 10s.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

/// Metadata preceding the `steps:` list.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Preamble {
    /// Must be `"2.0"`.
    pub api_version: String,
    /// RFC-4122 v4 UUID string identifying this TTP.
    pub uuid: String,
    /// Display name.
    pub name: String,
    /// Longer description.
    #[serde(default)]
    pub description: String,
    /// Author names.
    #[serde(default)]
    pub authors: Vec<String>,
    /// Platform/privilege requirements.
    #[serde(default)]
    pub requirements: Option<Requirements>,
    /// MITRE ATT&CK metadata.
    #[serde(default)]
    pub mitre: Option<Mitre>,
    /// Declared arguments.
    #[serde(default)]
    pub args: Vec<ArgSpec>,
    /// Declared test cases.
    #[serde(default)]
    pub tests: Vec<TestCase>,
}

/// One step of the `steps:` list.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Step {
    /// Step name; unique within the TTP.
    pub name: String,
    /// The action this step dispatches to.
    #[serde(flatten)]
    pub action: Action,
    /// Precondition; if it evaluates false the step is skipped.
    #[serde(default)]
    pub condition: Option<Condition>,
    /// Shell-style guard expression (`{{ ... }}` rendered boolean-ish string).
    #[serde(rename = "if", default)]
    pub if_expr: Option<String>,
    /// Name under which this step's output is exposed to later steps.
    #[serde(default)]
    pub outputvar: Option<String>,
    /// Cleanup step, run LIFO relative to other successful steps.
    ///
    /// Nesting is one level deep: a cleanup step's own `cleanup` field is
    /// ignored if present.
    #[serde(default)]
    pub cleanup: Option<Box<Step>>,
    /// Directory to change into (resolved, arg-bindable) before running.
    #[serde(default)]
    pub chdir: Option<String>,
    /// Extra environment variables for this step's sub-process, if any.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Output of running one step's action.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepOutput {
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Process exit code, or 0 for actions with no subprocess.
    pub exit_code: i32,
    /// Stdout parsed as JSON, when it parses cleanly.
    #[serde(default)]
    pub parsed_json: Option<Value>,
    /// Captured error message, when the action failed.
    #[serde(default)]
    pub error: Option<String>,
}

impl StepOutput {
    /// The value later steps see via `StepVars.<outputvar>`: the parsed JSON
    /// value if stdout parsed cleanly, otherwise `{"output": stdout}`.
    #[must_use]
    pub fn as_step_var(&self) -> Value {
        self.parsed_json.clone().unwrap_or_else(|| {
            let mut map = serde_json::Map::new();
            map.insert("output".to_string(), Value::String(self.stdout.clone()));
            Value::Object(map)
        })
    }

    /// A synthetic, side-effect-free output used by dry-run execution.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }
}

/// A fully loaded TTP: preamble metadata plus its ordered steps.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TtpDocument {
    /// Preamble metadata.
    #[serde(flatten)]
    pub preamble: Preamble,
    /// Ordered, uniquely named steps.
    pub steps: Vec<Step>,
}
