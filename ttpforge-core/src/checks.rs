//! Checks sub-language: declarative conditions used by step `if`s and
//! `requirements`.

use std::path::PathBuf;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    context::ExecutionContext,
    error::{ConditionErrorKind, TtpForgeResult, ValidationErrorKind},
};

/// A named, human-readable predicate: either a path check or a command check.
#[derive(Debug, Clone, Serialize)]
pub struct Condition {
    /// Message shown when the condition fails.
    pub msg: String,
    /// Which variant this condition carries.
    pub kind: ConditionKind,
}

/// The mutually-exclusive variants a [`Condition`] can carry.
#[derive(Debug, Clone, Serialize)]
pub enum ConditionKind {
    /// Checks properties of a filesystem path.
    PathExists(PathExistsCheck),
    /// Runs a command and checks its exit code/output.
    Command(CommandCheck),
}

/// `path_exists` variant fields.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "snake_case")]
pub struct PathExistsCheck {
    /// Path that must exist.
    pub path_exists: String,
    /// Expected sha256 checksum of the file's contents.
    pub checksum: Option<ChecksumSpec>,
    /// Substring that must appear in the file's contents.
    pub content_contains: Option<String>,
    /// Substring that must not appear in the file's contents.
    pub content_not_contains: Option<String>,
    /// Regex the file's contents must match.
    pub content_regex: Option<String>,
    /// Expected unix permission bits, as an octal string (e.g. `"0644"`).
    pub permissions: Option<String>,
}

/// `checksum` sub-block of [`PathExistsCheck`].
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChecksumSpec {
    /// Expected hex-encoded sha256 digest, compared case-insensitively.
    pub sha256: String,
}

/// `command` variant fields.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "snake_case")]
pub struct CommandCheck {
    /// Command line to run through the platform shell.
    pub command: String,
    /// Exit code the command must return.
    pub expect_exit_code: Option<i32>,
    /// Substring that must appear in combined stdout+stderr.
    pub output_contains: Option<String>,
    /// Substring that must not appear in combined stdout+stderr.
    pub output_not_contains: Option<String>,
    /// Regex the combined output must match.
    pub output_regex: Option<String>,
}

impl<'de> Deserialize<'de> for Condition {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(default)]
            msg: String,
            #[serde(default)]
            path_exists: Option<String>,
            #[serde(default)]
            checksum: Option<ChecksumSpec>,
            #[serde(default)]
            content_contains: Option<String>,
            #[serde(default)]
            content_not_contains: Option<String>,
            #[serde(default)]
            content_regex: Option<String>,
            #[serde(default)]
            permissions: Option<String>,
            #[serde(default)]
            command: Option<String>,
            #[serde(default)]
            expect_exit_code: Option<i32>,
            #[serde(default)]
            output_contains: Option<String>,
            #[serde(default)]
            output_not_contains: Option<String>,
            #[serde(default)]
            output_regex: Option<String>,
        }

        let raw = Raw::deserialize(deserializer)?;
        let has_path = raw.path_exists.is_some();
        let has_command = raw.command.is_some();
        match (has_path, has_command) {
            (true, false) => Ok(Self {
                msg: raw.msg,
                kind: ConditionKind::PathExists(PathExistsCheck {
                    path_exists: raw.path_exists.unwrap(),
                    checksum: raw.checksum,
                    content_contains: raw.content_contains,
                    content_not_contains: raw.content_not_contains,
                    content_regex: raw.content_regex,
                    permissions: raw.permissions,
                }),
            }),
            (false, true) => Ok(Self {
                msg: raw.msg,
                kind: ConditionKind::Command(CommandCheck {
                    command: raw.command.unwrap(),
                    expect_exit_code: raw.expect_exit_code,
                    output_contains: raw.output_contains,
                    output_not_contains: raw.output_not_contains,
                    output_regex: raw.output_regex,
                }),
            }),
            (true, true) => Err(serde::de::Error::custom(
                "ambiguous type: condition declares both path_exists and command",
            )),
            (false, false) => Err(serde::de::Error::custom(
                "condition declares neither path_exists nor command",
            )),
        }
    }
}

impl Condition {
    /// Evaluate this condition against the given context, returning the
    /// [`ConditionErrorKind::Failed`] with `self.msg` if it does not hold.
    pub fn verify(&self, ctx: &ExecutionContext) -> TtpForgeResult<()> {
        let ok = match &self.kind {
            ConditionKind::PathExists(c) => verify_path_exists(c, ctx)?,
            ConditionKind::Command(c) => verify_command(c, ctx)?,
        };
        if ok {
            Ok(())
        } else {
            Err(ConditionErrorKind::Failed(self.msg.clone()).into())
        }
    }
}

fn verify_path_exists(check: &PathExistsCheck, ctx: &ExecutionContext) -> TtpForgeResult<bool> {
    let path = PathBuf::from(&check.path_exists);
    if !ctx.fs.exists(&path) {
        return Ok(false);
    }
    if check.checksum.is_none()
        && check.content_contains.is_none()
        && check.content_not_contains.is_none()
        && check.content_regex.is_none()
        && check.permissions.is_none()
    {
        return Ok(true);
    }
    let meta = ctx
        .fs
        .metadata(&path)
        .map_err(|e| ConditionErrorKind::EvaluationFailed(e.to_string()))?;
    if !meta.is_file {
        return Ok(check.checksum.is_none()
            && check.content_contains.is_none()
            && check.content_not_contains.is_none()
            && check.content_regex.is_none());
    }
    let contents = ctx
        .fs
        .read_file(&path)
        .map_err(|e| ConditionErrorKind::EvaluationFailed(e.to_string()))?;

    if let Some(checksum) = &check.checksum {
        let digest = format!("{:x}", Sha256::digest(&contents));
        if !digest.eq_ignore_ascii_case(&checksum.sha256) {
            return Ok(false);
        }
    }
    let text = String::from_utf8_lossy(&contents);
    if let Some(needle) = &check.content_contains {
        if !text.contains(needle.as_str()) {
            return Ok(false);
        }
    }
    if let Some(needle) = &check.content_not_contains {
        if text.contains(needle.as_str()) {
            return Ok(false);
        }
    }
    if let Some(pattern) = &check.content_regex {
        let re = Regex::new(pattern)
            .map_err(|e| ConditionErrorKind::EvaluationFailed(e.to_string()))?;
        if !re.is_match(&text) {
            return Ok(false);
        }
    }
    if let Some(expected) = &check.permissions {
        let expected_mode =
            u32::from_str_radix(expected.trim_start_matches("0o"), 8).map_err(|e| {
                ConditionErrorKind::EvaluationFailed(format!("invalid permissions {expected}: {e}"))
            })?;
        if meta.mode != Some(expected_mode) {
            return Ok(false);
        }
    }
    Ok(true)
}

fn verify_command(check: &CommandCheck, ctx: &ExecutionContext) -> TtpForgeResult<bool> {
    let output = crate::process::run_capture(&check.command, ctx)
        .map_err(|e| ConditionErrorKind::EvaluationFailed(e.to_string()))?;

    if let Some(expect) = check.expect_exit_code {
        if output.exit_code != expect {
            return Ok(false);
        }
    }
    let combined = format!("{}{}", output.stdout, output.stderr);
    if let Some(needle) = &check.output_contains {
        if !combined.contains(needle.as_str()) {
            return Ok(false);
        }
    }
    if let Some(needle) = &check.output_not_contains {
        if combined.contains(needle.as_str()) {
            return Ok(false);
        }
    }
    if let Some(pattern) = &check.output_regex {
        let re = Regex::new(pattern)
            .map_err(|e| ConditionErrorKind::EvaluationFailed(e.to_string()))?;
        if !re.is_match(&combined) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Validate a condition's own shape (currently: regex fields compile).
pub fn validate_condition(cond: &Condition, step_name: &str) -> Result<(), ValidationErrorKind> {
    let pattern = match &cond.kind {
        ConditionKind::PathExists(c) => c.content_regex.as_deref(),
        ConditionKind::Command(c) => c.output_regex.as_deref(),
    };
    if let Some(pattern) = pattern {
        if Regex::new(pattern).is_err() {
            return Err(ValidationErrorKind::AmbiguousConditionType(
                step_name.to_string(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_both_variants_present() {
        let yaml = "msg: m\npath_exists: /tmp/x\ncommand: echo hi\n";
        let err = serde_yaml::from_str::<Condition>(yaml).unwrap_err();
        assert!(err.to_string().contains("ambiguous"));
    }

    #[test]
    fn rejects_neither_variant_present() {
        let yaml = "msg: m\n";
        assert!(serde_yaml::from_str::<Condition>(yaml).is_err());
    }

    #[test]
    fn parses_path_exists_variant() {
        let yaml = "msg: exists\npath_exists: /tmp/x\ncontent_contains: hi\n";
        let cond: Condition = serde_yaml::from_str(yaml).unwrap();
        match cond.kind {
            ConditionKind::PathExists(c) => {
                assert_eq!(c.path_exists, "/tmp/x");
                assert_eq!(c.content_contains.as_deref(), Some("hi"));
            }
            ConditionKind::Command(_) => panic!("wrong variant"),
        }
    }
}
