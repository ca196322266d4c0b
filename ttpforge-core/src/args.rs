//! Argument binder: CLI overrides + defaults, typed coercion, `path`
//! resolution, and `choices` enforcement.

use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
};

use crate::{
    error::{ArgErrorKind, TtpForgeResult},
    ttp::{ArgKind, ArgSpec},
};

/// A bound, typed argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    /// `type: string`
    String(String),
    /// `type: int`
    Int(i64),
    /// `type: bool`
    Bool(bool),
    /// `type: path`, always absolute after binding.
    Path(PathBuf),
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Int(i) => write!(f, "{i}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Path(p) => write!(f, "{}", p.display()),
        }
    }
}

/// Binds CLI `--arg k=v` overrides and `ArgSpec` defaults into typed values.
#[derive(Debug, Default)]
pub struct ArgBinder;

impl ArgBinder {
    /// Bind `specs` against `cli_args`, resolving `type: path` values
    /// against `invocation_cwd`.
    ///
    /// # Errors
    ///
    /// * [`ArgErrorKind::UndeclaredArg`] if a `--arg` key has no matching spec.
    /// * [`ArgErrorKind::InvalidInt`] / [`ArgErrorKind::InvalidBool`] on coercion failure.
    /// * [`ArgErrorKind::NotInChoices`] if the bound value isn't declared.
    /// * [`ArgErrorKind::MissingRequired`] if no value and no default exist.
    pub fn bind(
        specs: &[ArgSpec],
        cli_args: &BTreeMap<String, String>,
        invocation_cwd: &Path,
    ) -> TtpForgeResult<BTreeMap<String, ArgValue>> {
        let known: std::collections::HashSet<&str> =
            specs.iter().map(|s| s.name.as_str()).collect();
        for key in cli_args.keys() {
            if !known.contains(key.as_str()) {
                return Err(ArgErrorKind::UndeclaredArg(key.clone()).into());
            }
        }

        let mut bound = BTreeMap::new();
        for spec in specs {
            let raw = cli_args
                .get(&spec.name)
                .or(spec.default.as_ref())
                .ok_or_else(|| ArgErrorKind::MissingRequired(spec.name.clone()))?;

            if !spec.choices.is_empty() && !spec.choices.contains(raw) {
                return Err(ArgErrorKind::NotInChoices(
                    raw.clone(),
                    spec.name.clone(),
                    spec.choices.clone(),
                )
                .into());
            }

            let value = match spec.kind {
                ArgKind::String => ArgValue::String(raw.clone()),
                ArgKind::Int => {
                    let n = raw
                        .parse::<i64>()
                        .map_err(|e| ArgErrorKind::InvalidInt(raw.clone(), e.to_string()))?;
                    ArgValue::Int(n)
                }
                ArgKind::Bool => {
                    let b = match raw.to_ascii_lowercase().as_str() {
                        "true" | "1" => true,
                        "false" | "0" => false,
                        _ => {
                            return Err(ArgErrorKind::InvalidBool(
                                raw.clone(),
                                "expected true|false|1|0".to_string(),
                            )
                            .into())
                        }
                    };
                    ArgValue::Bool(b)
                }
                ArgKind::Path => {
                    let p = PathBuf::from(raw);
                    let abs = if p.is_absolute() {
                        p
                    } else {
                        invocation_cwd.join(p)
                    };
                    ArgValue::Path(abs)
                }
            };
            bound.insert(spec.name.clone(), value);
        }
        Ok(bound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ttp::ArgSpec;

    fn spec(name: &str, kind: ArgKind, default: Option<&str>) -> ArgSpec {
        ArgSpec {
            name: name.to_string(),
            description: None,
            kind,
            default: default.map(str::to_string),
            choices: Vec::new(),
        }
    }

    #[test]
    fn path_is_resolved_against_invocation_cwd_not_cli_cwd() {
        let specs = vec![spec("p", ArgKind::Path, None)];
        let mut cli = BTreeMap::new();
        cli.insert("p".to_string(), "f.txt".to_string());
        let bound = ArgBinder::bind(&specs, &cli, Path::new("/tmp/wd")).unwrap();
        assert_eq!(
            bound.get("p"),
            Some(&ArgValue::Path(PathBuf::from("/tmp/wd/f.txt")))
        );
    }

    #[test]
    fn unknown_cli_arg_is_an_error() {
        let specs = vec![spec("a", ArgKind::String, Some("x"))];
        let mut cli = BTreeMap::new();
        cli.insert("b".to_string(), "y".to_string());
        assert!(ArgBinder::bind(&specs, &cli, Path::new("/")).is_err());
    }

    #[test]
    fn cli_value_overrides_default() {
        let specs = vec![spec("a", ArgKind::String, Some("default"))];
        let mut cli = BTreeMap::new();
        cli.insert("a".to_string(), "override".to_string());
        let bound = ArgBinder::bind(&specs, &cli, Path::new("/")).unwrap();
        assert_eq!(bound.get("a"), Some(&ArgValue::String("override".into())));
    }

    #[test]
    fn bool_accepts_numeric_and_word_forms_case_insensitively() {
        let specs = vec![spec("b", ArgKind::Bool, None)];
        for (raw, expected) in [("TRUE", true), ("0", false), ("1", true), ("false", false)] {
            let mut cli = BTreeMap::new();
            cli.insert("b".to_string(), raw.to_string());
            let bound = ArgBinder::bind(&specs, &cli, Path::new("/")).unwrap();
            assert_eq!(bound.get("b"), Some(&ArgValue::Bool(expected)));
        }
    }

    #[test]
    fn choices_reject_out_of_set_values() {
        let mut spec = spec("c", ArgKind::String, None);
        spec.choices = vec!["a".into(), "b".into()];
        let specs = vec![spec];
        let mut cli = BTreeMap::new();
        cli.insert("c".to_string(), "z".to_string());
        assert!(ArgBinder::bind(&specs, &cli, Path::new("/")).is_err());
    }
}
