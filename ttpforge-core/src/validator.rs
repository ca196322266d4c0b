//! Static structural validation of a loaded [`TtpDocument`].

use std::collections::HashSet;

use uuid::Uuid;

use crate::{
    action::ValidationContext,
    checks::validate_condition,
    error::ValidationErrorKind,
    template::{referenced_arg_names, referenced_step_var_names},
    ttp::TtpDocument,
};

/// Severity of a single [`ValidationMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Blocks `validate`/`run` from succeeding.
    Error,
    /// Reported but non-blocking.
    Warning,
    /// Purely informational.
    Info,
}

/// One validator finding.
#[derive(Debug, Clone)]
pub struct ValidationMessage {
    /// How serious this finding is.
    pub severity: Severity,
    /// Human-readable description.
    pub message: String,
}

/// The full result of [`Validator::check`].
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    /// All findings in the order they were discovered.
    pub messages: Vec<ValidationMessage>,
}

impl ValidationReport {
    /// True if any finding is [`Severity::Error`].
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.messages.iter().any(|m| m.severity == Severity::Error)
    }

    fn error(&mut self, message: impl Into<String>) {
        self.messages.push(ValidationMessage {
            severity: Severity::Error,
            message: message.into(),
        });
    }

    fn warning(&mut self, message: impl Into<String>) {
        self.messages.push(ValidationMessage {
            severity: Severity::Warning,
            message: message.into(),
        });
    }
}

/// Runs every static check from the validator's bullet list against a
/// loaded [`TtpDocument`] and the raw, pre-render bytes it came from.
#[derive(Debug, Default)]
pub struct Validator;

impl Validator {
    /// Check `doc`, whose original (pre-render) source bytes are
    /// `source_bytes` (used for the arg/step-var reference scan). The scan
    /// must run against unrendered text: a successfully rendered
    /// `{{ args.* }}`/`{{ step_vars.* }}` reference is already substituted
    /// away by render time, so scanning rendered output would silently miss
    /// every reference that actually resolved.
    #[must_use]
    pub fn check(&self, doc: &TtpDocument, source_bytes: &[u8]) -> ValidationReport {
        let mut report = ValidationReport::default();

        if doc.preamble.api_version != "2.0" {
            report.error(format!(
                "api_version `{}` is not supported (expected \"2.0\")",
                doc.preamble.api_version
            ));
        }
        if Uuid::parse_str(&doc.preamble.uuid)
            .map(|u| u.get_version_num() != 4)
            .unwrap_or(true)
        {
            report.error(ValidationErrorKind::InvalidUuid(doc.preamble.uuid.clone()).to_string());
        }

        if let Some(requirements) = &doc.preamble.requirements {
            for platform in &requirements.platforms {
                if platform.os.is_none() && platform.arch.is_none() {
                    report.error(ValidationErrorKind::EmptyPlatformSpec.to_string());
                }
            }
        }

        let mut seen_names = HashSet::new();
        let mut declared_outputvars = HashSet::new();
        let vctx = ValidationContext {
            declared_args: doc.preamble.args.iter().map(|a| a.name.clone()).collect(),
        };

        for (index, step) in doc.steps.iter().enumerate() {
            if step.name.is_empty() {
                report.error(ValidationErrorKind::StepMissingName(index).to_string());
            } else if !seen_names.insert(step.name.clone()) {
                report.error(ValidationErrorKind::DuplicateStepName(step.name.clone()).to_string());
            }

            if let Err(e) = step.action.validate(&vctx) {
                report.error(e.to_string());
            }

            if let Some(condition) = &step.condition {
                if let Err(e) = validate_condition(condition, &step.name) {
                    report.error(e.to_string());
                }
            }

            if let Some(outputvar) = &step.outputvar {
                if !declared_outputvars.insert(outputvar.clone()) {
                    report.error(ValidationErrorKind::DuplicateOutputVar(outputvar.clone()).to_string());
                }
            }
        }

        for arg in &doc.preamble.args {
            if !is_valid_identifier(&arg.name) {
                report.error(ValidationErrorKind::InvalidArgName(arg.name.clone()).to_string());
            }
            if let Some(default) = &arg.default {
                if !arg.choices.is_empty() && !arg.choices.contains(default) {
                    report.error(ValidationErrorKind::DefaultNotInChoices(arg.name.clone()).to_string());
                }
            }
        }

        let declared_arg_names: HashSet<&str> =
            doc.preamble.args.iter().map(|a| a.name.as_str()).collect();
        let referenced_args: HashSet<String> = referenced_arg_names(source_bytes).into_iter().collect();
        for name in &referenced_args {
            if !declared_arg_names.contains(name.as_str()) {
                report.error(format!("references undeclared arg `{name}`"));
            }
        }
        for arg in &doc.preamble.args {
            if !referenced_args.contains(&arg.name) {
                report.warning(format!("declared arg `{}` is never referenced", arg.name));
            }
        }

        for name in referenced_step_var_names(source_bytes) {
            if !declared_outputvars.contains(&name) {
                report.error(format!(
                    "references step_vars.{name} which no earlier step declares as its outputvar"
                ));
            }
        }

        report
    }
}

fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> TtpDocument {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn undeclared_arg_reference_is_an_error() {
        let yaml = "api_version: \"2.0\"\nuuid: 11111111-1111-4111-8111-111111111111\nname: t\nsteps:\n  - name: s\n    inline: \"echo {{ args.missing }}\"\n";
        let doc = parse(yaml);
        let report = Validator.check(&doc, yaml.as_bytes());
        assert!(report.has_errors());
    }

    #[test]
    fn unreferenced_declared_arg_is_a_warning_not_an_error() {
        let yaml = "api_version: \"2.0\"\nuuid: 11111111-1111-4111-8111-111111111111\nname: t\nargs:\n  - name: unused\n    type: string\n    default: x\nsteps:\n  - name: s\n    inline: \"echo hi\"\n";
        let doc = parse(yaml);
        let report = Validator.check(&doc, yaml.as_bytes());
        assert!(!report.has_errors());
        assert!(report
            .messages
            .iter()
            .any(|m| m.severity == Severity::Warning));
    }

    #[test]
    fn duplicate_step_names_are_an_error() {
        let yaml = "api_version: \"2.0\"\nuuid: 11111111-1111-4111-8111-111111111111\nname: t\nsteps:\n  - name: s\n    inline: \"echo a\"\n  - name: s\n    inline: \"echo b\"\n";
        let doc = parse(yaml);
        let report = Validator.check(&doc, yaml.as_bytes());
        assert!(report.has_errors());
    }

    #[test]
    fn invalid_uuid_is_an_error() {
        let yaml = "api_version: \"2.0\"\nuuid: not-a-uuid\nname: t\nsteps:\n  - name: s\n    inline: \"echo hi\"\n";
        let doc = parse(yaml);
        let report = Validator.check(&doc, yaml.as_bytes());
        assert!(report.has_errors());
    }
}
