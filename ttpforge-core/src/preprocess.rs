//! Splits a raw TTP document into its preamble and steps byte ranges
//! without a full YAML parse, so steps can be templated before parsing.

use crate::error::PreprocessErrorKind;

/// Result of [`preprocess`]: the raw bytes before and including `steps:`.
pub struct PreprocessedTtp<'a> {
    /// Everything before the `steps:` line.
    pub preamble_bytes: &'a [u8],
    /// The `steps:` line onward, to end of document.
    pub steps_bytes: &'a [u8],
}

/// Locate the single, line-anchored top-level `steps:` key and split the
/// document there.
///
/// # Errors
///
/// * [`PreprocessErrorKind::MissingSteps`] if no such line exists.
/// * [`PreprocessErrorKind::DuplicateSteps`] if it appears more than once.
/// * [`PreprocessErrorKind::KeyAfterSteps`] if a top-level key follows it.
pub fn preprocess(bytes: &[u8]) -> Result<PreprocessedTtp<'_>, PreprocessErrorKind> {
    let text = std::str::from_utf8(bytes).map_err(|_| PreprocessErrorKind::MissingSteps)?;

    let mut steps_line_start: Option<usize> = None;
    let mut offset = 0usize;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_end_matches(['\n', '\r']);
        if is_top_level_key_line(trimmed, "steps") {
            if steps_line_start.is_some() {
                return Err(PreprocessErrorKind::DuplicateSteps);
            }
            steps_line_start = Some(offset);
        } else if steps_line_start.is_some() && is_top_level_key_line(trimmed, "") {
            return Err(PreprocessErrorKind::KeyAfterSteps);
        }
        offset += line.len();
    }

    let split_at = steps_line_start.ok_or(PreprocessErrorKind::MissingSteps)?;
    Ok(PreprocessedTtp {
        preamble_bytes: &bytes[..split_at],
        steps_bytes: &bytes[split_at..],
    })
}

/// True if `line` is a top-level (zero-indent) `key:` line. When `key` is
/// empty, matches any top-level key line.
fn is_top_level_key_line(line: &str, key: &str) -> bool {
    if line.starts_with(char::is_whitespace) || line.trim().is_empty() || line.trim_start().starts_with('#') {
        return false;
    }
    let Some((candidate, _rest)) = line.split_once(':') else {
        return false;
    };
    if key.is_empty() {
        true
    } else {
        candidate == key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_preamble_from_steps() {
        let doc = b"api_version: \"2.0\"\nname: x\nsteps:\n  - name: s\n    inline: echo hi\n";
        let split = preprocess(doc).unwrap();
        assert_eq!(split.preamble_bytes, b"api_version: \"2.0\"\nname: x\n");
        assert!(split.steps_bytes.starts_with(b"steps:"));
    }

    #[test]
    fn missing_steps_key_errors() {
        let doc = b"api_version: \"2.0\"\nname: x\n";
        assert!(matches!(
            preprocess(doc).unwrap_err(),
            PreprocessErrorKind::MissingSteps
        ));
    }

    #[test]
    fn duplicate_steps_key_errors() {
        let doc = b"steps:\n  - a\nsteps:\n  - b\n";
        assert!(matches!(
            preprocess(doc).unwrap_err(),
            PreprocessErrorKind::DuplicateSteps
        ));
    }

    #[test]
    fn key_after_steps_errors() {
        let doc = b"steps:\n  - name: s\n    inline: echo hi\nname: x\n";
        assert!(matches!(
            preprocess(doc).unwrap_err(),
            PreprocessErrorKind::KeyAfterSteps
        ));
    }

    #[test]
    fn nested_keys_inside_steps_are_not_mistaken_for_top_level() {
        let doc = b"name: x\nsteps:\n  - name: s\n    inline: echo hi\n    cleanup:\n      name: c\n      inline: echo bye\n";
        let split = preprocess(doc).unwrap();
        assert_eq!(split.preamble_bytes, b"name: x\n");
    }
}
