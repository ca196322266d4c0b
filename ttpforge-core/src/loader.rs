//! Ties the preprocessor, argument binder, and template renderer together
//! to turn raw TTP bytes into a fully bound [`TtpDocument`].

use std::{collections::BTreeMap, path::Path};

use crate::{
    args::{ArgBinder, ArgValue},
    error::{TemplateErrorKind, TtpForgeResult},
    platform::Platform,
    preprocess::preprocess,
    template::{parse_args_spec, render_document},
    ttp::TtpDocument,
};

/// Load and fully render a TTP from raw bytes: preprocess, parse the
/// preamble's arg spec, bind `cli_args`, render the whole document, then
/// parse the rendered result as a [`TtpDocument`].
pub fn load_ttp_bytes(
    bytes: &[u8],
    cli_args: &BTreeMap<String, String>,
    invocation_cwd: &Path,
    platform: &Platform,
) -> TtpForgeResult<(TtpDocument, BTreeMap<String, ArgValue>)> {
    let split = preprocess(bytes)?;
    let spec = parse_args_spec(split.preamble_bytes)?;
    let bound = ArgBinder::bind(&spec.args, cli_args, invocation_cwd)?;
    let rendered = render_document(bytes, &bound, platform)?;
    let doc: TtpDocument = serde_yaml::from_slice(&rendered)
        .map_err(|e| TemplateErrorKind::InvalidYaml(e.to_string()))?;
    Ok((doc, bound))
}

/// Load a TTP from a file on disk.
pub fn load_ttp_file(
    fs: &dyn crate::filesystem::Filesystem,
    path: &Path,
    cli_args: &BTreeMap<String, String>,
    invocation_cwd: &Path,
    platform: &Platform,
) -> TtpForgeResult<(TtpDocument, BTreeMap<String, ArgValue>)> {
    let bytes = fs.read_file(path)?;
    load_ttp_bytes(&bytes, cli_args, invocation_cwd, platform)
}

/// Like [`load_ttp_bytes`], but also returns the original, pre-render
/// document bytes: the validator's arg/`step_vars` reference scan runs a
/// regex over this raw text rather than the rendered output, since a
/// successfully rendered `{{ args.* }}` reference is already substituted
/// away by the time rendering finishes and would never be found there.
pub fn render_ttp_bytes(
    bytes: &[u8],
    cli_args: &BTreeMap<String, String>,
    invocation_cwd: &Path,
    platform: &Platform,
) -> TtpForgeResult<(TtpDocument, BTreeMap<String, ArgValue>, Vec<u8>)> {
    let split = preprocess(bytes)?;
    let spec = parse_args_spec(split.preamble_bytes)?;
    let bound = ArgBinder::bind(&spec.args, cli_args, invocation_cwd)?;
    let rendered = render_document(bytes, &bound, platform)?;
    let doc: TtpDocument = serde_yaml::from_slice(&rendered)
        .map_err(|e| TemplateErrorKind::InvalidYaml(e.to_string()))?;
    Ok((doc, bound, bytes.to_vec()))
}

/// File-on-disk counterpart to [`render_ttp_bytes`].
pub fn render_ttp_file(
    fs: &dyn crate::filesystem::Filesystem,
    path: &Path,
    cli_args: &BTreeMap<String, String>,
    invocation_cwd: &Path,
    platform: &Platform,
) -> TtpForgeResult<(TtpDocument, BTreeMap<String, ArgValue>, Vec<u8>)> {
    let bytes = fs.read_file(path)?;
    render_ttp_bytes(&bytes, cli_args, invocation_cwd, platform)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_and_binds_a_minimal_ttp() {
        let doc_bytes = b"api_version: \"2.0\"\nuuid: 11111111-1111-4111-8111-111111111111\nname: t\nargs:\n  - name: greeting\n    type: string\n    default: hi\nsteps:\n  - name: s1\n    inline: \"echo {{ args.greeting }}\"\n";
        let (doc, bound) = load_ttp_bytes(
            doc_bytes,
            &BTreeMap::new(),
            Path::new("/tmp"),
            &Platform::default(),
        )
        .unwrap();
        assert_eq!(doc.preamble.name, "t");
        assert_eq!(doc.steps.len(), 1);
        assert_eq!(
            bound.get("greeting"),
            Some(&ArgValue::String("hi".to_string()))
        );
    }
}
