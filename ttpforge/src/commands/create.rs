use anyhow::{anyhow, Context, Result};
use log::info;
use uuid::Uuid;

use crate::cli::CreateTarget;
use crate::config::Runtime;

const TEMPLATE: &str = r#"api_version: "2.0"
uuid: "{uuid}"
name: "{name}"
description: "TODO: describe what this TTP does"
authors:
  - TODO
args:
  - name: example
    type: string
    default: "hello"
steps:
  - name: say-hello
    inline: "echo {{{{ args.example }}}}"
"#;

pub fn run(rt: Runtime, what: &CreateTarget) -> Result<i32> {
    let CreateTarget::Ttp { path } = what;

    if rt.fs.exists(path) {
        return Err(anyhow!("{} already exists", path.display()));
    }

    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "new-ttp".to_string());
    let contents = TEMPLATE
        .replace("{uuid}", &Uuid::new_v4().to_string())
        .replace("{name}", &name);

    rt.fs
        .write_file(path, contents.as_bytes(), 0o644)
        .with_context(|| format!("writing {}", path.display()))?;
    info!("created {}", path.display());
    Ok(0)
}
