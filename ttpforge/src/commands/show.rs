use anyhow::Result;
use ttpforge_core::Platform;

use crate::cli::ShowTarget;
use crate::commands::{current_dir, load_reference, parse_bound_args};
use crate::config::Runtime;
use crate::output::table_with_titles;

pub fn run(rt: Runtime, what: &ShowTarget) -> Result<i32> {
    match what {
        ShowTarget::Ttp { reference } => show_ttp(&rt, reference),
    }
}

fn show_ttp(rt: &Runtime, reference: &str) -> Result<i32> {
    let repos = rt.repo_collection()?;
    let cwd = current_dir()?;
    let platform = Platform::current();
    let (doc, bound) = load_reference(&repos, rt.fs.as_ref(), reference, &parse_bound_args(&[])?, &cwd, &platform)?;

    println!("name: {}", doc.preamble.name);
    println!("uuid: {}", doc.preamble.uuid);
    if !doc.preamble.description.is_empty() {
        println!("description: {}", doc.preamble.description);
    }
    if !doc.preamble.authors.is_empty() {
        println!("authors: {}", doc.preamble.authors.join(", "));
    }
    if let Some(mitre) = &doc.preamble.mitre {
        if !mitre.tactics.is_empty() {
            println!("mitre tactics: {}", mitre.tactics.join(", "));
        }
        if !mitre.techniques.is_empty() {
            println!("mitre techniques: {}", mitre.techniques.join(", "));
        }
    }

    if !doc.preamble.args.is_empty() {
        let mut table = table_with_titles(["arg", "type", "default", "choices"]);
        for arg in &doc.preamble.args {
            table.add_row([
                arg.name.clone(),
                format!("{:?}", arg.kind),
                arg.default.clone().unwrap_or_default(),
                arg.choices.join(", "),
            ]);
        }
        println!("{table}");
    }

    let mut steps = table_with_titles(["step", "action"]);
    for step in &doc.steps {
        steps.add_row([step.name.clone(), describe_action(&step.action)]);
    }
    println!("{steps}");

    if bound.is_empty() {
        println!("(no arguments bound; pass --arg to see a concrete rendering via `run`)");
    }
    Ok(0)
}

fn describe_action(action: &ttpforge_core::Action) -> String {
    format!("{action:?}")
        .split('(')
        .next()
        .unwrap_or("unknown")
        .to_string()
}
