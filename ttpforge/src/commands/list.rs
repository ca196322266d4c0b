use anyhow::Result;

use crate::cli::ListTarget;
use crate::config::Runtime;
use crate::output::table_with_titles;

pub fn run(rt: Runtime, what: &ListTarget) -> Result<i32> {
    match what {
        ListTarget::Repos => list_repos(&rt),
        ListTarget::Ttps => list_ttps(&rt),
    }
}

fn list_repos(rt: &Runtime) -> Result<i32> {
    let repos = rt.repo_collection()?;
    let mut table = table_with_titles(["name", "root"]);
    for repo in repos.repos() {
        table.add_row([repo.name.as_str(), &repo.root.display().to_string()]);
    }
    println!("{table}");
    Ok(0)
}

fn list_ttps(rt: &Runtime) -> Result<i32> {
    let repos = rt.repo_collection()?;
    let mut table = table_with_titles(["reference"]);
    for reference in repos.list_ttps()? {
        table.add_row([reference]);
    }
    println!("{table}");
    Ok(0)
}
