use anyhow::Result;
use clap::CommandFactory;
use clap_complete::{generate, shells};

use crate::cli::{Cli, Shell};

pub fn run(shell: &Shell) -> Result<i32> {
    let mut command = Cli::command();
    let bin_name = command.get_name().to_string();
    match shell {
        Shell::Bash => generate(shells::Bash, &mut command, bin_name, &mut std::io::stdout()),
        Shell::Fish => generate(shells::Fish, &mut command, bin_name, &mut std::io::stdout()),
        Shell::Zsh => generate(shells::Zsh, &mut command, bin_name, &mut std::io::stdout()),
        Shell::Powershell => {
            generate(shells::PowerShell, &mut command, bin_name, &mut std::io::stdout())
        }
    }
    Ok(0)
}
