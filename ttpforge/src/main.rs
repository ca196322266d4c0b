mod cli;
mod commands;
mod config;
mod logging;
mod output;

use clap::Parser;

use crate::cli::Cli;
use crate::config::Runtime;

/// Error messages can embed a captured stderr tail from a failed action;
/// cap what reaches the terminal so one runaway command doesn't flood it.
const MAX_ERROR_MESSAGE_BYTES: usize = 64 * 1024;

fn main() {
    let cli = Cli::parse();

    if let Err(e) = logging::init(cli.global.verbose, cli.global.log_file.as_deref()) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }

    let runtime = match Runtime::load(cli.global.config.clone()) {
        Ok(rt) => rt,
        Err(e) => {
            print_error(&e);
            std::process::exit(1);
        }
    };

    match commands::dispatch(&cli.command, runtime) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            print_error(&e);
            std::process::exit(1);
        }
    }
}

fn print_error(err: &anyhow::Error) {
    let mut message = format!("{err:#}");
    if message.len() > MAX_ERROR_MESSAGE_BYTES {
        let mut truncate_at = MAX_ERROR_MESSAGE_BYTES;
        while !message.is_char_boundary(truncate_at) {
            truncate_at -= 1;
        }
        message.truncate(truncate_at);
        message.push_str("\n... (truncated)");
    }
    eprintln!("error: {message}");
}
