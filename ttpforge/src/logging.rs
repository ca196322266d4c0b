//! Logger setup, adapted from the old per-app `simplelog` wiring: a term
//! logger on stderr, optionally paired with a file logger at a fixed,
//! more verbose level.

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use simplelog::{CombinedLogger, ColorChoice, LevelFilter, TermLogger, TerminalMode, WriteLogger};

/// Map a `-v` repeat count to a level filter: 0 is warnings and errors only,
/// matching a CLI that should stay quiet unless asked otherwise.
fn level_for(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

pub fn init(verbosity: u8, log_file: Option<&Path>) -> Result<()> {
    let level_filter = level_for(verbosity);
    let term_config = simplelog::ConfigBuilder::new()
        .set_time_level(LevelFilter::Off)
        .build();

    match log_file {
        None => {
            TermLogger::init(level_filter, term_config, TerminalMode::Stderr, ColorChoice::Auto)
                .context("initializing logger")?;
        }
        Some(path) => {
            let file_config = simplelog::ConfigBuilder::new()
                .set_time_format_rfc3339()
                .build();
            let file = File::options()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            let term_logger = TermLogger::new(
                level_filter.min(LevelFilter::Warn),
                term_config,
                TerminalMode::Stderr,
                ColorChoice::Auto,
            );
            CombinedLogger::init(vec![term_logger, WriteLogger::new(level_filter, file_config, file)])
                .context("initializing combined logger")?;
        }
    }
    Ok(())
}
