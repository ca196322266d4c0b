//! Table rendering and live step progress, adapted from the old
//! `comfy-table` helpers and the engine's `Progress` trait.

use comfy_table::{presets::ASCII_MARKDOWN, Attribute, Cell, ContentArrangement, Table};
use log::info;
use ttpforge_core::Progress;

pub fn bold_cell<T: ToString>(s: T) -> Cell {
    Cell::new(s).add_attribute(Attribute::Bold)
}

pub fn table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(ASCII_MARKDOWN)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn table_with_titles<I: IntoIterator<Item = T>, T: ToString>(titles: I) -> Table {
    let mut table = table();
    table.set_header(titles.into_iter().map(bold_cell));
    table
}

/// Live console [`Progress`] implementation for `run`/`test`: one line per
/// step transition, at info level so `-v` isn't required to see a run
/// happen.
#[derive(Debug, Clone, Copy, Default)]
pub struct CliProgress;

impl Progress for CliProgress {
    fn step_started(&self, name: &str) {
        info!("==> {name}");
    }

    fn step_finished(&self, name: &str, succeeded: bool) {
        if succeeded {
            info!("<== {name} ok");
        } else {
            info!("<== {name} failed");
        }
    }

    fn cleanup_started(&self, step_name: &str) {
        info!("--> cleaning up {step_name}");
    }
}
