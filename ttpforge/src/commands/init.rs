use anyhow::Result;
use log::info;

use crate::config::Runtime;

/// Write a fresh, empty program config if one doesn't already exist.
pub fn run(rt: Runtime) -> Result<i32> {
    if rt.fs.exists(&rt.config_path) {
        info!("config already exists at {}", rt.config_path.display());
        return Ok(0);
    }
    rt.save()?;
    info!("wrote a new config to {}", rt.config_path.display());
    Ok(0)
}
