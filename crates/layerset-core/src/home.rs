//! Home directory resolution
//!
//! `LAYERSET_HOME` wins when set and non-empty, which is how tests and
//! sandboxed tools point the global config somewhere harmless. Otherwise the
//! platform home from `dirs::home_dir()` is used.

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Home directory used to locate `~/.config/layerset/config.toml`.
pub fn get_home_dir() -> Result<PathBuf> {
    if let Ok(home) = std::env::var("LAYERSET_HOME") {
        let trimmed = home.trim();
        if !trimmed.is_empty() {
            return Ok(PathBuf::from(trimmed));
        }
    }

    dirs::home_dir().context("Could not determine home directory")
}
