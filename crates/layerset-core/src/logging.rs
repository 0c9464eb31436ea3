//! Tracing setup for `lset` and for hosts embedding the registry.
//!
//! The registry reports kind lifecycle changes (created, relocated, reverted)
//! at `info`, skipped overrides and unreadable files at `warn`, and per-source
//! merge counts and watcher events at `debug`. Output goes to stderr so that
//! `--json` results on stdout stay machine-readable.

use std::sync::OnceLock;
use tracing::Level;

/// Environment variable selecting the maximum level
pub const LOG_ENV: &str = "LAYERSET_LOG";

static INSTALLED: OnceLock<bool> = OnceLock::new();

fn parse_level(raw: Option<&str>) -> Level {
    match raw.map(|r| r.trim().to_ascii_lowercase()).as_deref() {
        Some("trace") => Level::TRACE,
        Some("debug") => Level::DEBUG,
        Some("warn") => Level::WARN,
        Some("error") => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Install a stderr subscriber at the level named by `LAYERSET_LOG`.
///
/// Returns whether this process's subscriber is ours; a host that installed
/// its own first keeps it. Later calls return the first call's answer.
pub fn init() -> bool {
    *INSTALLED.get_or_init(|| {
        let level = parse_level(std::env::var(LOG_ENV).ok().as_deref());
        tracing_subscriber::fmt()
            .with_max_level(level)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init()
            .is_ok()
    })
}
