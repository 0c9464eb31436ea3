//! Registry configuration
//!
//! Resolves where settings live and how overrides are found, with priority:
//! 1. Programmatic overrides (command-line flags)
//! 2. Environment variables
//! 3. Repo-local config (.layerset.toml)
//! 4. Global config (~/.config/layerset/config.toml)
//! 5. Defaults

mod resolve;
mod types;

pub use resolve::{ConfigError, ConfigOverrides, resolve_config};
pub use types::{ConfigFile, DiscoverySection, OverridesSection, RegistryConfig, StoreSection};
