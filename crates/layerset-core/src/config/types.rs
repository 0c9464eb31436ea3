//! Configuration types

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Module whose dependents are scanned for settings kinds by default
pub const DEFAULT_DECLARING_MODULE: &str = "layerset-core";

/// Shared multi-kind override document name
pub const DEFAULT_SHARED_FILE: &str = "Settings.json";

/// Fully resolved configuration used to build a registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryConfig {
    /// Store root; base instances live under `<root>/Settings`
    pub root: PathBuf,
    pub override_dir: PathBuf,
    /// Keys per-user preferences; the root folder name by default
    pub environment_id: String,
    pub shared_file: Option<String>,
    pub watch: bool,
    pub cache_path: PathBuf,
    pub declaring_module: String,
}

impl RegistryConfig {
    /// Defaults for a project rooted at `root`.
    pub fn for_root(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            override_dir: root.to_path_buf(),
            environment_id: environment_id_for(root),
            shared_file: Some(DEFAULT_SHARED_FILE.to_string()),
            watch: true,
            cache_path: default_cache_path(root),
            declaring_module: DEFAULT_DECLARING_MODULE.to_string(),
        }
    }
}

pub(crate) fn environment_id_for(root: &Path) -> String {
    root.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "default".to_string())
}

pub(crate) fn default_cache_path(root: &Path) -> PathBuf {
    root.join("Library")
        .join("layerset")
        .join("discovery-cache.json")
}

/// On-disk TOML layout; every key is optional
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub store: StoreSection,
    pub overrides: OverridesSection,
    pub discovery: DiscoverySection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub root: Option<PathBuf>,
    pub environment_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverridesSection {
    pub dir: Option<PathBuf>,
    /// Empty string disables the shared document
    pub shared_file: Option<String>,
    pub watch: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySection {
    pub cache: Option<PathBuf>,
    pub declaring_module: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_for_root() {
        let config = RegistryConfig::for_root(Path::new("/work/my-game"));
        assert_eq!(config.environment_id, "my-game");
        assert_eq!(config.override_dir, PathBuf::from("/work/my-game"));
        assert_eq!(config.shared_file.as_deref(), Some("Settings.json"));
        assert_eq!(
            config.cache_path,
            PathBuf::from("/work/my-game/Library/layerset/discovery-cache.json")
        );
        assert!(config.watch);
    }

    #[test]
    fn test_parse_partial_file() {
        let file: ConfigFile = toml::from_str(
            r#"
[overrides]
shared_file = ""
watch = false

[discovery]
declaring_module = "engine-settings"
"#,
        )
        .unwrap();
        assert_eq!(file.overrides.shared_file.as_deref(), Some(""));
        assert_eq!(file.overrides.watch, Some(false));
        assert_eq!(file.store, StoreSection::default());
        assert_eq!(file.discovery.declaring_module.as_deref(), Some("engine-settings"));
    }
}
