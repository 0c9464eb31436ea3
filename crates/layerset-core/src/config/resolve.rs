//! Configuration discovery and resolution

use super::types::{ConfigFile, RegistryConfig};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

const REPO_CONFIG: &str = ".layerset.toml";

/// Configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parsing error in {path}: {source}")]
    TomlParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// An explicitly requested config file does not exist
    #[error("Configuration not found at {0}")]
    NotFound(PathBuf),
}

/// Command-line overrides for configuration
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub root: Option<PathBuf>,
    pub override_dir: Option<PathBuf>,
    pub environment_id: Option<String>,
    pub shared_file: Option<String>,
    pub cache_path: Option<PathBuf>,
    pub watch: Option<bool>,
    /// Read this file instead of searching for `.layerset.toml`
    pub config_path: Option<PathBuf>,
}

/// Resolve configuration from all sources
///
/// Priority (highest to lowest):
/// 1. Command-line overrides
/// 2. Environment variables
/// 3. Repo-local config (.layerset.toml in current dir or up to the git root)
/// 4. Global config (~/.config/layerset/config.toml)
/// 5. Defaults
///
/// Relative paths in a config file are taken from that file's directory;
/// relative paths from the environment or overrides from `current_dir`.
pub fn resolve_config(
    overrides: &ConfigOverrides,
    current_dir: &Path,
    home_dir: &Path,
) -> Result<RegistryConfig, ConfigError> {
    let mut layered = ConfigFile::default();

    // 4. Global config
    let global_config_path = home_dir.join(".config/layerset/config.toml");
    if global_config_path.exists() {
        match load_config_file(&global_config_path) {
            Ok(file) => merge_config(&mut layered, file),
            Err(e) => warn!("Failed to parse global config: {e}"),
        }
    }

    // 3. Repo-local config, or the file named on the command line
    if let Some(path) = &overrides.config_path {
        let path = absolute(current_dir, path);
        if !path.exists() {
            return Err(ConfigError::NotFound(path));
        }
        merge_config(&mut layered, load_config_file(&path)?);
    } else if let Some(repo_config) = find_repo_local_config(current_dir) {
        match load_config_file(&repo_config) {
            Ok(file) => merge_config(&mut layered, file),
            Err(e) => warn!("Failed to parse repo config: {e}"),
        }
    }

    // 2. Environment
    apply_env_overrides(&mut layered, current_dir);

    // 1. Command line
    apply_cli_overrides(&mut layered, overrides, current_dir);

    Ok(finalize(layered, current_dir))
}

/// Searches the current directory and its parents up to the git root.
fn find_repo_local_config(current_dir: &Path) -> Option<PathBuf> {
    let mut dir = current_dir;
    loop {
        let config_path = dir.join(REPO_CONFIG);
        if config_path.exists() {
            debug!("Using repo config {}", config_path.display());
            return Some(config_path);
        }
        if dir.join(".git").exists() {
            return None;
        }
        dir = dir.parent()?;
    }
}

fn load_config_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut file: ConfigFile = toml::from_str(&contents).map_err(|source| ConfigError::TomlParse {
        path: path.to_path_buf(),
        source,
    })?;

    let base = path.parent().unwrap_or(Path::new("."));
    for slot in [
        &mut file.store.root,
        &mut file.overrides.dir,
        &mut file.discovery.cache,
    ] {
        if let Some(p) = slot.take() {
            *slot = Some(absolute(base, &p));
        }
    }
    Ok(file)
}

/// Later layers replace keys they set; unset keys keep earlier values.
fn merge_config(base: &mut ConfigFile, file: ConfigFile) {
    fn take<T>(slot: &mut Option<T>, value: Option<T>) {
        if value.is_some() {
            *slot = value;
        }
    }

    take(&mut base.store.root, file.store.root);
    take(&mut base.store.environment_id, file.store.environment_id);
    take(&mut base.overrides.dir, file.overrides.dir);
    take(&mut base.overrides.shared_file, file.overrides.shared_file);
    take(&mut base.overrides.watch, file.overrides.watch);
    take(&mut base.discovery.cache, file.discovery.cache);
    take(&mut base.discovery.declaring_module, file.discovery.declaring_module);
}

fn apply_env_overrides(config: &mut ConfigFile, current_dir: &Path) {
    let path_var = |name: &str| {
        std::env::var(name)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(|v| absolute(current_dir, Path::new(v.trim())))
    };

    if let Some(root) = path_var("LAYERSET_ROOT") {
        config.store.root = Some(root);
    }
    if let Some(dir) = path_var("LAYERSET_OVERRIDE_DIR") {
        config.overrides.dir = Some(dir);
    }
    if let Some(cache) = path_var("LAYERSET_CACHE") {
        config.discovery.cache = Some(cache);
    }
    if let Ok(id) = std::env::var("LAYERSET_ENV_ID")
        && !id.trim().is_empty()
    {
        config.store.environment_id = Some(id.trim().to_string());
    }
    if std::env::var("LAYERSET_NO_WATCH").is_ok() {
        config.overrides.watch = Some(false);
    }
}

fn apply_cli_overrides(config: &mut ConfigFile, overrides: &ConfigOverrides, current_dir: &Path) {
    if let Some(ref root) = overrides.root {
        config.store.root = Some(absolute(current_dir, root));
    }
    if let Some(ref dir) = overrides.override_dir {
        config.overrides.dir = Some(absolute(current_dir, dir));
    }
    if let Some(ref cache) = overrides.cache_path {
        config.discovery.cache = Some(absolute(current_dir, cache));
    }
    if let Some(ref id) = overrides.environment_id {
        config.store.environment_id = Some(id.clone());
    }
    if let Some(ref shared) = overrides.shared_file {
        config.overrides.shared_file = Some(shared.clone());
    }
    if let Some(watch) = overrides.watch {
        config.overrides.watch = Some(watch);
    }
}

/// Fill unset keys with defaults derived from the resolved root.
fn finalize(layered: ConfigFile, current_dir: &Path) -> RegistryConfig {
    let root = layered
        .store
        .root
        .unwrap_or_else(|| current_dir.to_path_buf());
    let mut config = RegistryConfig::for_root(&root);

    if let Some(dir) = layered.overrides.dir {
        config.override_dir = dir;
    }
    if let Some(id) = layered.store.environment_id {
        config.environment_id = id;
    }
    if let Some(shared) = layered.overrides.shared_file {
        config.shared_file = (!shared.trim().is_empty()).then_some(shared);
    }
    if let Some(watch) = layered.overrides.watch {
        config.watch = watch;
    }
    if let Some(cache) = layered.discovery.cache {
        config.cache_path = cache;
    }
    if let Some(module) = layered.discovery.declaring_module {
        config.declaring_module = module;
    }
    config
}

fn absolute(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use tempfile::TempDir;

    const VARS: [&str; 5] = [
        "LAYERSET_ROOT",
        "LAYERSET_OVERRIDE_DIR",
        "LAYERSET_ENV_ID",
        "LAYERSET_CACHE",
        "LAYERSET_NO_WATCH",
    ];

    fn clear_env() {
        unsafe {
            for var in VARS {
                env::remove_var(var);
            }
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        let project = temp_dir.path().join("my-game");
        std::fs::create_dir_all(project.join(".git")).unwrap();

        let config = resolve_config(&ConfigOverrides::default(), &project, temp_dir.path()).unwrap();
        assert_eq!(config, RegistryConfig::for_root(&project));
        assert_eq!(config.environment_id, "my-game");
    }

    #[test]
    #[serial]
    fn test_repo_config_found_from_subdirectory() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        let project = temp_dir.path().join("proj");
        let nested = project.join("src/deep");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::create_dir_all(project.join(".git")).unwrap();
        std::fs::write(
            project.join(".layerset.toml"),
            r#"
[store]
root = "."

[overrides]
dir = "overrides"
shared_file = ""
"#,
        )
        .unwrap();

        let config = resolve_config(&ConfigOverrides::default(), &nested, temp_dir.path()).unwrap();
        assert_eq!(config.root, project.join("."));
        assert_eq!(config.override_dir, project.join("overrides"));
        assert_eq!(config.shared_file, None);
    }

    #[test]
    #[serial]
    fn test_priority_env_over_files_cli_over_env() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        let home = temp_dir.path().join("home");
        let project = temp_dir.path().join("proj");
        std::fs::create_dir_all(home.join(".config/layerset")).unwrap();
        std::fs::create_dir_all(project.join(".git")).unwrap();
        std::fs::write(
            home.join(".config/layerset/config.toml"),
            "[store]\nenvironment_id = \"global\"\n\n[overrides]\nwatch = true\n",
        )
        .unwrap();
        std::fs::write(
            project.join(".layerset.toml"),
            "[store]\nenvironment_id = \"repo\"\n",
        )
        .unwrap();

        let config = resolve_config(&ConfigOverrides::default(), &project, &home).unwrap();
        assert_eq!(config.environment_id, "repo");
        assert!(config.watch);

        unsafe {
            env::set_var("LAYERSET_ENV_ID", "from-env");
            env::set_var("LAYERSET_NO_WATCH", "1");
        }
        let config = resolve_config(&ConfigOverrides::default(), &project, &home).unwrap();
        assert_eq!(config.environment_id, "from-env");
        assert!(!config.watch);

        let overrides = ConfigOverrides {
            environment_id: Some("from-cli".to_string()),
            watch: Some(true),
            ..Default::default()
        };
        let config = resolve_config(&overrides, &project, &home).unwrap();
        assert_eq!(config.environment_id, "from-cli");
        assert!(config.watch);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_root_override_moves_derived_defaults() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        let overrides = ConfigOverrides {
            root: Some(PathBuf::from("elsewhere")),
            ..Default::default()
        };
        let config = resolve_config(&overrides, temp_dir.path(), temp_dir.path()).unwrap();
        let root = temp_dir.path().join("elsewhere");
        assert_eq!(config.root, root);
        assert_eq!(config.override_dir, root);
        assert_eq!(config.environment_id, "elsewhere");
        assert_eq!(
            config.cache_path,
            root.join("Library/layerset/discovery-cache.json")
        );
    }

    #[test]
    #[serial]
    fn test_malformed_repo_config_is_skipped() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join(".git")).unwrap();
        std::fs::write(temp_dir.path().join(".layerset.toml"), "[store\nroot = ").unwrap();

        let config =
            resolve_config(&ConfigOverrides::default(), temp_dir.path(), temp_dir.path()).unwrap();
        assert_eq!(config.root, temp_dir.path());
    }

    #[test]
    #[serial]
    fn test_explicit_config_path_must_exist() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        let overrides = ConfigOverrides {
            config_path: Some(PathBuf::from("missing.toml")),
            ..Default::default()
        };
        let err = resolve_config(&overrides, temp_dir.path(), temp_dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }
}
