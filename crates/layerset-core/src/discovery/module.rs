//! Module hosts: an in-process catalog and a directory of manifests

use super::{DiscoveryError, ModuleHost, ModuleInfo, ScannedType};
use crate::fingerprint::compute_hash;
use crate::registry::SettingsRegistry;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const MANIFEST_SUFFIX: &str = ".module.json";

/// Modules registered in-process
#[derive(Debug, Clone, Default)]
pub struct ModuleCatalog {
    modules: Vec<(ModuleInfo, Vec<ScannedType>)>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the module named `info.name`.
    pub fn insert(&mut self, info: ModuleInfo, types: Vec<ScannedType>) {
        match self.modules.iter_mut().find(|(m, _)| m.name == info.name) {
            Some(slot) => *slot = (info, types),
            None => self.modules.push((info, types)),
        }
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.modules.len();
        self.modules.retain(|(m, _)| m.name != name);
        self.modules.len() != before
    }

    /// Catalog holding every kind declared in `registry` as one module.
    pub fn from_registry(registry: &SettingsRegistry, module: &str, location: impl Into<PathBuf>) -> Self {
        let types: Vec<ScannedType> = registry
            .kinds()
            .iter()
            .map(ScannedType::from_declaration)
            .collect();
        let mut catalog = Self::new();
        catalog.insert(
            ModuleInfo {
                name: module.to_string(),
                location: location.into(),
                references: vec![env!("CARGO_PKG_NAME").to_string()],
                fingerprint: None,
            },
            types,
        );
        catalog
    }

    fn find(&self, module: &ModuleInfo) -> Option<&[ScannedType]> {
        self.modules
            .iter()
            .find(|(m, _)| m.location == module.location)
            .map(|(_, types)| types.as_slice())
    }
}

impl ModuleHost for ModuleCatalog {
    fn loaded_modules(&self) -> Vec<ModuleInfo> {
        self.modules.iter().map(|(m, _)| m.clone()).collect()
    }

    fn scan(&self, module: &ModuleInfo) -> Vec<ScannedType> {
        self.find(module).map(<[ScannedType]>::to_vec).unwrap_or_default()
    }

    fn resolve(&self, module: &ModuleInfo, type_name: &str) -> Option<ScannedType> {
        self.find(module)?
            .iter()
            .find(|t| t.type_name == type_name)
            .cloned()
    }
}

/// On-disk description of one module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleManifest {
    pub name: String,
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub types: Vec<ScannedType>,
}

/// Modules described by `*.module.json` manifests in a directory
///
/// The manifest path is the module location and its content hash the
/// fingerprint, so editing a manifest is seen as a recompile.
#[derive(Debug, Default)]
pub struct ManifestModules {
    catalog: ModuleCatalog,
}

impl ManifestModules {
    /// Read every manifest under `dir`.
    ///
    /// Unreadable or malformed manifests are logged and skipped. Fails only
    /// when `dir` exists but cannot be listed.
    pub fn load(dir: &Path) -> Result<Self, DiscoveryError> {
        let mut modules = Self::default();
        if !dir.exists() {
            debug!("Module directory does not exist, skipping: {}", dir.display());
            return Ok(modules);
        }

        let entries = std::fs::read_dir(dir).map_err(|source| DiscoveryError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| match entry {
                Ok(e) => Some(e.path()),
                Err(e) => {
                    warn!("Failed to read directory entry: {e}");
                    None
                }
            })
            .filter(|p| p.to_string_lossy().ends_with(MANIFEST_SUFFIX))
            .collect();
        paths.sort();

        for path in paths {
            match read_manifest(&path) {
                Ok((manifest, fingerprint)) => {
                    debug!("Loaded module manifest '{}' from {}", manifest.name, path.display());
                    modules.catalog.insert(
                        ModuleInfo {
                            name: manifest.name,
                            location: path,
                            references: manifest.references,
                            fingerprint: Some(fingerprint),
                        },
                        manifest.types,
                    );
                }
                Err(e) => warn!("Skipping module manifest {}: {e}", path.display()),
            }
        }
        Ok(modules)
    }

    pub fn len(&self) -> usize {
        self.catalog.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.catalog.modules.is_empty()
    }
}

fn read_manifest(path: &Path) -> Result<(ModuleManifest, String), DiscoveryError> {
    let bytes = std::fs::read(path).map_err(|source| DiscoveryError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let manifest = serde_json::from_slice(&bytes).map_err(|source| DiscoveryError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok((manifest, compute_hash(&bytes)))
}

impl ModuleHost for ManifestModules {
    fn loaded_modules(&self) -> Vec<ModuleInfo> {
        self.catalog.loaded_modules()
    }

    fn scan(&self, module: &ModuleInfo) -> Vec<ScannedType> {
        self.catalog.scan(module)
    }

    fn resolve(&self, module: &ModuleInfo, type_name: &str) -> Option<ScannedType> {
        self.catalog.resolve(module, type_name)
    }
}
