//! Discovery of settings kinds across loaded modules
//!
//! A [`ModuleHost`] exposes the loaded modules and the settings declarations
//! each one carries. [`DiscoveryCache`] turns that into descriptors while
//! keeping a location-keyed cache on disk, so only modules that changed are
//! scanned again.

mod cache;
mod module;

pub use cache::{CacheEntry, CacheFile, DiscoveryCache, DiscoveryError, DiscoveryReport};
pub use module::{ManifestModules, ModuleCatalog, ModuleManifest};

use crate::error::SettingsError;
use crate::kind::{KindDeclaration, SettingsScope, SettingsUsage};
use crate::registry::SettingsRegistry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

/// A loaded module as seen by discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleInfo {
    pub name: String,
    pub location: PathBuf,
    /// Names of modules this one depends on directly
    #[serde(default)]
    pub references: Vec<String>,
    /// Content hash; a change forces a rescan
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

/// A type declared as a settings kind inside a module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannedType {
    pub type_name: String,
    pub usage: SettingsUsage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_path: Option<String>,
    /// Whether the type fulfils the settings contract
    #[serde(default = "default_true")]
    pub implements_settings: bool,
    /// Type lists itself through its own provider hook
    #[serde(default)]
    pub custom_provider: bool,
}

fn default_true() -> bool {
    true
}

impl ScannedType {
    pub fn new(type_name: impl Into<String>, usage: SettingsUsage) -> Self {
        Self {
            type_name: type_name.into(),
            usage,
            display_path: None,
            implements_settings: true,
            custom_provider: false,
        }
    }

    /// Scanned entry for a kind declared in this process.
    pub fn from_declaration(declaration: &KindDeclaration) -> Self {
        Self {
            type_name: declaration.type_name.clone(),
            usage: declaration.usage,
            display_path: declaration.display_path.clone(),
            implements_settings: true,
            custom_provider: false,
        }
    }
}

/// Access to the loaded module set
pub trait ModuleHost {
    fn loaded_modules(&self) -> Vec<ModuleInfo>;

    /// Every settings declaration in `module`.
    fn scan(&self, module: &ModuleInfo) -> Vec<ScannedType>;

    /// Look up one previously cached type in `module`.
    fn resolve(&self, module: &ModuleInfo, type_name: &str) -> Option<ScannedType>;
}

/// A discovered settings kind, ready for listing
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsDescriptor {
    pub type_name: String,
    pub display_path: String,
    pub scope: SettingsScope,
    pub module: String,
}

impl SettingsDescriptor {
    pub(crate) fn from_scanned(scanned: &ScannedType, module: &ModuleInfo) -> Self {
        let mut declaration = KindDeclaration::new(scanned.type_name.clone(), scanned.usage);
        declaration.display_path = scanned.display_path.clone();
        Self {
            type_name: scanned.type_name.clone(),
            display_path: declaration.display_path(),
            scope: declaration.scope(),
            module: module.name.clone(),
        }
    }

    /// Active instance of this kind in `registry`, as JSON.
    pub fn instance(&self, registry: &SettingsRegistry) -> Result<Value, SettingsError> {
        registry.active_json(&self.type_name)
    }
}
