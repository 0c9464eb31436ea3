//! Settings kinds and their declarations
//!
//! A kind is a Rust type implementing [`Settings`] together with a
//! [`KindDeclaration`] registered once at startup. The declaration carries
//! everything the registry needs to locate, override and list the kind.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Contract every settings kind implements.
///
/// The serialized form is the field tree that overrides are merged into, so
/// every field that should be overridable must round-trip through serde.
pub trait Settings:
    Serialize + DeserializeOwned + Default + Clone + PartialEq + Send + Sync + 'static
{
    /// Called after a value is changed through the registry mutator.
    fn validate(&mut self) {}
}

impl Settings for serde_json::Value {}

/// How and when a kind is used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SettingsUsage {
    /// Per-user editor preferences, keyed by environment id
    EditorUser,
    /// Project-wide editor settings
    EditorProject,
    /// Project settings shipped with the runtime
    RuntimeProject,
}

/// Where a kind is listed by settings surfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingsScope {
    User,
    Project,
}

impl SettingsUsage {
    pub fn scope(self) -> SettingsScope {
        match self {
            SettingsUsage::EditorUser => SettingsScope::User,
            SettingsUsage::EditorProject | SettingsUsage::RuntimeProject => SettingsScope::Project,
        }
    }
}

/// What a kind supports beyond plain persistence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// Can be exported to and imported from standalone JSON files
    Serializable,
    /// Accepts file and command-line overrides during live mode
    Overridable,
    /// Override files are watched and re-applied while live
    LiveReload,
}

/// An extra override file declared for a kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideFileSpec {
    pub path: PathBuf,
    /// Dotted key selecting this kind's tree inside a multi-kind document
    pub selector: Option<String>,
}

/// Static metadata for one settings kind
#[derive(Debug, Clone)]
pub struct KindDeclaration {
    pub type_name: String,
    pub usage: SettingsUsage,
    pub display_path: Option<String>,
    pub filename: Option<String>,
    pub capabilities: Vec<Capability>,
    pub override_files: Vec<OverrideFileSpec>,
    /// Identity-like top-level fields left out of exported files
    pub transient_fields: Vec<String>,
}

impl KindDeclaration {
    pub fn new(type_name: impl Into<String>, usage: SettingsUsage) -> Self {
        Self {
            type_name: type_name.into(),
            usage,
            display_path: None,
            filename: None,
            capabilities: vec![Capability::Serializable],
            override_files: Vec::new(),
            transient_fields: Vec::new(),
        }
    }

    /// Declaration named after `T`'s unqualified type name.
    pub fn of<T: ?Sized>(usage: SettingsUsage) -> Self {
        Self::new(short_type_name::<T>(), usage)
    }

    pub fn editor_user<T: ?Sized>() -> Self {
        Self::of::<T>(SettingsUsage::EditorUser)
    }

    pub fn editor_project<T: ?Sized>() -> Self {
        Self::of::<T>(SettingsUsage::EditorProject)
    }

    pub fn runtime_project<T: ?Sized>() -> Self {
        Self::of::<T>(SettingsUsage::RuntimeProject)
    }

    pub fn with_display_path(mut self, path: impl Into<String>) -> Self {
        self.display_path = Some(path.into());
        self
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        if !self.capabilities.contains(&capability) {
            self.capabilities.push(capability);
        }
        self
    }

    /// Accept overrides from files and launch arguments while live.
    pub fn allow_overrides(self) -> Self {
        self.with_capability(Capability::Overridable)
    }

    /// Accept overrides and re-apply them whenever an override file changes.
    pub fn allow_live_reload(self) -> Self {
        self.allow_overrides()
            .with_capability(Capability::LiveReload)
    }

    pub fn with_override_file(mut self, path: impl Into<PathBuf>, selector: Option<&str>) -> Self {
        self.override_files.push(OverrideFileSpec {
            path: path.into(),
            selector: selector.map(str::to_string),
        });
        self
    }

    pub fn with_transient_field(mut self, field: impl Into<String>) -> Self {
        self.transient_fields.push(field.into());
        self
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Base filename (without extension); defaults to the type name.
    pub fn filename(&self) -> &str {
        self.filename.as_deref().unwrap_or(&self.type_name)
    }

    /// Path shown in settings listings, e.g. `Project/Audio/Mixer`.
    pub fn display_path(&self) -> String {
        let prefix = match self.usage {
            SettingsUsage::EditorUser => "Preferences/",
            _ => "Project/",
        };
        format!(
            "{prefix}{}",
            self.display_path.as_deref().unwrap_or(&self.type_name)
        )
    }

    pub fn scope(&self) -> SettingsScope {
        self.usage.scope()
    }

    /// Whether `name` addresses this kind (filename or type name).
    pub fn answers_to(&self, name: &str) -> bool {
        name == self.filename() || name == self.type_name
    }
}

/// Unqualified, non-generic name of `T`, e.g. `AudioSettings`.
pub fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
