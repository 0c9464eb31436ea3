//! Backing store for base instances
//!
//! Base instances live under the store root as pretty-printed JSON:
//!
//! - `Settings/Resources/<file>.json` for runtime project settings
//! - `Settings/Editor/<file>.json` for editor project settings
//! - `Settings/Editor/User/<env-id>/<file>.json` for per-user preferences
//!
//! The per-user directory is keyed by an environment id (the project folder
//! name by default) so that several checkouts sharing one tree keep separate
//! preferences. An index file remembers where each kind was last stored so a
//! kind whose filename or usage changed is moved rather than recreated.

use crate::error::SettingsError;
use crate::kind::{KindDeclaration, Settings, SettingsUsage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const SETTINGS_DIR: &str = "Settings";
const INDEX_FILE: &str = ".layerset-index.json";

/// How a base instance was obtained
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadSource {
    /// Read from its current path
    Loaded,
    /// Moved from a previous path, then read
    Relocated { from: PathBuf },
    /// Nothing stored yet; a default was created and persisted
    Created,
    /// Stored file unusable; an in-memory default is used and the file is left alone
    Fallback,
}

#[derive(Debug)]
pub struct Loaded<T> {
    pub value: T,
    pub source: LoadSource,
    pub path: PathBuf,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreIndex {
    #[serde(default)]
    kinds: BTreeMap<String, PathBuf>,
}

/// File-backed store rooted at a project directory
#[derive(Debug, Clone)]
pub struct SettingsStore {
    root: PathBuf,
    environment_id: String,
}

impl SettingsStore {
    pub fn new(root: impl Into<PathBuf>, environment_id: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            environment_id: environment_id.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn environment_id(&self) -> &str {
        &self.environment_id
    }

    /// Directory holding base instances for `usage`.
    pub fn scope_dir(&self, usage: SettingsUsage) -> PathBuf {
        let settings = self.root.join(SETTINGS_DIR);
        match usage {
            SettingsUsage::RuntimeProject => settings.join("Resources"),
            SettingsUsage::EditorProject => settings.join("Editor"),
            SettingsUsage::EditorUser => settings
                .join("Editor")
                .join("User")
                .join(&self.environment_id),
        }
    }

    /// Full path of the base instance for `kind`.
    pub fn path_for(&self, kind: &KindDeclaration) -> PathBuf {
        self.scope_dir(kind.usage)
            .join(format!("{}.json", kind.filename()))
    }

    /// Load the base instance for `T`, relocating or creating it as needed.
    ///
    /// Never fails: storage problems degrade to a default instance.
    pub fn load<T: Settings>(&self, kind: &KindDeclaration) -> Loaded<T> {
        let path = self.path_for(kind);
        let key = std::any::type_name::<T>();

        let mut source = LoadSource::Loaded;
        if !path.exists()
            && let Some(from) = self.relocate(key, kind, &path)
        {
            source = LoadSource::Relocated { from };
        }

        if path.exists() {
            match read_json::<T>(&path) {
                Ok(value) => {
                    self.remember(key, &path);
                    debug!("Loaded {} from {}", kind.type_name, path.display());
                    return Loaded {
                        value,
                        source,
                        path,
                    };
                }
                Err(e) => {
                    warn!(
                        "Failed to read {} settings, using defaults without overwriting the file: {e}",
                        kind.type_name
                    );
                    return Loaded {
                        value: T::default(),
                        source: LoadSource::Fallback,
                        path,
                    };
                }
            }
        }

        let value = T::default();
        match self.save(kind, &value) {
            Ok(_) => info!("Created {} settings at {}", kind.type_name, path.display()),
            Err(e) => warn!("Failed to persist new {} settings: {e}", kind.type_name),
        }
        self.remember(key, &path);
        Loaded {
            value,
            source: LoadSource::Created,
            path,
        }
    }

    /// Persist `value` as the base instance for `kind`.
    pub fn save<T: Settings>(&self, kind: &KindDeclaration, value: &T) -> Result<PathBuf, SettingsError> {
        let path = self.path_for(kind);
        let json = serde_json::to_string_pretty(value).map_err(|source| SettingsError::Serialization {
            kind: kind.type_name.clone(),
            source,
        })?;
        write_atomic(&path, json.as_bytes())?;
        Ok(path)
    }

    /// Delete the stored base instance. Returns whether a file was removed.
    pub fn delete<T: Settings>(&self, kind: &KindDeclaration) -> Result<bool, SettingsError> {
        let path = self.path_for(kind);
        let removed = match fs::remove_file(&path) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(SettingsError::storage(&path, e)),
        };

        let mut index = self.read_index();
        if index.kinds.remove(std::any::type_name::<T>()).is_some() {
            self.write_index(&index);
        }
        Ok(removed)
    }

    /// Move the instance recorded for `key` at an older path to `path`.
    fn relocate(&self, key: &str, kind: &KindDeclaration, path: &Path) -> Option<PathBuf> {
        let old = self.read_index().kinds.get(key).map(|rel| self.root.join(rel))?;
        if old == path || !old.exists() {
            return None;
        }

        if let Some(parent) = path.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warn!(
                "Failed to move previous {} settings '{}' to '{}': {e}. A new settings file will be created.",
                kind.type_name,
                old.display(),
                path.display()
            );
            return None;
        }

        let moved = fs::rename(&old, path).or_else(|_| fs::copy(&old, path).map(|_| ()));
        match moved {
            Ok(()) => {
                info!(
                    "Moved {} settings from {} to {}",
                    kind.type_name,
                    old.display(),
                    path.display()
                );
                Some(old)
            }
            Err(e) => {
                warn!(
                    "Failed to move previous {} settings '{}' to '{}': {e}. A new settings file will be created.",
                    kind.type_name,
                    old.display(),
                    path.display()
                );
                None
            }
        }
    }

    fn index_path(&self) -> PathBuf {
        self.root.join(SETTINGS_DIR).join(INDEX_FILE)
    }

    fn read_index(&self) -> StoreIndex {
        let path = self.index_path();
        if !path.exists() {
            return StoreIndex::default();
        }
        read_json(&path).unwrap_or_else(|e| {
            warn!("Ignoring unreadable settings index {}: {e}", path.display());
            StoreIndex::default()
        })
    }

    fn write_index(&self, index: &StoreIndex) {
        let path = self.index_path();
        let result = serde_json::to_vec_pretty(index)
            .map_err(std::io::Error::other)
            .map_err(|e| SettingsError::storage(&path, e))
            .and_then(|bytes| write_atomic(&path, &bytes));
        if let Err(e) = result {
            warn!("Failed to update settings index: {e}");
        }
    }

    fn remember(&self, key: &str, path: &Path) {
        let relative = path.strip_prefix(&self.root).unwrap_or(path).to_path_buf();
        let mut index = self.read_index();
        if index.kinds.get(key) == Some(&relative) {
            return;
        }
        index.kinds.insert(key.to_string(), relative);
        self.write_index(&index);
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, SettingsError> {
    let contents = fs::read_to_string(path).map_err(|e| SettingsError::storage(path, e))?;
    serde_json::from_str(&contents)
        .map_err(|e| SettingsError::storage(path, std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
}

/// Write through a temp sibling so readers never see a half-written file.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), SettingsError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| SettingsError::storage(parent, e))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, bytes).map_err(|e| SettingsError::storage(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        SettingsError::storage(path, e)
    })
}
