//! Location-keyed discovery cache
//!
//! One entry per scanned module records the settings kinds found in it. An
//! entry is reused while the module's location and fingerprint are unchanged
//! and every cached type still resolves; anything else rescans that module
//! alone.

use super::{ModuleHost, ModuleInfo, ScannedType, SettingsDescriptor};
use crate::error::SettingsError;
use crate::store::write_atomic;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Cache file I/O failures
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// One scanned module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub location: PathBuf,
    pub type_names: Vec<String>,
    #[serde(default)]
    pub needs_scan: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

/// Persisted cache document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheFile {
    #[serde(default)]
    pub needs_full_scan: bool,
    #[serde(default)]
    pub assemblies: Vec<CacheEntry>,
    #[serde(default)]
    pub changed_unknown_locations: Vec<PathBuf>,
}

impl Default for CacheFile {
    fn default() -> Self {
        Self {
            needs_full_scan: true,
            assemblies: Vec::new(),
            changed_unknown_locations: Vec::new(),
        }
    }
}

/// Outcome of one discovery pass
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    /// Sorted by type name
    pub descriptors: Vec<SettingsDescriptor>,
    /// Declared types rejected during scanning
    pub errors: Vec<SettingsError>,
    /// Names of the modules that were scanned rather than served from cache
    pub scanned: Vec<String>,
}

pub struct DiscoveryCache {
    path: Option<PathBuf>,
    file: CacheFile,
    declaring_module: String,
}

impl DiscoveryCache {
    /// Cache backed by `path`. A missing or unreadable file requests a full
    /// scan, and the next pass writes a fresh one.
    pub fn load(path: impl Into<PathBuf>, declaring_module: impl Into<String>) -> Self {
        let path = path.into();
        let file = match read_cache(&path) {
            Ok(Some(file)) => file,
            Ok(None) => {
                debug!("No discovery cache at {}; full scan", path.display());
                CacheFile::default()
            }
            Err(e) => {
                warn!("Discarding unreadable discovery cache: {e}");
                CacheFile::default()
            }
        };
        Self {
            path: Some(path),
            file,
            declaring_module: declaring_module.into(),
        }
    }

    /// Cache that is never written to disk.
    pub fn in_memory(declaring_module: impl Into<String>) -> Self {
        Self {
            path: None,
            file: CacheFile::default(),
            declaring_module: declaring_module.into(),
        }
    }

    pub fn file(&self) -> &CacheFile {
        &self.file
    }

    /// Descriptors for every settings kind in the loaded module set.
    ///
    /// Refreshes and persists the cache; a failed write is logged and the
    /// descriptors are still returned.
    pub fn descriptors(&mut self, host: &dyn ModuleHost) -> DiscoveryReport {
        let modules = referencing_modules(host.loaded_modules(), &self.declaring_module);
        let full_scan = self.file.needs_full_scan;
        if full_scan {
            debug!("Full discovery scan over {} module(s)", modules.len());
        }

        let mut report = DiscoveryReport::default();
        let mut entries = Vec::with_capacity(modules.len());

        for module in &modules {
            let cached = self
                .file
                .assemblies
                .iter()
                .find(|e| location_matches(&e.location, &module.location));

            let reused = match scan_reason(full_scan, cached, module, &self.file.changed_unknown_locations) {
                Some(reason) => {
                    debug!("Scanning {} ({reason})", module.name);
                    None
                }
                None => cached.and_then(|entry| resolve_cached(host, module, &entry.type_names)),
            };

            let types = match reused {
                Some(types) => types,
                None => {
                    report.scanned.push(module.name.clone());
                    accept(host.scan(module), module, &mut report.errors)
                }
            };

            report
                .descriptors
                .extend(types.iter().map(|t| SettingsDescriptor::from_scanned(t, module)));
            entries.push(CacheEntry {
                location: module.location.clone(),
                type_names: types.into_iter().map(|t| t.type_name).collect(),
                needs_scan: false,
                fingerprint: module.fingerprint.clone(),
            });
        }

        let pruned = self
            .file
            .assemblies
            .iter()
            .filter(|old| !entries.iter().any(|e| e.location == old.location))
            .count();
        if pruned > 0 {
            debug!("Pruned {pruned} stale discovery cache entries");
        }

        self.file = CacheFile {
            needs_full_scan: false,
            assemblies: entries,
            changed_unknown_locations: Vec::new(),
        };
        report
            .descriptors
            .sort_by(|a, b| a.type_name.cmp(&b.type_name).then_with(|| a.module.cmp(&b.module)));

        if !report.scanned.is_empty() {
            info!(
                "Discovered {} settings kind(s); scanned {} of {} module(s)",
                report.descriptors.len(),
                report.scanned.len(),
                modules.len()
            );
        }
        self.persist_or_warn();
        report
    }

    /// Mark the module at `location` for rescanning.
    ///
    /// Matching is by path suffix, so a relative build-output path finds the
    /// absolute location recorded in the cache. Unknown locations are kept
    /// until the next pass.
    pub fn notify_compiled(&mut self, location: &Path) {
        match self
            .file
            .assemblies
            .iter_mut()
            .find(|e| location_matches(&e.location, location))
        {
            Some(entry) => {
                debug!("Module at {} recompiled", entry.location.display());
                entry.needs_scan = true;
            }
            None => {
                if !self
                    .file
                    .changed_unknown_locations
                    .iter()
                    .any(|l| l == location)
                {
                    debug!("Recompiled module at {} is not cached yet", location.display());
                    self.file.changed_unknown_locations.push(location.to_path_buf());
                }
            }
        }
        self.persist_or_warn();
    }

    /// Force a full scan on the next pass.
    pub fn invalidate(&mut self) {
        self.file.needs_full_scan = true;
    }

    /// Write the cache to its backing file, if any.
    pub fn persist(&self) -> Result<(), DiscoveryError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_vec_pretty(&self.file).map_err(|source| DiscoveryError::Parse {
            path: path.clone(),
            source,
        })?;
        write_atomic(path, &json).map_err(|e| DiscoveryError::Io {
            path: path.clone(),
            source: std::io::Error::other(e.to_string()),
        })
    }

    fn persist_or_warn(&self) {
        if let Err(e) = self.persist() {
            warn!("Failed to write discovery cache: {e}");
        }
    }
}

fn read_cache(path: &Path) -> Result<Option<CacheFile>, DiscoveryError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(DiscoveryError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|source| DiscoveryError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

/// Why `module` cannot be served from its cache entry, if it cannot.
fn scan_reason(
    full_scan: bool,
    cached: Option<&CacheEntry>,
    module: &ModuleInfo,
    changed_unknown: &[PathBuf],
) -> Option<&'static str> {
    if full_scan {
        return Some("full scan requested");
    }
    if changed_unknown
        .iter()
        .any(|l| location_matches(l, &module.location))
    {
        return Some("recompiled before it was cached");
    }
    let Some(entry) = cached else {
        return Some("not cached");
    };
    if entry.needs_scan {
        return Some("recompiled");
    }
    if module.fingerprint.is_some() && entry.fingerprint != module.fingerprint {
        return Some("fingerprint changed");
    }
    None
}

/// Cached type names resolved against the live module; `None` if any is gone.
fn resolve_cached(host: &dyn ModuleHost, module: &ModuleInfo, names: &[String]) -> Option<Vec<ScannedType>> {
    let mut types = Vec::with_capacity(names.len());
    for name in names {
        match host.resolve(module, name) {
            Some(t) if t.implements_settings && !t.custom_provider => types.push(t),
            _ => {
                debug!("Cached type {name} no longer resolves in {}; rescanning", module.name);
                return None;
            }
        }
    }
    Some(types)
}

/// Keep the scanned types that can be listed; report contract violations.
fn accept(scanned: Vec<ScannedType>, module: &ModuleInfo, errors: &mut Vec<SettingsError>) -> Vec<ScannedType> {
    let mut seen = HashSet::new();
    scanned
        .into_iter()
        .filter(|t| {
            if t.custom_provider {
                debug!("{} in {} lists itself; skipping", t.type_name, module.name);
                return false;
            }
            if !t.implements_settings {
                let err = SettingsError::DiscoveryScan {
                    module: module.name.clone(),
                    type_name: t.type_name.clone(),
                };
                error!("{err}");
                errors.push(err);
                return false;
            }
            seen.insert(t.type_name.clone())
        })
        .collect()
}

/// Modules that reference `declaring` directly or through other modules.
fn referencing_modules(modules: Vec<ModuleInfo>, declaring: &str) -> Vec<ModuleInfo> {
    let mut dependents: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, module) in modules.iter().enumerate() {
        for reference in &module.references {
            dependents.entry(reference.as_str()).or_default().push(i);
        }
    }

    let mut included = vec![false; modules.len()];
    let mut queue = VecDeque::from([declaring]);
    while let Some(name) = queue.pop_front() {
        for &i in dependents.get(name).into_iter().flatten() {
            if !included[i] {
                included[i] = true;
                queue.push_back(modules[i].name.as_str());
            }
        }
    }

    let skipped = included.iter().filter(|&&inc| !inc).count();
    if skipped > 0 {
        debug!("Skipping {skipped} module(s) that do not reference {declaring}");
    }
    modules
        .iter()
        .zip(&included)
        .filter(|(_, inc)| **inc)
        .map(|(m, _)| m.clone())
        .collect()
}

/// Same module location, tolerating absolute versus relative spellings.
fn location_matches(a: &Path, b: &Path) -> bool {
    a == b || a.ends_with(b) || b.ends_with(a)
}
