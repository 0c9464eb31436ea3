//! Settings registry and per-kind lifecycle
//!
//! Every kind is declared once at startup. Its record moves through
//! `Unresolved → Loading → Ready`: the first access loads (or creates) the
//! base instance and resolves overrides once before returning. Overrides only
//! apply while live mode is active and only to kinds declaring
//! [`Capability::Overridable`]. Leaving live mode reverts every kind to its
//! base instance.

use crate::config::RegistryConfig;
use crate::error::SettingsError;
use crate::kind::{Capability, KindDeclaration, Settings, short_type_name};
use crate::merge::{self, Resolution};
use crate::reload::{ExecutionContext, LiveReloadController, Reloadable, lock};
use crate::source::{Origin, OverrideSource, read_object_file};
use crate::store::{SettingsStore, write_atomic};
use serde_json::Value;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

static GLOBAL: OnceLock<SettingsRegistry> = OnceLock::new();

/// Where override files are looked up and which launch arguments apply
#[derive(Debug, Clone, Default)]
pub struct OverridePlan {
    pub override_dir: PathBuf,
    /// Multi-kind document read before per-kind files, selected by filename
    pub shared_file: Option<String>,
    pub args: Vec<String>,
}

impl OverridePlan {
    pub fn new(override_dir: impl Into<PathBuf>) -> Self {
        Self {
            override_dir: override_dir.into(),
            shared_file: None,
            args: Vec::new(),
        }
    }

    pub fn with_shared_file(mut self, name: impl Into<String>) -> Self {
        self.shared_file = Some(name.into());
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Ordered override sources for `kind`: shared file, own file, declared
    /// extra files, then the command line.
    pub fn sources_for(&self, kind: &KindDeclaration) -> Vec<OverrideSource> {
        let mut sources = Vec::new();
        if let Some(shared) = &self.shared_file {
            sources.push(OverrideSource::file_with_selector(
                self.override_dir.join(shared),
                kind.filename(),
            ));
        }
        sources.push(OverrideSource::file(
            self.override_dir.join(format!("{}.json", kind.filename())),
        ));
        for extra in &kind.override_files {
            let path = self.resolve_path(&extra.path);
            sources.push(match &extra.selector {
                Some(selector) => OverrideSource::file_with_selector(path, selector.clone()),
                None => OverrideSource::file(path),
            });
        }
        if !self.args.is_empty() {
            sources.push(OverrideSource::command_line(self.args.iter().cloned()));
        }
        sources
    }

    /// `path` made absolute against the override directory.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.override_dir.join(path)
        }
    }
}

/// Externally visible lifecycle state of a kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindState {
    Unresolved,
    Loading,
    Ready { overridden: bool },
}

struct Environment {
    store: SettingsStore,
    plan: OverridePlan,
    live: AtomicBool,
    watch: bool,
}

struct ReadyState<T> {
    base: Arc<T>,
    active: Arc<T>,
    provenance: Vec<Origin>,
    dirty: bool,
    warnings: Vec<String>,
}

enum Lifecycle<T> {
    Unresolved,
    Loading,
    Ready(ReadyState<T>),
}

struct KindCell<T: Settings> {
    declaration: KindDeclaration,
    env: Arc<Environment>,
    init_lock: Mutex<()>,
    state: Mutex<Lifecycle<T>>,
}

impl<T: Settings> KindCell<T> {
    fn new(declaration: KindDeclaration, env: Arc<Environment>) -> Self {
        Self {
            declaration,
            env,
            init_lock: Mutex::new(()),
            state: Mutex::new(Lifecycle::Unresolved),
        }
    }

    fn overrides_apply(&self) -> bool {
        self.env.live.load(Ordering::SeqCst) && self.declaration.has(Capability::Overridable)
    }

    fn sources(&self) -> Vec<OverrideSource> {
        if self.overrides_apply() {
            self.env.plan.sources_for(&self.declaration)
        } else {
            Vec::new()
        }
    }

    fn active(&self) -> Arc<T> {
        if let Lifecycle::Ready(ready) = &*lock(&self.state) {
            return Arc::clone(&ready.active);
        }
        self.with_ready(|ready| Arc::clone(&ready.active))
    }

    /// Run `f` on the ready state, loading the kind first if needed.
    fn with_ready<R>(&self, f: impl FnOnce(&mut ReadyState<T>) -> R) -> R {
        let _init = lock(&self.init_lock);
        let mut state = lock(&self.state);
        let previous = std::mem::replace(&mut *state, Lifecycle::Loading);
        let mut ready = match previous {
            Lifecycle::Ready(ready) => ready,
            Lifecycle::Unresolved | Lifecycle::Loading => {
                drop(state);
                let ready = self.load();
                state = lock(&self.state);
                ready
            }
        };
        let out = f(&mut ready);
        *state = Lifecycle::Ready(ready);
        out
    }

    fn load(&self) -> ReadyState<T> {
        let loaded = self.env.store.load::<T>(&self.declaration);
        debug!(
            "Base instance for {} from {} ({:?})",
            self.declaration.type_name,
            loaded.path.display(),
            loaded.source
        );
        self.resolve(Arc::new(loaded.value), false, false)
    }

    fn resolve(&self, base: Arc<T>, dirty: bool, replacing: bool) -> ReadyState<T> {
        let Resolution {
            instance,
            provenance,
            warnings,
        } = merge::resolve(&base, &self.declaration, &self.sources());

        if !provenance.is_empty() {
            let origins: Vec<String> = provenance.iter().map(ToString::to_string).collect();
            info!(
                "{} {} runtime instance with overrides from {}",
                if replacing { "Updated" } else { "Created" },
                self.declaration.type_name,
                origins.join(", ")
            );
        }

        ReadyState {
            base,
            active: instance,
            provenance,
            dirty,
            warnings: warnings.iter().map(ToString::to_string).collect(),
        }
    }

    /// Replace the base through `f`, returning whether it changed.
    fn replace_base(&self, f: impl FnOnce(&T) -> T) -> bool {
        self.with_ready(|ready| {
            let mut next = f(&ready.base);
            next.validate();
            if next == *ready.base {
                return false;
            }
            *ready = self.resolve(Arc::new(next), true, true);
            true
        })
    }

    fn require(&self, capability: Capability) -> Result<(), SettingsError> {
        if self.declaration.has(capability) {
            Ok(())
        } else {
            Err(SettingsError::Unsupported {
                type_name: self.declaration.type_name.clone(),
                capability,
            })
        }
    }

    /// Path for exports and imports; defaults to `<override_dir>/<filename>.json`.
    fn exchange_path(&self, path: Option<&Path>) -> PathBuf {
        match path {
            Some(path) => {
                let mut path = self.env.plan.resolve_path(path);
                if path.extension().is_none() {
                    path.set_extension("json");
                }
                path
            }
            None => self
                .env
                .plan
                .override_dir
                .join(format!("{}.json", self.declaration.filename())),
        }
    }
}

impl<T: Settings> Reloadable for KindCell<T> {
    fn name(&self) -> &str {
        &self.declaration.type_name
    }

    fn reload(&self) {
        let _init = lock(&self.init_lock);
        let (base, dirty) = match &*lock(&self.state) {
            Lifecycle::Ready(ready) => (Arc::clone(&ready.base), ready.dirty),
            _ => return,
        };
        let next = self.resolve(base, dirty, true);
        *lock(&self.state) = Lifecycle::Ready(next);
    }
}

/// Type-erased view of a kind record
trait ErasedKind: Send + Sync {
    fn declaration(&self) -> &KindDeclaration;
    fn state(&self) -> KindState;
    fn reload_now(&self);
    fn revert(&self);
    fn active_json(&self) -> Result<Value, SettingsError>;
    fn save_if_dirty(&self) -> Result<bool, SettingsError>;
    fn watched_files(&self) -> Vec<PathBuf>;
    fn reloadable(self: Arc<Self>) -> Arc<dyn Reloadable>;
}

impl<T: Settings> ErasedKind for KindCell<T> {
    fn declaration(&self) -> &KindDeclaration {
        &self.declaration
    }

    fn state(&self) -> KindState {
        match &*lock(&self.state) {
            Lifecycle::Unresolved => KindState::Unresolved,
            Lifecycle::Loading => KindState::Loading,
            Lifecycle::Ready(ready) => KindState::Ready {
                overridden: !Arc::ptr_eq(&ready.base, &ready.active),
            },
        }
    }

    fn reload_now(&self) {
        self.reload();
    }

    fn revert(&self) {
        let _init = lock(&self.init_lock);
        if let Lifecycle::Ready(ready) = &mut *lock(&self.state)
            && !Arc::ptr_eq(&ready.base, &ready.active)
        {
            ready.active = Arc::clone(&ready.base);
            ready.provenance.clear();
            ready.warnings.clear();
            info!("Reverted {} to its base instance", self.declaration.type_name);
        }
    }

    fn active_json(&self) -> Result<Value, SettingsError> {
        serde_json::to_value(self.active().as_ref()).map_err(|source| SettingsError::Serialization {
            kind: self.declaration.type_name.clone(),
            source,
        })
    }

    fn save_if_dirty(&self) -> Result<bool, SettingsError> {
        let _init = lock(&self.init_lock);
        let mut state = lock(&self.state);
        let Lifecycle::Ready(ready) = &mut *state else {
            return Ok(false);
        };
        if !ready.dirty {
            return Ok(false);
        }
        self.env.store.save(&self.declaration, ready.base.as_ref())?;
        ready.dirty = false;
        Ok(true)
    }

    fn watched_files(&self) -> Vec<PathBuf> {
        self.env
            .plan
            .sources_for(&self.declaration)
            .iter()
            .filter_map(|s| s.file_path().map(Path::to_path_buf))
            .collect()
    }

    fn reloadable(self: Arc<Self>) -> Arc<dyn Reloadable> {
        self
    }
}

struct Registered {
    typed: Arc<dyn Any + Send + Sync>,
    erased: Arc<dyn ErasedKind>,
}

/// Process-wide owner of settings kinds
pub struct SettingsRegistry {
    env: Arc<Environment>,
    kinds: RwLock<HashMap<TypeId, Registered>>,
    live: Mutex<Option<LiveReloadController>>,
}

impl SettingsRegistry {
    pub fn new(store: SettingsStore, plan: OverridePlan) -> Self {
        Self::build(store, plan, true)
    }

    /// Registry laid out per `config`, with `args` as command-line overrides.
    pub fn from_config<I, S>(config: &RegistryConfig, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut plan = OverridePlan::new(&config.override_dir).with_args(args);
        plan.shared_file = config.shared_file.clone();
        Self::build(
            SettingsStore::new(&config.root, &config.environment_id),
            plan,
            config.watch,
        )
    }

    fn build(store: SettingsStore, plan: OverridePlan, watch: bool) -> Self {
        Self {
            env: Arc::new(Environment {
                store,
                plan,
                live: AtomicBool::new(false),
                watch,
            }),
            kinds: RwLock::new(HashMap::new()),
            live: Mutex::new(None),
        }
    }

    /// Install `registry` as the process-wide instance.
    ///
    /// Hands the registry back if one was already installed.
    pub fn install(registry: SettingsRegistry) -> Result<(), SettingsRegistry> {
        GLOBAL.set(registry)
    }

    pub fn global() -> Option<&'static SettingsRegistry> {
        GLOBAL.get()
    }

    pub fn store(&self) -> &SettingsStore {
        &self.env.store
    }

    pub fn plan(&self) -> &OverridePlan {
        &self.env.plan
    }

    /// Declare `T` as a settings kind. Returns `false` if `T` or its name is
    /// already taken; the first declaration stays in force.
    pub fn declare<T: Settings>(&self, declaration: KindDeclaration) -> bool {
        let mut kinds = self.write_kinds();
        if kinds.contains_key(&TypeId::of::<T>()) {
            warn!("{} is already declared; ignoring redeclaration", declaration.type_name);
            return false;
        }
        if kinds
            .values()
            .any(|r| r.erased.declaration().type_name == declaration.type_name)
        {
            warn!(
                "Another type is already declared as {}; ignoring declaration of {}",
                declaration.type_name,
                std::any::type_name::<T>()
            );
            return false;
        }

        debug!(
            "Declared settings kind {} ({:?}, {:?})",
            declaration.type_name, declaration.usage, declaration.capabilities
        );
        let cell = Arc::new(KindCell::<T>::new(declaration, Arc::clone(&self.env)));
        kinds.insert(
            TypeId::of::<T>(),
            Registered {
                typed: cell.clone(),
                erased: cell,
            },
        );
        true
    }

    /// Declarations of every registered kind, sorted by type name.
    pub fn kinds(&self) -> Vec<KindDeclaration> {
        let mut kinds: Vec<KindDeclaration> = self
            .read_kinds()
            .values()
            .map(|r| r.erased.declaration().clone())
            .collect();
        kinds.sort_by(|a, b| a.type_name.cmp(&b.type_name));
        kinds
    }

    /// Active instance of `T`, loading and resolving it on first access.
    pub fn get_active<T: Settings>(&self) -> Result<Arc<T>, SettingsError> {
        Ok(self.cell::<T>()?.active())
    }

    /// Base instance of `T`, without overrides.
    pub fn base<T: Settings>(&self) -> Result<Arc<T>, SettingsError> {
        Ok(self.cell::<T>()?.with_ready(|ready| Arc::clone(&ready.base)))
    }

    /// Origins applied to the current active instance, in order.
    pub fn provenance<T: Settings>(&self) -> Result<Vec<Origin>, SettingsError> {
        Ok(self.cell::<T>()?.with_ready(|ready| ready.provenance.clone()))
    }

    /// Warnings recorded by the last resolution of `T`.
    pub fn last_warnings<T: Settings>(&self) -> Result<Vec<String>, SettingsError> {
        Ok(self.cell::<T>()?.with_ready(|ready| ready.warnings.clone()))
    }

    pub fn state<T: Settings>(&self) -> Result<KindState, SettingsError> {
        Ok(self.cell::<T>()?.state())
    }

    /// Mutate the base instance of `T`.
    ///
    /// Runs [`Settings::validate`] afterwards and re-resolves overrides on top
    /// of the new base. Returns whether the base changed; a changed base is
    /// dirty until saved.
    pub fn modify<T: Settings>(&self, f: impl FnOnce(&mut T)) -> Result<bool, SettingsError> {
        let cell = self.cell::<T>()?;
        Ok(cell.replace_base(|base| {
            let mut next = base.clone();
            f(&mut next);
            next
        }))
    }

    pub fn is_dirty<T: Settings>(&self) -> Result<bool, SettingsError> {
        Ok(self.cell::<T>()?.with_ready(|ready| ready.dirty))
    }

    /// Persist the base instance of `T` now.
    pub fn save<T: Settings>(&self) -> Result<PathBuf, SettingsError> {
        let cell = self.cell::<T>()?;
        cell.with_ready(|ready| {
            let path = self.env.store.save(&cell.declaration, ready.base.as_ref())?;
            ready.dirty = false;
            Ok(path)
        })
    }

    /// Persist every dirty kind. Returns how many were written.
    ///
    /// All kinds are attempted; the first failure is returned.
    pub fn save_dirty(&self) -> Result<usize, SettingsError> {
        let kinds: Vec<Arc<dyn ErasedKind>> =
            self.read_kinds().values().map(|r| Arc::clone(&r.erased)).collect();

        let mut saved = 0;
        let mut first_error = None;
        for kind in kinds {
            match kind.save_if_dirty() {
                Ok(true) => saved += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!("Failed to save {}: {e}", kind.declaration().type_name);
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(saved),
        }
    }

    /// Delete the stored base of `T`. The next access creates a fresh one.
    pub fn delete_base<T: Settings>(&self) -> Result<bool, SettingsError> {
        let cell = self.cell::<T>()?;
        let _init = lock(&cell.init_lock);
        let removed = self.env.store.delete::<T>(&cell.declaration)?;
        *lock(&cell.state) = Lifecycle::Unresolved;
        info!("Deleted base instance of {}", cell.declaration.type_name);
        Ok(removed)
    }

    /// Export the active instance of `T` as JSON, minus transient fields.
    ///
    /// `path` defaults to `<override_dir>/<filename>.json`; relative paths are
    /// taken from the override directory and `.json` is appended when missing.
    pub fn save_as_file<T: Settings>(&self, path: Option<&Path>) -> Result<PathBuf, SettingsError> {
        let cell = self.cell::<T>()?;
        cell.require(Capability::Serializable)?;
        let path = cell.exchange_path(path);

        let mut value = serde_json::to_value(cell.active().as_ref()).map_err(|source| {
            SettingsError::Serialization {
                kind: cell.declaration.type_name.clone(),
                source,
            }
        })?;
        if let Value::Object(map) = &mut value {
            for field in &cell.declaration.transient_fields {
                map.remove(field);
            }
        }
        let json = serde_json::to_string_pretty(&value).map_err(|source| SettingsError::Serialization {
            kind: cell.declaration.type_name.clone(),
            source,
        })?;
        write_atomic(&path, json.as_bytes())?;
        info!("Saved {} to {}", cell.declaration.type_name, path.display());
        Ok(path)
    }

    /// Import a JSON file into the base instance of `T`.
    ///
    /// Each top-level field in the file replaces the base's field as a whole;
    /// transient fields are ignored. Returns `Ok(false)` when the file does
    /// not exist or changes nothing.
    pub fn load_from_file<T: Settings>(&self, path: Option<&Path>) -> Result<bool, SettingsError> {
        let cell = self.cell::<T>()?;
        cell.require(Capability::Serializable)?;
        let path = cell.exchange_path(path);

        let Some(document) = read_object_file(&path)? else {
            warn!("No {} settings to load at {}", cell.declaration.type_name, path.display());
            return Ok(false);
        };

        // Skipped fields are logged by the merge engine.
        let changed =
            cell.replace_base(|base| merge::replace_fields(base, &cell.declaration, &document).0);
        if changed {
            info!("Loaded {} from {}", cell.declaration.type_name, path.display());
        }
        Ok(changed)
    }

    /// Start an override session on `context`.
    ///
    /// Kinds already resolved are re-resolved with overrides now; kinds with
    /// the `LiveReload` capability get their override files watched.
    pub fn enter_live_mode(&self, context: Arc<dyn ExecutionContext>) {
        let mut live = lock(&self.live);
        if live.is_some() {
            debug!("Live mode already active");
            return;
        }
        self.env.live.store(true, Ordering::SeqCst);

        let kinds: Vec<Arc<dyn ErasedKind>> =
            self.read_kinds().values().map(|r| Arc::clone(&r.erased)).collect();

        let mut controller = LiveReloadController::new(context);
        for kind in kinds {
            kind.reload_now();
            let declaration = kind.declaration();
            if !self.env.watch || !declaration.has(Capability::LiveReload) {
                continue;
            }
            let files = kind.watched_files();
            let name = declaration.type_name.clone();
            if let Err(e) = controller.watch(kind.reloadable(), &files) {
                warn!("Cannot watch override files for {name}: {e}");
            }
        }
        info!("Entered live mode");
        *live = Some(controller);
    }

    /// End the override session. Watches stop before this returns and every
    /// kind reverts to its base instance.
    pub fn exit_live_mode(&self) {
        let mut live = lock(&self.live);
        let Some(mut controller) = live.take() else {
            return;
        };
        controller.shutdown();
        self.env.live.store(false, Ordering::SeqCst);

        for registered in self.read_kinds().values() {
            registered.erased.revert();
        }
        info!("Exited live mode");
    }

    pub fn is_live(&self) -> bool {
        self.env.live.load(Ordering::SeqCst)
    }

    /// Kinds whose override files are currently watched.
    pub fn watched_kinds(&self) -> Vec<String> {
        lock(&self.live)
            .as_ref()
            .map(|c| c.watched_kinds().into_iter().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Active instance of the kind named `type_name`, as JSON.
    pub fn active_json(&self, type_name: &str) -> Result<Value, SettingsError> {
        let erased = self
            .read_kinds()
            .values()
            .find(|r| r.erased.declaration().answers_to(type_name))
            .map(|r| Arc::clone(&r.erased))
            .ok_or_else(|| SettingsError::MissingDeclaration {
                type_name: type_name.to_string(),
            })?;
        erased.active_json()
    }

    fn cell<T: Settings>(&self) -> Result<Arc<KindCell<T>>, SettingsError> {
        let typed = self
            .read_kinds()
            .get(&TypeId::of::<T>())
            .map(|r| Arc::clone(&r.typed))
            .ok_or_else(|| SettingsError::MissingDeclaration {
                type_name: short_type_name::<T>().to_string(),
            })?;
        typed
            .downcast::<KindCell<T>>()
            .map_err(|_| SettingsError::TypeMismatch {
                type_name: short_type_name::<T>().to_string(),
            })
    }

    fn read_kinds(&self) -> RwLockReadGuard<'_, HashMap<TypeId, Registered>> {
        self.kinds.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_kinds(&self) -> RwLockWriteGuard<'_, HashMap<TypeId, Registered>> {
        self.kinds.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SettingsRegistry {
    fn drop(&mut self) {
        if let Some(mut controller) = lock(&self.live).take() {
            controller.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::SettingsUsage;
    use crate::reload::QueueContext;
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    struct Audio {
        id: String,
        volume: u32,
        muted: bool,
    }

    impl Default for Audio {
        fn default() -> Self {
            Self {
                id: "audio".to_string(),
                volume: 50,
                muted: false,
            }
        }
    }

    impl Settings for Audio {
        fn validate(&mut self) {
            self.volume = self.volume.min(100);
        }
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Unrelated {
        flag: bool,
    }

    impl Settings for Unrelated {}

    fn registry(dir: &TempDir, args: &[&str]) -> SettingsRegistry {
        let plan = OverridePlan::new(dir.path().join("overrides"))
            .with_shared_file("Settings.json")
            .with_args(args.iter().copied());
        SettingsRegistry::new(SettingsStore::new(dir.path(), "checkout"), plan)
    }

    fn declare_audio(registry: &SettingsRegistry) {
        assert!(registry.declare::<Audio>(
            KindDeclaration::runtime_project::<Audio>()
                .allow_live_reload()
                .with_transient_field("id")
        ));
    }

    #[test]
    fn test_missing_declaration() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir, &[]);
        let err = registry.get_active::<Unrelated>().unwrap_err();
        assert!(matches!(err, SettingsError::MissingDeclaration { ref type_name } if type_name == "Unrelated"));
    }

    #[test]
    fn test_redeclaration_is_rejected() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir, &[]);
        declare_audio(&registry);
        assert!(!registry.declare::<Audio>(KindDeclaration::editor_user::<Audio>()));
        assert!(!registry.declare::<Unrelated>(KindDeclaration::new("Audio", SettingsUsage::EditorUser)));
        assert_eq!(registry.kinds().len(), 1);
        assert_eq!(registry.kinds()[0].usage, SettingsUsage::RuntimeProject);
    }

    #[test]
    fn test_first_access_creates_and_persists_base() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir, &[]);
        declare_audio(&registry);

        assert_eq!(registry.state::<Audio>().unwrap(), KindState::Unresolved);
        let active = registry.get_active::<Audio>().unwrap();
        assert_eq!(*active, Audio::default());
        assert_eq!(
            registry.state::<Audio>().unwrap(),
            KindState::Ready { overridden: false }
        );
        assert!(dir.path().join("Settings/Resources/Audio.json").exists());
        assert!(Arc::ptr_eq(&active, &registry.base::<Audio>().unwrap()));
    }

    #[test]
    fn test_overrides_ignored_outside_live_mode() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir, &["-s:Audio.volume=80"]);
        declare_audio(&registry);

        assert_eq!(registry.get_active::<Audio>().unwrap().volume, 50);
        assert!(registry.provenance::<Audio>().unwrap().is_empty());
    }

    #[test]
    fn test_live_mode_applies_and_exit_reverts() {
        let dir = TempDir::new().unwrap();
        let overrides = dir.path().join("overrides");
        std::fs::create_dir_all(&overrides).unwrap();
        std::fs::write(overrides.join("Audio.json"), r#"{"muted": true}"#).unwrap();

        let registry = registry(&dir, &["-s:Audio.volume=80"]);
        declare_audio(&registry);
        assert_eq!(registry.get_active::<Audio>().unwrap().volume, 50);

        let context = QueueContext::new();
        registry.enter_live_mode(context.clone());
        assert!(registry.is_live());

        let active = registry.get_active::<Audio>().unwrap();
        assert_eq!(active.volume, 80);
        assert!(active.muted);
        assert_eq!(
            registry.provenance::<Audio>().unwrap(),
            vec![Origin::File(overrides.join("Audio.json")), Origin::CommandLine]
        );
        assert_eq!(
            registry.state::<Audio>().unwrap(),
            KindState::Ready { overridden: true }
        );
        assert_eq!(registry.watched_kinds(), vec!["Audio".to_string()]);

        registry.exit_live_mode();
        assert!(!registry.is_live());
        assert!(registry.watched_kinds().is_empty());
        let reverted = registry.get_active::<Audio>().unwrap();
        assert!(Arc::ptr_eq(&reverted, &registry.base::<Audio>().unwrap()));
        assert!(registry.provenance::<Audio>().unwrap().is_empty());
        // Base was never touched by overrides.
        assert_eq!(reverted.volume, 50);
    }

    #[test]
    fn test_non_overridable_kind_ignores_overrides() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir, &["-s:Unrelated.flag=true"]);
        registry.declare::<Unrelated>(KindDeclaration::editor_project::<Unrelated>());
        registry.enter_live_mode(QueueContext::new());
        assert!(!registry.get_active::<Unrelated>().unwrap().flag);
    }

    #[test]
    fn test_modify_validates_and_marks_dirty() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir, &[]);
        declare_audio(&registry);

        assert!(registry.modify::<Audio>(|a| a.volume = 250).unwrap());
        assert_eq!(registry.get_active::<Audio>().unwrap().volume, 100);
        assert!(registry.is_dirty::<Audio>().unwrap());

        assert!(!registry.modify::<Audio>(|a| a.volume = 100).unwrap());

        assert_eq!(registry.save_dirty().unwrap(), 1);
        assert!(!registry.is_dirty::<Audio>().unwrap());
        assert_eq!(registry.save_dirty().unwrap(), 0);

        let stored: Audio = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("Settings/Resources/Audio.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(stored.volume, 100);
    }

    #[test]
    fn test_modify_keeps_overrides_on_top() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir, &["-s:Audio.volume=80"]);
        declare_audio(&registry);
        registry.enter_live_mode(QueueContext::new());

        registry.modify::<Audio>(|a| a.muted = true).unwrap();
        let active = registry.get_active::<Audio>().unwrap();
        assert!(active.muted);
        assert_eq!(active.volume, 80);
        assert_eq!(registry.base::<Audio>().unwrap().volume, 50);
    }

    #[test]
    fn test_save_as_file_then_load_from_file() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir, &[]);
        declare_audio(&registry);
        registry
            .modify::<Audio>(|a| {
                a.id = "custom".to_string();
                a.volume = 7;
                a.muted = true;
            })
            .unwrap();

        let path = registry.save_as_file::<Audio>(Some(Path::new("export"))).unwrap();
        assert_eq!(path, dir.path().join("overrides/export.json"));
        let exported: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(exported.get("id").is_none());

        let fresh_dir = TempDir::new().unwrap();
        let fresh = registry_at(&fresh_dir);
        declare_audio(&fresh);
        assert!(fresh.load_from_file::<Audio>(Some(&path)).unwrap());
        let loaded = fresh.get_active::<Audio>().unwrap();
        assert_eq!(loaded.volume, 7);
        assert!(loaded.muted);
        assert_eq!(loaded.id, "audio");
        assert!(fresh.is_dirty::<Audio>().unwrap());
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    struct Keys {
        bindings: std::collections::BTreeMap<String, String>,
        layout: String,
    }

    impl Default for Keys {
        fn default() -> Self {
            Self {
                bindings: [("jump".to_string(), "space".to_string())].into_iter().collect(),
                layout: "qwerty".to_string(),
            }
        }
    }

    impl Settings for Keys {}

    #[test]
    fn test_load_from_file_restores_removed_map_keys() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir, &[]);
        registry.declare::<Keys>(KindDeclaration::editor_user::<Keys>());
        registry
            .modify::<Keys>(|k| {
                k.bindings.clear();
                k.bindings.insert("fire".to_string(), "mouse1".to_string());
            })
            .unwrap();
        let saved = registry.get_active::<Keys>().unwrap();
        let path = registry.save_as_file::<Keys>(None).unwrap();

        let fresh_dir = TempDir::new().unwrap();
        let fresh = registry_at(&fresh_dir);
        fresh.declare::<Keys>(KindDeclaration::editor_user::<Keys>());
        assert!(fresh.load_from_file::<Keys>(Some(&path)).unwrap());
        assert_eq!(*fresh.get_active::<Keys>().unwrap(), *saved);
        assert!(!fresh.get_active::<Keys>().unwrap().bindings.contains_key("jump"));
    }

    #[test]
    fn test_load_from_file_applies_empty_map() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir, &[]);
        registry.declare::<Keys>(KindDeclaration::editor_user::<Keys>());
        registry.modify::<Keys>(|k| k.bindings.clear()).unwrap();
        let path = registry.save_as_file::<Keys>(None).unwrap();

        let fresh_dir = TempDir::new().unwrap();
        let fresh = registry_at(&fresh_dir);
        fresh.declare::<Keys>(KindDeclaration::editor_user::<Keys>());
        assert!(fresh.load_from_file::<Keys>(Some(&path)).unwrap());
        let loaded = fresh.get_active::<Keys>().unwrap();
        assert!(loaded.bindings.is_empty());
        assert_eq!(loaded.layout, "qwerty");
    }

    fn registry_at(dir: &TempDir) -> SettingsRegistry {
        SettingsRegistry::new(
            SettingsStore::new(dir.path(), "checkout"),
            OverridePlan::new(dir.path()),
        )
    }

    #[test]
    fn test_load_from_missing_file() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir, &[]);
        declare_audio(&registry);
        assert!(!registry.load_from_file::<Audio>(None).unwrap());
    }

    #[test]
    fn test_file_exchange_requires_serializable() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir, &[]);
        let mut declaration = KindDeclaration::editor_user::<Unrelated>();
        declaration.capabilities.clear();
        registry.declare::<Unrelated>(declaration);

        let err = registry.save_as_file::<Unrelated>(None).unwrap_err();
        assert!(matches!(
            err,
            SettingsError::Unsupported {
                capability: Capability::Serializable,
                ..
            }
        ));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_delete_base_resets_lifecycle() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir, &[]);
        declare_audio(&registry);
        registry.modify::<Audio>(|a| a.volume = 10).unwrap();
        registry.save::<Audio>().unwrap();

        assert!(registry.delete_base::<Audio>().unwrap());
        assert_eq!(registry.state::<Audio>().unwrap(), KindState::Unresolved);
        assert_eq!(registry.get_active::<Audio>().unwrap().volume, 50);
    }

    #[test]
    fn test_shared_file_selects_kind_tree() {
        let dir = TempDir::new().unwrap();
        let overrides = dir.path().join("overrides");
        std::fs::create_dir_all(&overrides).unwrap();
        std::fs::write(
            overrides.join("Settings.json"),
            r#"{"Audio": {"volume": 11}, "Video": {"fps": 30}}"#,
        )
        .unwrap();

        let registry = registry(&dir, &[]);
        declare_audio(&registry);
        registry.enter_live_mode(QueueContext::new());
        assert_eq!(registry.get_active::<Audio>().unwrap().volume, 11);
        assert!(registry.last_warnings::<Audio>().unwrap().is_empty());
    }

    #[test]
    fn test_active_json_by_name() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir, &[]);
        declare_audio(&registry);
        let json = registry.active_json("Audio").unwrap();
        assert_eq!(json["volume"], 50);
        assert!(registry.active_json("Video").is_err());
    }
}
