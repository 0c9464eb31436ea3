//! Live reload of override files
//!
//! File-system events arrive on the watcher's own thread. They are never
//! acted on there: the re-resolution is posted to the [`ExecutionContext`]
//! that owns the settings, handed in explicitly when live mode starts.
//! Events for a kind that arrive before its posted task has run are folded
//! into that task.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::{BTreeSet, HashSet};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, channel};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Unit of work posted to an execution context
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// The context that owns a set of settings and runs their reloads.
pub trait ExecutionContext: Send + Sync {
    fn post(&self, task: Task);
}

impl ExecutionContext for Mutex<Sender<Task>> {
    fn post(&self, task: Task) {
        if lock(self).send(task).is_err() {
            warn!("Execution context is gone; dropping settings reload");
        }
    }
}

/// Task queue drained by the owning thread.
///
/// The owner calls [`QueueContext::run_pending`] from its loop (once per
/// frame, tick, or event-loop turn).
pub struct QueueContext {
    tx: Mutex<Sender<Task>>,
    rx: Mutex<Receiver<Task>>,
}

impl QueueContext {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = channel();
        Arc::new(Self {
            tx: Mutex::new(tx),
            rx: Mutex::new(rx),
        })
    }

    /// Run every task queued so far. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let tasks: Vec<Task> = lock(&self.rx).try_iter().collect();
        let count = tasks.len();
        for task in tasks {
            task();
        }
        count
    }

    /// Wait up to `timeout` for a task, then run everything queued.
    pub fn wait_and_run(&self, timeout: Duration) -> usize {
        let first = match lock(&self.rx).recv_timeout(timeout) {
            Ok(task) => task,
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return 0,
        };
        first();
        1 + self.run_pending()
    }
}

impl ExecutionContext for QueueContext {
    fn post(&self, task: Task) {
        self.tx.post(task);
    }
}

/// Something that can be re-resolved in place.
pub trait Reloadable: Send + Sync {
    fn name(&self) -> &str;
    fn reload(&self);
}

struct Shared {
    active: AtomicBool,
    pending: Mutex<HashSet<String>>,
}

/// Watches override files for the kinds registered with it.
pub struct LiveReloadController {
    context: Arc<dyn ExecutionContext>,
    shared: Arc<Shared>,
    watchers: Vec<(String, RecommendedWatcher)>,
}

impl LiveReloadController {
    pub fn new(context: Arc<dyn ExecutionContext>) -> Self {
        Self {
            context,
            shared: Arc::new(Shared {
                active: AtomicBool::new(true),
                pending: Mutex::new(HashSet::new()),
            }),
            watchers: Vec::new(),
        }
    }

    /// Watch the directories containing `files` on behalf of `target`.
    ///
    /// Returns the number of directories watched. Directories that do not
    /// exist are skipped.
    pub fn watch(&mut self, target: Arc<dyn Reloadable>, files: &[PathBuf]) -> notify::Result<usize> {
        let mut dirs = BTreeSet::new();
        let mut names = HashSet::new();
        for file in files {
            let Some(name) = file.file_name() else {
                continue;
            };
            let absolute = std::path::absolute(file).unwrap_or_else(|_| file.clone());
            let dir = absolute
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            names.insert(name.to_os_string());
            dirs.insert(dir);
        }

        let kind = target.name().to_string();
        let shared = Arc::clone(&self.shared);
        let context = Arc::clone(&self.context);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if touches(&event, &names) {
                    debug!("Override file event for {}: {:?}", target.name(), event.paths);
                    schedule(&shared, context.as_ref(), &target);
                }
            }
            Err(e) => error!("Override file watcher error: {e}"),
        })?;

        let mut watched = 0;
        for dir in &dirs {
            if !dir.is_dir() {
                debug!("Not watching missing override directory {}", dir.display());
                continue;
            }
            watcher.watch(dir, RecursiveMode::NonRecursive)?;
            watched += 1;
        }

        if watched > 0 {
            info!("Watching {watched} override location(s) for {kind}");
            self.watchers.push((kind, watcher));
        }
        Ok(watched)
    }

    /// Names of the kinds currently watched.
    pub fn watched_kinds(&self) -> Vec<&str> {
        self.watchers.iter().map(|(kind, _)| kind.as_str()).collect()
    }

    /// Stop all watches. Tasks already posted become no-ops.
    pub fn shutdown(&mut self) {
        self.shared.active.store(false, Ordering::SeqCst);
        let count = self.watchers.len();
        self.watchers.clear();
        lock(&self.shared.pending).clear();
        if count > 0 {
            info!("Stopped {count} override file watcher(s)");
        }
    }
}

impl Drop for LiveReloadController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Post a reload for `target` unless one is already waiting to run.
fn schedule(shared: &Arc<Shared>, context: &dyn ExecutionContext, target: &Arc<dyn Reloadable>) {
    if !shared.active.load(Ordering::SeqCst) {
        return;
    }
    let name = target.name().to_string();
    if !lock(&shared.pending).insert(name.clone()) {
        return;
    }

    let shared = Arc::clone(shared);
    let target = Arc::clone(target);
    context.post(Box::new(move || {
        lock(&shared.pending).remove(&name);
        if shared.active.load(Ordering::SeqCst) {
            target.reload();
        }
    }));
}

fn touches(event: &Event, names: &HashSet<OsString>) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) && event
        .paths
        .iter()
        .any(|p| p.file_name().is_some_and(|n| names.contains(n)))
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
