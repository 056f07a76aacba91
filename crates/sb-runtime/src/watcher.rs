//! Filesystem watcher driving hot reload
//!
//! Watches the scripts directory (recursively, which covers the `lib/`
//! subdirectory) and turns create/modify/delete events into reloads:
//! - a script change reloads just that automation id (a deleted file
//!   unloads it);
//! - any library change reloads the whole library set and then every loaded
//!   automation, since changed library symbols silently alter script
//!   behavior.
//!
//! Events are debounced briefly so editors that write in several steps
//! trigger one reload.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use sb_core::LogEntry;
use sb_library::LibraryManager;
use sb_script::SCRIPT_EXTENSION;
use tracing::{debug, info, warn};

use crate::runner::AutomationRuntime;

/// Debounce window applied after the first event of a burst.
const DEBOUNCE: Duration = Duration::from_millis(250);

/// A running filesystem watcher. Dropping it stops watching.
pub struct ScriptWatcher {
    _watcher: RecommendedWatcher,
    task: tokio::task::JoinHandle<()>,
}

impl ScriptWatcher {
    /// Start watching `runtime.scripts_dir()` and applying changes.
    ///
    /// `library_dir` is the library subdirectory inside the scripts
    /// directory. Must be called from within a tokio runtime.
    pub fn spawn(
        runtime: Arc<AutomationRuntime>,
        library: Arc<LibraryManager>,
        library_dir: PathBuf,
    ) -> notify::Result<Self> {
        let scripts_dir = runtime.scripts_dir().to_path_buf();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<PathBuf>();

        let mut watcher = recommended_watcher(move |result: notify::Result<Event>| {
            let Ok(event) = result else { return };
            if matches!(
                event.kind,
                EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
            ) {
                for path in event.paths {
                    let _ = tx.send(path);
                }
            }
        })?;
        watcher.watch(&scripts_dir, RecursiveMode::Recursive)?;
        info!(dir = %scripts_dir.display(), "watching for script changes");

        let task = tokio::spawn(async move {
            while let Some(first) = rx.recv().await {
                let mut pending: HashSet<PathBuf> = HashSet::new();
                pending.insert(first);
                loop {
                    match tokio::time::timeout(DEBOUNCE, rx.recv()).await {
                        Ok(Some(path)) => {
                            pending.insert(path);
                        }
                        _ => break,
                    }
                }
                apply_changes(&runtime, &library, &library_dir, &scripts_dir, pending).await;
            }
        });

        Ok(Self {
            _watcher: watcher,
            task,
        })
    }

    /// Stop applying changes.
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for ScriptWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn apply_changes(
    runtime: &AutomationRuntime,
    library: &LibraryManager,
    library_dir: &Path,
    scripts_dir: &Path,
    pending: HashSet<PathBuf>,
) {
    let mut library_changed = false;
    let mut scripts: Vec<PathBuf> = Vec::new();

    for path in pending {
        if path.extension().and_then(|e| e.to_str()) != Some(SCRIPT_EXTENSION) {
            continue;
        }
        if path.starts_with(library_dir) {
            library_changed = true;
        } else if path.parent() == Some(scripts_dir) {
            scripts.push(path);
        }
    }
    scripts.sort();

    if library_changed {
        match library.load_all(library_dir) {
            Ok(count) => {
                info!(modules = count, "library reloaded after file change");
                // Library symbols may have changed under loaded scripts.
                runtime.reload_all().await;
            }
            Err(err) => {
                warn!(%err, "library reload failed; previous module set stays live");
                runtime
                    .logs()
                    .add(LogEntry::error("library", format!("reload failed: {err}")));
            }
        }
    }

    for path in scripts {
        let Some(id) = path.file_stem().and_then(|s| s.to_str()).map(String::from) else {
            continue;
        };
        if path.is_file() {
            debug!(automation = %id, "script changed; reloading");
            if let Err(err) = runtime.load_file(&path).await {
                warn!(automation = %id, %err, "reload after file change failed");
                runtime
                    .logs()
                    .add(LogEntry::error(&id, format!("reload failed: {err}")));
            }
        } else {
            debug!(automation = %id, "script removed; unloading");
            runtime.unload(&id).await;
        }
    }
}
