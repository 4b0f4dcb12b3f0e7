//! `WorkspaceMirror` facade: initial scan, watch handlers, editor mirroring.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use ignore::WalkBuilder;
use lspbridge_config::WorkspaceConfig;
use lspbridge_types::{FilesAccessor, WorkspaceMapping, now_millis, system_time_millis};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, trace, warn};

use crate::error::MirrorError;
use crate::filter::PathFilter;
use crate::store::{DiskInstall, FileStore};
use crate::watch::{WatchAction, actions_for};

/// Outcome of the initial workspace scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Files installed in the mapping.
    pub loaded: usize,
    /// Matching entries that could not be read (logged and skipped).
    pub failed: usize,
}

/// State shared between the mirror and its watcher callback.
struct Shared {
    filter: PathFilter,
    store: FileStore,
    respect_ignore_files: bool,
}

/// In-memory mirror of the workspace's tracked source files.
///
/// Writes come from the initial scan, the filesystem watcher thread, and
/// editor buffer changes. They are not ordered against each other beyond
/// "last write wins per path", with one exception: a disk load never
/// replaces a newer unsaved editor edit.
pub struct WorkspaceMirror {
    shared: Arc<Shared>,
    watcher: Mutex<Option<RecommendedWatcher>>,
    initialized: AtomicBool,
}

impl WorkspaceMirror {
    /// Build a mirror rooted at `root`. Nothing is read until [`initialize`](Self::initialize).
    pub fn new(root: impl Into<PathBuf>, config: &WorkspaceConfig) -> Result<Self, MirrorError> {
        Ok(Self {
            shared: Arc::new(Shared {
                filter: PathFilter::new(root.into(), config)?,
                store: FileStore::default(),
                respect_ignore_files: config.respect_ignore_files,
            }),
            watcher: Mutex::new(None),
            initialized: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        self.shared.filter.root()
    }

    /// Start watching the root, then scan it.
    ///
    /// The watcher goes first so that changes made while the scan runs are
    /// not lost. Unreadable files are logged and skipped; only an
    /// inaccessible root or a watcher that cannot start is an error.
    pub fn initialize(&self) -> Result<ScanReport, MirrorError> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Err(MirrorError::AlreadyInitialized);
        }

        let root = self.root().to_path_buf();
        let metadata = fs::metadata(&root).map_err(|source| MirrorError::RootInaccessible {
            path: root.clone(),
            source,
        })?;
        if !metadata.is_dir() {
            return Err(MirrorError::RootInaccessible {
                path: root,
                source: io::Error::new(io::ErrorKind::NotADirectory, "not a directory"),
            });
        }

        self.start_watching()?;

        info!(root = %root.display(), "Scanning workspace");
        let report = self.shared.scan_dir(&root);
        info!(
            loaded = report.loaded,
            failed = report.failed,
            "Workspace scan complete"
        );
        Ok(report)
    }

    fn start_watching(&self) -> Result<(), MirrorError> {
        let root = self.root().to_path_buf();
        let shared = Arc::clone(&self.shared);
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
            match result {
                Ok(event) => shared.handle_event(&event),
                Err(e) => warn!("File watcher error: {e}"),
            }
        })
        .map_err(|source| MirrorError::Watch {
            path: root.clone(),
            source,
        })?;

        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|source| MirrorError::Watch {
                path: root.clone(),
                source,
            })?;
        debug!(root = %root.display(), "Watching workspace");

        *self.watcher.lock().unwrap_or_else(PoisonError::into_inner) = Some(watcher);
        Ok(())
    }

    /// Current snapshot of every tracked file. Never waits on a scan or reload.
    #[must_use]
    pub fn get_files(&self) -> WorkspaceMapping {
        self.shared.store.snapshot()
    }

    /// Pull accessor for the engine. Holds the mirror's state, not the mirror.
    #[must_use]
    pub fn files_accessor(&self) -> FilesAccessor {
        let shared = Arc::clone(&self.shared);
        Arc::new(move || shared.store.snapshot())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.store.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `path` (absolute, or workspace-relative) would be mirrored.
    #[must_use]
    pub fn is_tracked(&self, path: &Path) -> bool {
        self.shared.filter.tracked_key(path).is_some()
    }

    /// Mirror unsaved editor content for `path`, stamped with the current time.
    ///
    /// Any path inside the workspace is accepted, tracked extension or not;
    /// callers that only forward tracked documents filter first.
    pub fn update_file_content(&self, path: &Path, text: &str) -> Result<(), MirrorError> {
        let Some(key) = self.shared.filter.relative_key(path) else {
            return Err(MirrorError::OutsideWorkspace {
                path: path.to_path_buf(),
            });
        };
        let record = self.shared.store.install_edit(key, text.as_bytes().to_vec());
        trace!(
            path = %path.display(),
            len = record.len(),
            mod_time = record.mod_time(),
            "Mirrored editor content"
        );
        Ok(())
    }

    /// Watch handler: a tracked file (or a directory holding some) appeared.
    pub fn on_create(&self, path: &Path) {
        self.shared.apply(WatchAction::Create(self.shared.filter.resolve(path)));
    }

    /// Watch handler: a tracked file's content changed on disk.
    pub fn on_change(&self, path: &Path) {
        self.shared.apply(WatchAction::Change(self.shared.filter.resolve(path)));
    }

    /// Watch handler: a tracked file (or a directory holding some) was removed.
    pub fn on_delete(&self, path: &Path) {
        self.shared.apply(WatchAction::Delete(self.shared.filter.resolve(path)));
    }

    /// Apply a raw watcher event, as the watcher thread does.
    pub fn handle_event(&self, event: &notify::Event) {
        self.shared.handle_event(event);
    }

    /// Stop watching the filesystem. Idempotent; the mapping stays readable.
    pub fn dispose(&self) {
        let watcher = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(watcher) = watcher {
            drop(watcher);
            debug!(root = %self.root().display(), "File watcher released");
        }
    }
}

impl Drop for WorkspaceMirror {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl Shared {
    fn handle_event(&self, event: &notify::Event) {
        for action in actions_for(event) {
            self.apply(action);
        }
    }

    fn apply(&self, action: WatchAction) {
        match action {
            WatchAction::Create(path) => {
                if path.is_dir() {
                    if self.filter.is_scannable_dir(&path) {
                        let report = self.scan_dir(&path);
                        debug!(
                            path = %path.display(),
                            loaded = report.loaded,
                            "Scanned new directory"
                        );
                    }
                } else {
                    self.load_if_tracked(&path);
                }
            }
            WatchAction::Change(path) => self.load_if_tracked(&path),
            WatchAction::Delete(path) => self.remove(&path),
            WatchAction::Reconcile(path) => {
                if path.exists() {
                    self.apply(WatchAction::Create(path));
                } else {
                    self.remove(&path);
                }
            }
        }
    }

    fn load_if_tracked(&self, path: &Path) {
        if let Some(key) = self.filter.tracked_key(path) {
            // On failure the old record stays.
            self.load(path, key);
        }
    }

    fn remove(&self, path: &Path) {
        let Some(key) = self.filter.relative_key(path) else {
            return;
        };
        if self.store.remove(&key) {
            debug!(path = %key, "Removed file");
        }
        let removed = self.store.remove_dir(&key);
        if removed > 0 {
            debug!(path = %key, removed, "Removed directory");
        }
    }

    /// Read content and mtime, then install. Returns `false` if the file could not be read.
    fn load(&self, path: &Path, key: String) -> bool {
        let content = match fs::read(path) {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %path.display(), "Failed to load file: {e}");
                return false;
            }
        };
        let mod_time = match fs::metadata(path).and_then(|m| m.modified()) {
            Ok(modified) => system_time_millis(modified),
            Err(e) => {
                debug!(path = %path.display(), "No modification time, using now: {e}");
                now_millis()
            }
        };

        match self.store.install_disk(key, content, mod_time) {
            DiskInstall::Installed => trace!(path = %path.display(), "Loaded file"),
            DiskInstall::KeptEdit => debug!(
                path = %path.display(),
                "Kept newer editor content over on-disk version"
            ),
        }
        true
    }

    /// Recursively load every tracked file under `dir`.
    fn scan_dir(&self, dir: &Path) -> ScanReport {
        let mut builder = WalkBuilder::new(dir);
        builder
            .standard_filters(self.respect_ignore_files)
            .hidden(false)
            .require_git(false)
            .follow_links(false);

        let exclude_dirs = self.filter.exclude_dirs().clone();
        builder.filter_entry(move |entry| {
            let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
            !(is_dir
                && entry.depth() > 0
                && entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| exclude_dirs.contains(name)))
        });

        let mut report = ScanReport::default();
        for result in builder.build() {
            let entry = match result {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Failed to walk workspace entry: {e}");
                    report.failed += 1;
                    continue;
                }
            };
            let Some(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_dir() {
                continue;
            }
            let Some(key) = self.filter.tracked_key(entry.path()) else {
                continue;
            };
            if self.load(entry.path(), key) {
                report.loaded += 1;
            } else {
                report.failed += 1;
            }
        }
        report
    }
}
