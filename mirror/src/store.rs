//! The shared mapping and its replace-whole-record update rules.
//!
//! The mapping lives behind an `Arc` that is swapped copy-on-write, so a
//! snapshot handed to the engine never changes underneath it and taking one
//! only holds the lock long enough to clone a pointer.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use lspbridge_types::{FileRecord, RecordOrigin, WorkspaceMapping, now_millis};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DiskInstall {
    Installed,
    /// An unsaved editor edit newer than the on-disk mtime was kept.
    KeptEdit,
}

#[derive(Default)]
struct Inner {
    files: Arc<HashMap<String, FileRecord>>,
    last_revision: u64,
}

impl Inner {
    fn next_revision(&mut self) -> u64 {
        self.last_revision += 1;
        self.last_revision
    }
}

#[derive(Default)]
pub(crate) struct FileStore {
    inner: RwLock<Inner>,
}

impl FileStore {
    pub fn snapshot(&self) -> WorkspaceMapping {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        WorkspaceMapping::new(Arc::clone(&inner.files))
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .files
            .len()
    }

    /// Install content read from storage.
    ///
    /// A disk observation older than an editor edit of the same path is
    /// dropped: the watcher can deliver a change event for a save that the
    /// user has already typed past.
    pub fn install_disk(&self, key: String, content: Vec<u8>, mod_time: i64) -> DiskInstall {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = inner.files.get(&key)
            && existing.origin() == RecordOrigin::Editor
            && existing.mod_time() > mod_time
        {
            return DiskInstall::KeptEdit;
        }
        let revision = inner.next_revision();
        let record = FileRecord::new(content, mod_time, RecordOrigin::Disk).with_revision(revision);
        Arc::make_mut(&mut inner.files).insert(key, record);
        DiskInstall::Installed
    }

    /// Install editor buffer content stamped with the current time.
    ///
    /// The timestamp never moves backwards for a path, even if the wall clock does.
    pub fn install_edit(&self, key: String, content: Vec<u8>) -> FileRecord {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let previous = inner.files.get(&key).map_or(i64::MIN, FileRecord::mod_time);
        let mod_time = now_millis().max(previous);
        let revision = inner.next_revision();
        let record =
            FileRecord::new(content, mod_time, RecordOrigin::Editor).with_revision(revision);
        Arc::make_mut(&mut inner.files).insert(key, record.clone());
        record
    }

    pub fn remove(&self, key: &str) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if !inner.files.contains_key(key) {
            return false;
        }
        Arc::make_mut(&mut inner.files).remove(key);
        true
    }

    /// Remove every record under the directory `dir_key`. Returns how many were removed.
    pub fn remove_dir(&self, dir_key: &str) -> usize {
        let prefix = format!("{dir_key}/");
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let doomed = inner.files.keys().filter(|k| k.starts_with(&prefix)).count();
        if doomed > 0 {
            Arc::make_mut(&mut inner.files).retain(|k, _| !k.starts_with(&prefix));
        }
        doomed
    }
}
