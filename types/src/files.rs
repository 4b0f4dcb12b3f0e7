//! Workspace file records and the snapshot handed to the engine.

use std::collections::HashMap;
use std::collections::hash_map::Iter;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Which event source produced a [`FileRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordOrigin {
    /// Loaded from storage (initial scan or a watch event).
    Disk,
    /// Mirrored from an in-editor buffer that may not be saved yet.
    Editor,
}

/// The most recent observation of one workspace file.
///
/// Records are immutable; every change replaces the whole record so content
/// and timestamp can never drift apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    content: Arc<[u8]>,
    /// Milliseconds since the Unix epoch.
    mod_time: i64,
    origin: RecordOrigin,
    revision: u64,
}

impl FileRecord {
    #[must_use]
    pub fn new(content: impl Into<Arc<[u8]>>, mod_time: i64, origin: RecordOrigin) -> Self {
        Self {
            content: content.into(),
            mod_time,
            origin,
            revision: 0,
        }
    }

    /// Stamp the record with the mirror-wide sequence number it was installed under.
    #[must_use]
    pub fn with_revision(mut self, revision: u64) -> Self {
        self.revision = revision;
        self
    }

    #[must_use]
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// Modification time in milliseconds since the Unix epoch.
    #[must_use]
    pub fn mod_time(&self) -> i64 {
        self.mod_time
    }

    #[must_use]
    pub fn origin(&self) -> RecordOrigin {
        self.origin
    }

    /// Monotonic install sequence number; later installs have larger revisions.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.content.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// Read-only snapshot of every tracked file, keyed by workspace-relative path.
///
/// Paths always use `/` as the separator. Cloning is cheap (shared `Arc`).
#[derive(Debug, Clone, Default)]
pub struct WorkspaceMapping(Arc<HashMap<String, FileRecord>>);

impl WorkspaceMapping {
    #[must_use]
    pub fn new(files: Arc<HashMap<String, FileRecord>>) -> Self {
        Self(files)
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<&FileRecord> {
        self.0.get(path)
    }

    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.0.contains_key(path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> Iter<'_, String, FileRecord> {
        self.0.iter()
    }

    /// Paths in sorted order (useful for logging and deterministic output).
    #[must_use]
    pub fn sorted_paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.0.keys().map(String::as_str).collect();
        paths.sort_unstable();
        paths
    }
}

impl<'a> IntoIterator for &'a WorkspaceMapping {
    type Item = (&'a String, &'a FileRecord);
    type IntoIter = Iter<'a, String, FileRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Pull accessor the engine calls whenever it needs the current workspace.
///
/// Must be cheap and must never block for long.
pub type FilesAccessor = Arc<dyn Fn() -> WorkspaceMapping + Send + Sync>;

/// Current wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> i64 {
    system_time_millis(SystemTime::now())
}

/// Convert a `SystemTime` to milliseconds since the Unix epoch (negative before it).
#[must_use]
pub fn system_time_millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_millis()).unwrap_or(i64::MAX),
        Err(before) => -i64::try_from(before.duration().as_millis()).unwrap_or(i64::MAX),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn record_accessors() {
        let record = FileRecord::new(b"hello".to_vec(), 42, RecordOrigin::Disk).with_revision(3);
        assert_eq!(record.content(), b"hello");
        assert_eq!(record.len(), 5);
        assert_eq!(record.mod_time(), 42);
        assert_eq!(record.origin(), RecordOrigin::Disk);
        assert_eq!(record.revision(), 3);
    }

    #[test]
    fn mapping_lookup_and_sorted_paths() {
        let mut files = HashMap::new();
        files.insert(
            "util.src".to_string(),
            FileRecord::new(b"12345".to_vec(), 1, RecordOrigin::Disk),
        );
        files.insert(
            "main.src".to_string(),
            FileRecord::new(b"0123456789".to_vec(), 1, RecordOrigin::Disk),
        );
        let mapping = WorkspaceMapping::new(Arc::new(files));

        assert_eq!(mapping.len(), 2);
        assert!(mapping.contains("main.src"));
        assert_eq!(mapping.get("util.src").map(FileRecord::len), Some(5));
        assert_eq!(mapping.sorted_paths(), vec!["main.src", "util.src"]);
        assert_eq!((&mapping).into_iter().count(), 2);
    }

    #[test]
    fn default_mapping_is_empty() {
        let mapping = WorkspaceMapping::default();
        assert!(mapping.is_empty());
        assert!(mapping.get("anything").is_none());
    }

    #[test]
    fn system_time_millis_handles_both_sides_of_epoch() {
        assert_eq!(system_time_millis(UNIX_EPOCH + Duration::from_millis(1500)), 1500);
        assert_eq!(system_time_millis(UNIX_EPOCH - Duration::from_millis(250)), -250);
    }

    #[test]
    fn now_is_after_2020() {
        assert!(now_millis() > 1_577_836_800_000);
    }
}
