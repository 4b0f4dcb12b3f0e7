//! Decides which paths belong in the mirror and what key they are stored under.

use std::collections::HashSet;
use std::iter;
use std::path::{self, Component, Path, PathBuf};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use lspbridge_config::WorkspaceConfig;

use crate::error::MirrorError;

pub(crate) struct PathFilter {
    /// Canonical root when it can be resolved.
    root: PathBuf,
    /// The root as it was given, when that differs from `root` (a symlink,
    /// `/tmp` on macOS). Editors report paths under this one.
    given_root: Option<PathBuf>,
    globs: GlobSet,
    exclude_dirs: HashSet<String>,
}

impl PathFilter {
    pub fn new(root: PathBuf, config: &WorkspaceConfig) -> Result<Self, MirrorError> {
        let given = path::absolute(&root).unwrap_or(root);
        let (root, given_root) = match given.canonicalize() {
            Ok(canonical) if canonical != given => (canonical, Some(given)),
            _ => (given, None),
        };

        let mut builder = GlobSetBuilder::new();
        for pattern in config.glob_patterns() {
            let glob = GlobBuilder::new(&pattern)
                .case_insensitive(true)
                .build()
                .map_err(|source| MirrorError::Pattern {
                    pattern: pattern.clone(),
                    source,
                })?;
            builder.add(glob);
        }
        let globs = builder.build().map_err(|source| MirrorError::Pattern {
            pattern: config.combined_glob(),
            source,
        })?;

        Ok(Self {
            root,
            given_root,
            globs,
            exclude_dirs: config.exclude_dirs.iter().cloned().collect(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn exclude_dirs(&self) -> &HashSet<String> {
        &self.exclude_dirs
    }

    /// Absolute form of `path`; relative paths are taken as workspace-relative.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Workspace-relative key with `/` separators, or `None` when the path is
    /// outside the root, escapes it with `..`, or passes through an excluded
    /// directory.
    pub fn relative_key(&self, path: &Path) -> Option<String> {
        let relative = self.strip_root(path)?;

        let mut parts: Vec<&str> = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_str()?),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
            }
        }
        let (_, dirs) = parts.split_last()?;
        if dirs.iter().any(|dir| self.exclude_dirs.contains(*dir)) {
            return None;
        }
        Some(parts.join("/"))
    }

    /// Whether a new directory at `path` can hold tracked files: inside the
    /// root and neither excluded itself nor under an excluded directory.
    pub fn is_scannable_dir(&self, path: &Path) -> bool {
        self.relative_key(path).is_some_and(|key| {
            key.rsplit('/')
                .next()
                .is_none_or(|name| !self.exclude_dirs.contains(name))
        })
    }

    /// Key for a path that should be mirrored: inside the root and matching a
    /// tracked extension.
    pub fn tracked_key(&self, path: &Path) -> Option<String> {
        let key = self.relative_key(path)?;
        self.globs.is_match(&key).then_some(key)
    }

    fn strip_root(&self, path: &Path) -> Option<PathBuf> {
        if !path.is_absolute() {
            return Some(path.to_path_buf());
        }
        for root in iter::once(&self.root).chain(&self.given_root) {
            if let Ok(rest) = path.strip_prefix(root) {
                return Some(rest.to_path_buf());
            }
        }
        // Reached through some other link: resolve the parent directory.
        let name = path.file_name()?;
        let parent = path.parent()?.canonicalize().ok()?;
        let rest = parent.strip_prefix(&self.root).ok()?;
        Some(rest.join(name))
    }
}
