//! Configuration for lspbridge.
//!
//! Configuration is TOML. Every section is optional; missing values fall back
//! to defaults that track the `.spx`/`.gmx`/`.gox` source files and skip
//! `node_modules` and `.git`.
//!
//! Lookup order for [`BridgeConfig::load`]:
//! 1. `<workspace root>/.lspbridge.toml`
//! 2. `<user config dir>/lspbridge/config.toml`
//! 3. built-in defaults

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Extensions tracked when the config does not name any.
pub const DEFAULT_EXTENSIONS: &[&str] = &["spx", "gmx", "gox"];

/// Directory names skipped during the scan when the config does not name any.
pub const DEFAULT_EXCLUDE_DIRS: &[&str] = &["node_modules", ".git"];

/// How long startup waits for the engine module to report readiness.
pub const DEFAULT_READY_TIMEOUT_MS: u64 = 5_000;

/// File name of the per-workspace config file.
pub const WORKSPACE_CONFIG_FILE: &str = ".lspbridge.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => Some(path),
            ConfigError::Invalid(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Which workspace files are mirrored for the engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Tracked file extensions, without the leading dot (e.g. `["spx"]`).
    pub extensions: Vec<String>,
    /// Directory names pruned from the scan and ignored by the watcher.
    pub exclude_dirs: Vec<String>,
    /// Honor `.gitignore`/`.ignore` files during the initial scan. Default: false.
    pub respect_ignore_files: bool,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            extensions: DEFAULT_EXTENSIONS.iter().map(ToString::to_string).collect(),
            exclude_dirs: DEFAULT_EXCLUDE_DIRS.iter().map(ToString::to_string).collect(),
            respect_ignore_files: false,
        }
    }
}

impl WorkspaceConfig {
    /// One `**/*.<ext>` glob per tracked extension.
    #[must_use]
    pub fn glob_patterns(&self) -> Vec<String> {
        self.extensions
            .iter()
            .map(|ext| format!("**/*.{ext}"))
            .collect()
    }

    /// A single glob covering every tracked extension, e.g. `**/*.{spx,gmx,gox}`.
    ///
    /// This is what the editor's file-change subscription is restricted to.
    #[must_use]
    pub fn combined_glob(&self) -> String {
        match self.extensions.as_slice() {
            [single] => format!("**/*.{single}"),
            many => format!("**/*.{{{}}}", many.join(",")),
        }
    }

    /// Whether `ext` (without a leading dot, any case) is tracked.
    #[must_use]
    pub fn tracks_extension(&self, ext: &str) -> bool {
        let ext = ext.trim_start_matches('.');
        self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext))
    }

    fn normalize(&mut self) -> Result<(), ConfigError> {
        let mut extensions: Vec<String> = Vec::with_capacity(self.extensions.len());
        for raw in &self.extensions {
            let ext = raw.trim().trim_start_matches('.').to_ascii_lowercase();
            if ext.is_empty() {
                continue;
            }
            if ext.contains(['/', '\\', '*', '?', '{', '}', '[', ']', ',']) {
                return Err(ConfigError::Invalid(format!(
                    "extension '{raw}' must be a plain file extension"
                )));
            }
            if !extensions.contains(&ext) {
                extensions.push(ext);
            }
        }
        if extensions.is_empty() {
            return Err(ConfigError::Invalid(
                "workspace.extensions must name at least one extension".to_string(),
            ));
        }
        self.extensions = extensions;

        self.exclude_dirs.retain(|dir| !dir.trim().is_empty());
        for dir in &mut self.exclude_dirs {
            *dir = dir.trim().trim_matches('/').to_string();
        }
        Ok(())
    }
}

/// Engine module readiness settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Milliseconds to wait for the engine module before startup fails.
    pub ready_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ready_timeout_ms: DEFAULT_READY_TIMEOUT_MS,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
    /// `tracing` filter directive used when `RUST_LOG` is unset. Default: "info".
    pub filter: Option<String>,
    /// Write logs to this file instead of stderr.
    pub file: Option<PathBuf>,
}

impl BridgeConfig {
    /// Parse and normalize a TOML document. `path` is only used for error reporting.
    pub fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let mut config: BridgeConfig =
            toml::from_str(content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.workspace.normalize()?;
        if config.engine.ready_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "engine.ready_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(config)
    }

    /// Load a config file that is known to exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match Self::parse(&content, path) {
            Ok(config) => {
                tracing::debug!(path = %path.display(), "Loaded config");
                Ok(config)
            }
            Err(err) => {
                tracing::warn!("{err}");
                Err(err)
            }
        }
    }

    /// Load the config for a workspace, falling back to defaults when no file exists.
    pub fn load(workspace_root: &Path) -> Result<Self, ConfigError> {
        for candidate in config_candidates(workspace_root) {
            if candidate.is_file() {
                return Self::load_from(&candidate);
            }
        }
        Ok(Self::default())
    }
}

/// Config file locations, most specific first.
#[must_use]
pub fn config_candidates(workspace_root: &Path) -> Vec<PathBuf> {
    let mut candidates = vec![workspace_root.join(WORKSPACE_CONFIG_FILE)];
    if let Some(dir) = dirs::config_dir() {
        candidates.push(dir.join("lspbridge").join("config.toml"));
    }
    candidates
}
