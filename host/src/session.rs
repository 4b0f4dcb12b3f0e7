//! Startup sequencing and the running bridge session.

use std::path::PathBuf;
use std::sync::Arc;

use lspbridge_config::{BridgeConfig, ConfigError};
use lspbridge_mirror::{MirrorError, WorkspaceMirror};
use lspbridge_transport::{
    EngineError, ModuleReady, ReadinessError, TransportBridge, TransportError,
};
use lspbridge_types::WorkspaceMapping;
use thiserror::Error;
use tokio::task::{self, JoinError};
use tracing::{debug, error, info};
use url::Url;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("engine module unavailable: {0}")]
    Readiness(#[from] ReadinessError),
    #[error("workspace mirror failed: {0}")]
    Mirror(#[from] MirrorError),
    #[error("workspace scan task failed: {0}")]
    MirrorTask(#[source] JoinError),
    #[error("engine construction failed: {0}")]
    Construct(#[source] EngineError),
    #[error("failed to bind engine: {0}")]
    Bind(#[from] TransportError),
}

/// A started bridge: the mirror is live and the engine is bound to the transport.
pub struct Session {
    mirror: Arc<WorkspaceMirror>,
    transport: Arc<TransportBridge>,
    document_selector: Vec<String>,
    file_watch_glob: String,
}

impl Session {
    /// Load configuration for `root` (see [`BridgeConfig::load`]) and start.
    pub async fn start_in_workspace(
        root: impl Into<PathBuf>,
        module: ModuleReady,
    ) -> Result<Self, StartupError> {
        let root = root.into();
        let config = BridgeConfig::load(&root).inspect_err(|e| {
            error!("Failed to start language bridge: {e}");
        })?;
        Self::start(root, &config, module).await
    }

    /// Run the startup sequence.
    ///
    /// Readiness is awaited first, then the workspace is scanned, then the
    /// engine is built and bound. Any failure is fatal: whatever was started
    /// is disposed and the error is logged once before being returned.
    pub async fn start(
        root: impl Into<PathBuf>,
        config: &BridgeConfig,
        module: ModuleReady,
    ) -> Result<Self, StartupError> {
        Self::try_start(root.into(), config, module)
            .await
            .inspect_err(|e| error!("Failed to start language bridge: {e}"))
    }

    async fn try_start(
        root: PathBuf,
        config: &BridgeConfig,
        module: ModuleReady,
    ) -> Result<Self, StartupError> {
        let timeout = config.engine.ready_timeout();
        debug!(timeout_ms = timeout.as_millis(), "Waiting for engine module");
        let factory = module.wait(timeout).await?;
        info!("Engine module ready");

        let mirror = Arc::new(WorkspaceMirror::new(root, &config.workspace)?);
        let scanning = Arc::clone(&mirror);
        let scanned = task::spawn_blocking(move || scanning.initialize()).await;
        let report = match scanned {
            Ok(Ok(report)) => report,
            Ok(Err(e)) => {
                mirror.dispose();
                return Err(StartupError::Mirror(e));
            }
            Err(e) => {
                mirror.dispose();
                return Err(StartupError::MirrorTask(e));
            }
        };

        let transport = Arc::new(TransportBridge::new());
        let engine = match factory.construct(mirror.files_accessor(), transport.reply_relay()) {
            Ok(engine) => engine,
            Err(e) => {
                transport.dispose();
                mirror.dispose();
                return Err(StartupError::Construct(e));
            }
        };
        if let Err(e) = transport.set_engine(engine) {
            transport.dispose();
            mirror.dispose();
            return Err(StartupError::Bind(e));
        }

        info!(
            root = %mirror.root().display(),
            files = report.loaded,
            unreadable = report.failed,
            "Language bridge started"
        );
        Ok(Self {
            mirror,
            transport,
            document_selector: config.workspace.glob_patterns(),
            file_watch_glob: config.workspace.combined_glob(),
        })
    }

    #[must_use]
    pub fn transport(&self) -> &Arc<TransportBridge> {
        &self.transport
    }

    #[must_use]
    pub fn mirror(&self) -> &Arc<WorkspaceMirror> {
        &self.mirror
    }

    /// Current workspace snapshot, as the engine sees it.
    #[must_use]
    pub fn files(&self) -> WorkspaceMapping {
        self.mirror.get_files()
    }

    /// One glob per tracked extension, for the editor's document selector.
    #[must_use]
    pub fn document_selector(&self) -> &[String] {
        &self.document_selector
    }

    /// Single glob covering every tracked extension, for editor file-change subscriptions.
    #[must_use]
    pub fn file_watch_glob(&self) -> &str {
        &self.file_watch_glob
    }

    /// Editor opened a document. Returns whether it was mirrored.
    pub fn on_document_opened(&self, uri_or_path: &str, text: &str) -> bool {
        self.mirror_document(uri_or_path, text)
    }

    /// Editor buffer changed (full text). Returns whether it was mirrored.
    pub fn on_document_changed(&self, uri_or_path: &str, text: &str) -> bool {
        self.mirror_document(uri_or_path, text)
    }

    fn mirror_document(&self, uri_or_path: &str, text: &str) -> bool {
        let Some(path) = document_path(uri_or_path) else {
            debug!(document = uri_or_path, "Ignoring non-file document");
            return false;
        };
        if !self.mirror.is_tracked(&path) {
            return false;
        }
        match self.mirror.update_file_content(&path, text) {
            Ok(()) => true,
            Err(e) => {
                debug!("Ignoring document: {e}");
                false
            }
        }
    }

    /// Dispose the transport, then stop watching. Idempotent.
    pub fn shutdown(&self) {
        self.transport.dispose();
        self.mirror.dispose();
        debug!("Language bridge shut down");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Filesystem path of an editor document given as a `file:` URI or a plain path.
///
/// Documents with any other scheme (`untitled:`, `git:`, ...) have no path.
fn document_path(uri_or_path: &str) -> Option<PathBuf> {
    match Url::parse(uri_or_path) {
        Ok(url) if url.scheme() == "file" => url.to_file_path().ok(),
        // Single-letter "schemes" are Windows drive letters.
        Ok(url) if url.scheme().len() > 1 => None,
        _ => Some(PathBuf::from(uri_or_path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_uris_become_paths() {
        assert_eq!(
            document_path("file:///ws/pkg/main.spx"),
            Some(PathBuf::from("/ws/pkg/main.spx"))
        );
        assert_eq!(
            document_path("file:///ws/with%20space.spx"),
            Some(PathBuf::from("/ws/with space.spx"))
        );
    }

    #[test]
    fn plain_paths_pass_through() {
        assert_eq!(
            document_path("/ws/main.spx"),
            Some(PathBuf::from("/ws/main.spx"))
        );
        assert_eq!(document_path("pkg/main.spx"), Some(PathBuf::from("pkg/main.spx")));
    }

    #[test]
    fn other_schemes_are_ignored() {
        assert_eq!(document_path("untitled:Untitled-1"), None);
        assert_eq!(document_path("git:/ws/main.spx?ref=HEAD"), None);
    }
}
