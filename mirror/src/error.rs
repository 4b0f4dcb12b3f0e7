use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("invalid file pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        source: globset::Error,
    },
    #[error("workspace root {} is not accessible: {source}", path.display())]
    RootInaccessible { path: PathBuf, source: io::Error },
    #[error("failed to watch {}: {source}", path.display())]
    Watch {
        path: PathBuf,
        source: notify::Error,
    },
    #[error("{} is outside the workspace", path.display())]
    OutsideWorkspace { path: PathBuf },
    #[error("workspace mirror is already initialized")]
    AlreadyInitialized,
}
