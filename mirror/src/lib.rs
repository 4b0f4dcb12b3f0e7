//! Workspace file mirror.
//!
//! Keeps an in-memory mapping of workspace-relative path → (content, mtime)
//! for every tracked source file. Three sources feed it: the initial scan,
//! filesystem watch events, and unsaved editor buffers. The engine reads it
//! through [`WorkspaceMirror::files_accessor`], which always returns the
//! latest snapshot without waiting on in-flight events.

mod error;
mod filter;
mod mirror;
mod store;
mod watch;

pub use error::MirrorError;
pub use mirror::{ScanReport, WorkspaceMirror};
