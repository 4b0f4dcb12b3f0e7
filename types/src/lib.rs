//! Core domain types for lspbridge.
//!
//! This crate contains the values that cross component boundaries: protocol
//! messages exchanged between the editor and the engine, and the workspace
//! file records the engine reads through its pull accessor. No IO, no async.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory

mod files;
mod message;

pub use files::{
    FileRecord, FilesAccessor, RecordOrigin, WorkspaceMapping, now_millis, system_time_millis,
};
pub use message::{MessageShape, ProtocolMessage};
