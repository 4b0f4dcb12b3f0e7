//! Translation of raw `notify` events into mirror updates.

use std::path::PathBuf;

use notify::EventKind;
use notify::event::{ModifyKind, RenameMode};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum WatchAction {
    /// Path appeared (file or directory): load it.
    Create(PathBuf),
    /// Content changed: reload it.
    Change(PathBuf),
    /// Path is gone (file or directory): drop it.
    Delete(PathBuf),
    /// Backend could not say what happened: check the disk.
    Reconcile(PathBuf),
}

pub(crate) fn actions_for(event: &notify::Event) -> Vec<WatchAction> {
    let paths = event.paths.iter().cloned();
    match event.kind {
        EventKind::Create(_) => paths.map(WatchAction::Create).collect(),
        EventKind::Remove(_) => paths.map(WatchAction::Delete).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            paths.map(WatchAction::Delete).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            paths.map(WatchAction::Create).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => match event.paths.as_slice() {
            [from, to] => vec![
                WatchAction::Delete(from.clone()),
                WatchAction::Create(to.clone()),
            ],
            _ => paths.map(WatchAction::Reconcile).collect(),
        },
        EventKind::Modify(ModifyKind::Name(_)) => paths.map(WatchAction::Reconcile).collect(),
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(_) => paths.map(WatchAction::Change).collect(),
        EventKind::Any => paths.map(WatchAction::Reconcile).collect(),
        EventKind::Access(_) | EventKind::Other => Vec::new(),
    }
}
