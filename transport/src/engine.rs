//! Contracts between the bridge and the language engine it hosts.

use std::sync::Arc;

use lspbridge_types::{FilesAccessor, ProtocolMessage};
use thiserror::Error;

use crate::bridge::ReplyRelay;

/// Rejection reported synchronously by the engine for one message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct EngineError {
    message: String,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A running language engine.
///
/// `handle_message` returns once the message is accepted; the answer, if any,
/// arrives later through the engine's [`ReplyRelay`]. The engine may call
/// the relay from inside `handle_message`.
pub trait Engine: Send + Sync {
    fn handle_message(&self, message: ProtocolMessage) -> Result<(), EngineError>;
}

/// Builds the engine once the host has its inputs ready.
///
/// This is what the engine module hands over when it becomes ready, in place
/// of a constructor published under a well-known global name.
pub trait EngineFactory: Send {
    fn construct(
        self: Box<Self>,
        files: FilesAccessor,
        relay: ReplyRelay,
    ) -> Result<Arc<dyn Engine>, EngineError>;
}

impl<F> EngineFactory for F
where
    F: FnOnce(FilesAccessor, ReplyRelay) -> Result<Arc<dyn Engine>, EngineError> + Send,
{
    fn construct(
        self: Box<Self>,
        files: FilesAccessor,
        relay: ReplyRelay,
    ) -> Result<Arc<dyn Engine>, EngineError> {
        (*self)(files, relay)
    }
}
