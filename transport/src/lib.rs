//! Protocol transport between an editor client and an in-process language engine.
//!
//! The engine is a black box that consumes protocol messages through
//! [`Engine::handle_message`] and emits replies through the [`ReplyRelay`] it
//! was constructed with. [`TransportBridge`] presents both directions to the
//! client as a writer and a set of inbound [`MessageStream`]s, passing every
//! message through unchanged.

pub mod codec;

mod bridge;
mod engine;
mod readiness;
mod summary;

pub use bridge::{ErrorStream, MessageStream, ReplyRelay, TransportBridge, TransportError, TransportState};
pub use engine::{Engine, EngineError, EngineFactory};
pub use readiness::{ModuleReady, ReadinessError, ReadySignal, engine_module};
pub use summary::MessageSummary;
