//! The transport bridge: client writes go to the engine, engine replies go to listeners.

use std::any::Any;
use std::fmt;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};

use futures_util::Stream;
use lspbridge_types::ProtocolMessage;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::engine::{Engine, EngineError};
use crate::summary::MessageSummary;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("engine not initialized")]
    EngineNotReady,
    #[error("transport is disposed")]
    Disposed,
    #[error("an engine is already bound to this transport")]
    AlreadyBound,
    #[error("engine rejected message: {0}")]
    Engine(#[from] EngineError),
    #[error("engine panicked while handling message: {0}")]
    EnginePanicked(String),
}

/// Lifecycle of a [`TransportBridge`]. `Disposed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Unbound,
    Bound,
    Disposed,
}

enum Lifecycle {
    Unbound,
    Bound(Arc<dyn Engine>),
    Disposed,
}

impl Lifecycle {
    fn state(&self) -> TransportState {
        match self {
            Self::Unbound => TransportState::Unbound,
            Self::Bound(_) => TransportState::Bound,
            Self::Disposed => TransportState::Disposed,
        }
    }
}

/// Subscriber lists. `None` once disposed: dropping the senders ends every stream.
type Senders<T> = Mutex<Option<Vec<mpsc::UnboundedSender<T>>>>;

struct Shared {
    lifecycle: Mutex<Lifecycle>,
    /// Held for the whole engine call so calls reach the engine in write order.
    call_lock: Mutex<()>,
    listeners: Senders<ProtocolMessage>,
    errors: Senders<TransportError>,
}

impl Shared {
    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, message: ProtocolMessage) {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(listeners) = listeners.as_mut() else {
            debug!("Dropping engine message after dispose: {}", MessageSummary(&message));
            return;
        };
        debug!("Engine -> client: {}", MessageSummary(&message));
        trace!(message = %message.as_value(), "Relayed message body");
        listeners.retain(|tx| tx.send(message.clone()).is_ok());
    }

    fn report(&self, error: &TransportError) {
        warn!("Transport write failed: {error}");
        let mut errors = self.errors.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(errors) = errors.as_mut() {
            errors.retain(|tx| tx.send(error.clone()).is_ok());
        }
    }

    fn subscribe<T>(senders: &Senders<T>) -> EventStream<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut senders = senders.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(senders) = senders.as_mut() {
            senders.push(tx);
        }
        // After dispose `tx` is dropped here and the stream is already ended.
        EventStream { rx }
    }
}

/// Engine-to-client path handed to the engine at construction.
///
/// Every message sent is delivered unchanged to every listener, in call
/// order. Once the bridge is disposed (or dropped) sending is a no-op.
#[derive(Clone)]
pub struct ReplyRelay {
    shared: Weak<Shared>,
}

impl ReplyRelay {
    pub fn send(&self, message: ProtocolMessage) {
        match self.shared.upgrade() {
            Some(shared) => shared.publish(message),
            None => debug!("Dropping engine message, transport is gone"),
        }
    }
}

impl PartialEq for ReplyRelay {
    fn eq(&self, other: &Self) -> bool {
        Weak::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for ReplyRelay {}

impl fmt::Debug for ReplyRelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyRelay")
            .field("connected", &(self.shared.strong_count() > 0))
            .finish()
    }
}

/// An inbound subscription. Ends when the bridge is disposed.
#[derive(Debug)]
pub struct EventStream<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

pub type MessageStream = EventStream<ProtocolMessage>;
pub type ErrorStream = EventStream<TransportError>;

impl<T> EventStream<T> {
    /// Next item, or `None` once the bridge is disposed and the backlog is drained.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv); `None` when nothing is queued.
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

impl<T> Stream for EventStream<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

/// Connects a protocol client to an in-process engine.
///
/// Created unbound. The host builds the engine with [`reply_relay`](Self::reply_relay)
/// and binds it with [`set_engine`](Self::set_engine); writes before that are
/// rejected with [`TransportError::EngineNotReady`].
pub struct TransportBridge {
    shared: Arc<Shared>,
    relay: ReplyRelay,
}

impl Default for TransportBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportBridge {
    #[must_use]
    pub fn new() -> Self {
        let shared = Arc::new(Shared {
            lifecycle: Mutex::new(Lifecycle::Unbound),
            call_lock: Mutex::new(()),
            listeners: Mutex::new(Some(Vec::new())),
            errors: Mutex::new(Some(Vec::new())),
        });
        let relay = ReplyRelay {
            shared: Arc::downgrade(&shared),
        };
        Self { shared, relay }
    }

    #[must_use]
    pub fn state(&self) -> TransportState {
        self.shared.lifecycle().state()
    }

    /// The bridge's one relay. Every call returns a handle to the same relay.
    #[must_use]
    pub fn reply_relay(&self) -> ReplyRelay {
        self.relay.clone()
    }

    /// Bind the engine. Allowed once, and only before disposal.
    pub fn set_engine(&self, engine: Arc<dyn Engine>) -> Result<(), TransportError> {
        let mut lifecycle = self.shared.lifecycle();
        match *lifecycle {
            Lifecycle::Unbound => {}
            Lifecycle::Bound(_) => return Err(TransportError::AlreadyBound),
            Lifecycle::Disposed => return Err(TransportError::Disposed),
        }
        *lifecycle = Lifecycle::Bound(engine);
        debug!("Engine bound to transport");
        Ok(())
    }

    /// Subscribe to engine-to-client messages.
    #[must_use]
    pub fn listen(&self) -> MessageStream {
        Shared::subscribe(&self.shared.listeners)
    }

    /// Subscribe to write failures.
    #[must_use]
    pub fn errors(&self) -> ErrorStream {
        Shared::subscribe(&self.shared.errors)
    }

    /// Deliver one client message to the engine.
    ///
    /// Returns once the engine has accepted the message; any reply arrives
    /// later on the listener streams. Failures are returned and also
    /// published on the error stream. Must not be called from inside
    /// [`Engine::handle_message`].
    pub fn write(&self, message: ProtocolMessage) -> Result<(), TransportError> {
        let _call = self
            .shared
            .call_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let engine = match &*self.shared.lifecycle() {
            Lifecycle::Bound(engine) => Arc::clone(engine),
            Lifecycle::Unbound => return Err(self.fail(TransportError::EngineNotReady)),
            Lifecycle::Disposed => return Err(self.fail(TransportError::Disposed)),
        };

        debug!("Client -> engine: {}", MessageSummary(&message));
        match panic::catch_unwind(AssertUnwindSafe(|| engine.handle_message(message))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(self.fail(TransportError::Engine(err))),
            Err(payload) => Err(self.fail(TransportError::EnginePanicked(panic_message(
                payload.as_ref(),
            )))),
        }
    }

    fn fail(&self, error: TransportError) -> TransportError {
        self.shared.report(&error);
        error
    }

    /// Writer-side close. Same as [`dispose`](Self::dispose).
    pub fn end(&self) {
        self.dispose();
    }

    /// Release the engine and end every stream. Idempotent.
    ///
    /// A write already inside the engine finishes normally.
    pub fn dispose(&self) {
        let previous = mem::replace(&mut *self.shared.lifecycle(), Lifecycle::Disposed);
        if matches!(previous, Lifecycle::Disposed) {
            return;
        }
        drop(previous);

        let listeners = self
            .shared
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let errors = self
            .shared
            .errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        debug!(
            listeners = listeners.map_or(0, |l| l.len()),
            error_listeners = errors.map_or(0, |e| e.len()),
            "Transport disposed"
        );
    }
}

impl Drop for TransportBridge {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for TransportBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportBridge")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    use super::*;
    use futures_util::StreamExt;
    use serde_json::json;

    /// Records every message it receives.
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<ProtocolMessage>>,
        busy: AtomicBool,
        overlapped: AtomicBool,
    }

    impl Engine for Recorder {
        fn handle_message(&self, message: ProtocolMessage) -> Result<(), EngineError> {
            if self.busy.swap(true, Ordering::SeqCst) {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            self.seen.lock().unwrap().push(message);
            thread::yield_now();
            self.busy.store(false, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Answers every request through its relay before returning.
    struct Echo {
        relay: ReplyRelay,
    }

    impl Engine for Echo {
        fn handle_message(&self, message: ProtocolMessage) -> Result<(), EngineError> {
            if let Some(id) = message.id() {
                self.relay.send(ProtocolMessage::new(json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": message.method(),
                })));
            }
            Ok(())
        }
    }

    struct Rejecting;

    impl Engine for Rejecting {
        fn handle_message(&self, _message: ProtocolMessage) -> Result<(), EngineError> {
            Err(EngineError::new("unsupported method"))
        }
    }

    struct Panicking;

    impl Engine for Panicking {
        fn handle_message(&self, _message: ProtocolMessage) -> Result<(), EngineError> {
            panic!("engine blew up");
        }
    }

    fn request(id: u64, method: &str) -> ProtocolMessage {
        ProtocolMessage::new(json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": {} }))
    }

    #[test]
    fn write_before_binding_is_rejected_and_reported() {
        let bridge = TransportBridge::new();
        let mut errors = bridge.errors();
        assert_eq!(bridge.state(), TransportState::Unbound);

        assert_eq!(
            bridge.write(request(1, "initialize")),
            Err(TransportError::EngineNotReady)
        );
        assert_eq!(errors.try_recv(), Some(TransportError::EngineNotReady));
    }

    #[test]
    fn writes_reach_engine_in_order() {
        let bridge = TransportBridge::new();
        let engine = Arc::new(Recorder::default());
        bridge.set_engine(engine.clone()).unwrap();

        let messages: Vec<_> = (0..50).map(|i| request(i, "textDocument/hover")).collect();
        for message in &messages {
            bridge.write(message.clone()).unwrap();
        }
        assert_eq!(*engine.seen.lock().unwrap(), messages);
    }

    #[test]
    fn concurrent_writers_never_overlap_inside_the_engine() {
        let bridge = Arc::new(TransportBridge::new());
        let engine = Arc::new(Recorder::default());
        bridge.set_engine(engine.clone()).unwrap();

        let writers: Vec<_> = (0..4)
            .map(|w| {
                let bridge = Arc::clone(&bridge);
                thread::spawn(move || {
                    for i in 0..25 {
                        bridge.write(request(w * 100 + i, "x")).unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        assert_eq!(engine.seen.lock().unwrap().len(), 100);
        assert!(!engine.overlapped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn relay_passes_messages_through_unchanged_to_every_listener() {
        let bridge = TransportBridge::new();
        let mut first = bridge.listen();
        let mut second = bridge.listen();

        let diagnostics = ProtocolMessage::new(json!({
            "jsonrpc": "2.0",
            "method": "textDocument/publishDiagnostics",
            "params": { "uri": "file:///ws/main.spx", "diagnostics": [{ "message": "x", "extra": [1, 2] }] }
        }));
        bridge.reply_relay().send(diagnostics.clone());

        assert_eq!(first.recv().await, Some(diagnostics.clone()));
        assert_eq!(second.recv().await, Some(diagnostics));
    }

    #[tokio::test]
    async fn engine_can_reply_from_inside_handle_message() {
        let bridge = TransportBridge::new();
        let mut inbound = bridge.listen();
        bridge
            .set_engine(Arc::new(Echo {
                relay: bridge.reply_relay(),
            }))
            .unwrap();

        bridge.write(request(7, "textDocument/completion")).unwrap();
        let reply = inbound.recv().await.unwrap();
        assert_eq!(reply.id(), Some(&json!(7)));
        assert_eq!(reply.as_value()["result"], "textDocument/completion");
    }

    #[test]
    fn reply_relay_is_created_once() {
        let bridge = TransportBridge::new();
        assert_eq!(bridge.reply_relay(), bridge.reply_relay());
        assert_ne!(bridge.reply_relay(), TransportBridge::new().reply_relay());
    }

    #[test]
    fn engine_rejection_is_returned_and_reported() {
        let bridge = TransportBridge::new();
        let mut errors = bridge.errors();
        bridge.set_engine(Arc::new(Rejecting)).unwrap();

        let expected = TransportError::Engine(EngineError::new("unsupported method"));
        assert_eq!(bridge.write(request(1, "x")), Err(expected.clone()));
        assert_eq!(errors.try_recv(), Some(expected));
    }

    #[test]
    fn engine_panic_becomes_an_error() {
        let bridge = TransportBridge::new();
        let mut errors = bridge.errors();
        bridge.set_engine(Arc::new(Panicking)).unwrap();

        let err = bridge.write(request(1, "x")).unwrap_err();
        assert_eq!(
            err,
            TransportError::EnginePanicked("engine blew up".to_string())
        );
        assert_eq!(errors.try_recv(), Some(err));
        // Still usable afterwards.
        assert!(matches!(
            bridge.write(request(2, "x")),
            Err(TransportError::EnginePanicked(_))
        ));
    }

    #[test]
    fn engine_can_only_be_bound_once() {
        let bridge = TransportBridge::new();
        bridge.set_engine(Arc::new(Recorder::default())).unwrap();
        assert_eq!(bridge.state(), TransportState::Bound);
        assert_eq!(
            bridge.set_engine(Arc::new(Recorder::default())),
            Err(TransportError::AlreadyBound)
        );
    }

    #[tokio::test]
    async fn dispose_ends_streams_and_is_idempotent() {
        let bridge = TransportBridge::new();
        let relay = bridge.reply_relay();
        let mut inbound = bridge.listen();
        let mut errors = bridge.errors();
        bridge.set_engine(Arc::new(Recorder::default())).unwrap();

        relay.send(request(1, "queued"));
        bridge.dispose();
        bridge.dispose();
        bridge.end();
        assert_eq!(bridge.state(), TransportState::Disposed);

        // Backlog drains, then the stream ends.
        assert_eq!(inbound.next().await, Some(request(1, "queued")));
        assert_eq!(inbound.next().await, None);
        assert_eq!(errors.recv().await, None);

        relay.send(request(2, "late"));
        assert_eq!(bridge.write(request(3, "x")), Err(TransportError::Disposed));
        assert_eq!(
            bridge.set_engine(Arc::new(Recorder::default())),
            Err(TransportError::Disposed)
        );
        assert_eq!(bridge.listen().recv().await, None);
    }

    #[test]
    fn dispose_releases_the_engine() {
        let bridge = TransportBridge::new();
        let engine = Arc::new(Recorder::default());
        bridge.set_engine(engine.clone()).unwrap();
        assert_eq!(Arc::strong_count(&engine), 2);

        bridge.dispose();
        assert_eq!(Arc::strong_count(&engine), 1);
    }

    #[test]
    fn relay_outliving_the_bridge_is_a_no_op() {
        let relay = {
            let bridge = TransportBridge::new();
            bridge.reply_relay()
        };
        relay.send(request(1, "x"));
    }
}
