//! Readiness hand-off between the engine loader and the host.
//!
//! The loader holds the [`ReadySignal`] and fires it exactly once, handing
//! over the engine constructor. The host awaits the paired [`ModuleReady`]
//! with a deadline. No shared registry is involved and nothing polls.

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time;
use tracing::debug;

use crate::engine::EngineFactory;

type Outcome = Result<Box<dyn EngineFactory>, String>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadinessError {
    #[error("engine module was not ready within {} ms", .0.as_millis())]
    Timeout(Duration),
    #[error("engine module failed to load: {0}")]
    Failed(String),
    #[error("engine module loader went away without signalling readiness")]
    Abandoned,
}

/// Create a connected signal/waiter pair for one engine module load.
#[must_use]
pub fn engine_module() -> (ReadySignal, ModuleReady) {
    let (tx, rx) = oneshot::channel();
    (ReadySignal { tx }, ModuleReady { rx })
}

/// Loader side. Consumed by the first signal, so it can fire only once.
pub struct ReadySignal {
    tx: oneshot::Sender<Outcome>,
}

impl ReadySignal {
    /// The module is loaded; `factory` builds its engine.
    pub fn ready(self, factory: impl EngineFactory + 'static) {
        self.ready_boxed(Box::new(factory));
    }

    pub fn ready_boxed(self, factory: Box<dyn EngineFactory>) {
        if self.tx.send(Ok(factory)).is_err() {
            debug!("Engine module ready after the host stopped waiting");
        }
    }

    /// The module could not be loaded.
    pub fn fail(self, reason: impl Into<String>) {
        if self.tx.send(Err(reason.into())).is_err() {
            debug!("Engine module failed after the host stopped waiting");
        }
    }
}

impl fmt::Debug for ReadySignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadySignal")
            .field("waiting", &!self.tx.is_closed())
            .finish()
    }
}

/// Host side of the readiness hand-off.
pub struct ModuleReady {
    rx: oneshot::Receiver<Outcome>,
}

impl ModuleReady {
    /// Wait up to `timeout` for the engine constructor.
    pub async fn wait(self, timeout: Duration) -> Result<Box<dyn EngineFactory>, ReadinessError> {
        match time::timeout(timeout, self.rx).await {
            Err(_) => Err(ReadinessError::Timeout(timeout)),
            Ok(Err(_)) => Err(ReadinessError::Abandoned),
            Ok(Ok(Err(reason))) => Err(ReadinessError::Failed(reason)),
            Ok(Ok(Ok(factory))) => Ok(factory),
        }
    }
}

impl fmt::Debug for ModuleReady {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleReady").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::bridge::{ReplyRelay, TransportBridge};
    use crate::engine::{Engine, EngineError};
    use lspbridge_types::{FilesAccessor, ProtocolMessage, WorkspaceMapping};

    struct Silent;

    impl Engine for Silent {
        fn handle_message(&self, _message: ProtocolMessage) -> Result<(), EngineError> {
            Ok(())
        }
    }

    fn silent(_files: FilesAccessor, _relay: ReplyRelay) -> Result<Arc<dyn Engine>, EngineError> {
        Ok(Arc::new(Silent))
    }

    fn no_files() -> FilesAccessor {
        Arc::new(WorkspaceMapping::default)
    }

    #[tokio::test]
    async fn ready_before_wait_is_delivered() {
        let (signal, ready) = engine_module();
        signal.ready(silent);

        let Ok(factory) = ready.wait(Duration::from_secs(1)).await else {
            panic!("expected a factory");
        };
        let bridge = TransportBridge::new();
        assert!(factory.construct(no_files(), bridge.reply_relay()).is_ok());
    }

    #[tokio::test]
    async fn ready_after_wait_wakes_the_waiter() {
        let (signal, ready) = engine_module();
        let loader = tokio::spawn(async move {
            time::sleep(Duration::from_millis(20)).await;
            signal.ready(silent);
        });

        assert!(ready.wait(Duration::from_secs(5)).await.is_ok());
        loader.await.unwrap();
    }

    #[tokio::test]
    async fn times_out_when_never_signalled() {
        let (signal, ready) = engine_module();
        let timeout = Duration::from_millis(20);
        let Err(err) = ready.wait(timeout).await else {
            panic!("expected a timeout");
        };
        assert_eq!(err, ReadinessError::Timeout(timeout));
        drop(signal);
    }

    #[tokio::test]
    async fn failure_and_abandonment_are_distinct() {
        let (signal, ready) = engine_module();
        signal.fail("bad module");
        assert_eq!(
            ready.wait(Duration::from_secs(1)).await.err(),
            Some(ReadinessError::Failed("bad module".to_string()))
        );

        let (signal, ready) = engine_module();
        drop(signal);
        assert_eq!(
            ready.wait(Duration::from_secs(1)).await.err(),
            Some(ReadinessError::Abandoned)
        );
    }

    #[tokio::test]
    async fn signalling_after_the_host_gave_up_is_harmless() {
        let (signal, ready) = engine_module();
        assert!(ready.wait(Duration::from_millis(5)).await.is_err());
        signal.fail("too late");

        let (signal, ready) = engine_module();
        drop(ready);
        assert!(format!("{signal:?}").contains("waiting: false"));
        signal.ready(silent);
    }
}
