//! Exposes a transport to a client over a framed byte stream.

use anyhow::{Context, Result};
use lspbridge_transport::TransportBridge;
use lspbridge_transport::codec::{FrameReader, FrameWriter};
use tokio::io::{self, AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

/// Pump frames between a client stream pair and `transport` until the client
/// closes its input.
///
/// Inbound engine messages are framed onto `writer` by a background task.
/// Frames read from `reader` are written to the transport in order; rejected
/// writes are already on the transport's error stream, so they are logged and
/// the loop continues. EOF or a framing error ends the session: the
/// transport is disposed and the outbound backlog is flushed before returning.
pub async fn serve<R, W>(transport: &TransportBridge, reader: R, writer: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut inbound = transport.listen();
    let outbound = tokio::spawn(async move {
        let mut writer = FrameWriter::new(writer);
        while let Some(message) = inbound.recv().await {
            writer
                .write_message(&message)
                .await
                .context("writing to client")?;
        }
        Ok::<_, anyhow::Error>(())
    });

    let mut reader = FrameReader::new(reader);
    let read_result = loop {
        match reader.read_message().await {
            Ok(Some(message)) => {
                if let Err(e) = transport.write(message) {
                    debug!("Client message not delivered: {e}");
                }
            }
            Ok(None) => {
                info!("Client closed the connection");
                break Ok(());
            }
            Err(e) => {
                warn!("Failed to read client frame: {e:#}");
                break Err(e.context("reading from client"));
            }
        }
    };

    transport.dispose();
    let write_result = outbound.await.context("outbound writer task")?;
    read_result.and(write_result)
}

/// [`serve`] over this process's stdin and stdout.
pub async fn serve_stdio(transport: &TransportBridge) -> Result<()> {
    serve(transport, io::stdin(), io::stdout()).await
}
