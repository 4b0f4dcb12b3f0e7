//! `Content-Length` framing for protocol messages over a byte stream.
//!
//! Each message travels as `Content-Length: N\r\n\r\n{json}`. The bridge
//! itself is in-process and never frames anything; this codec is what lets a
//! host expose a [`TransportBridge`](crate::TransportBridge) to an editor over
//! stdin/stdout or any other stream pair.

use anyhow::{Context, Result, bail};
use lspbridge_types::ProtocolMessage;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Default frame size cap (4 MiB).
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Reads framed protocol messages from an async reader.
pub struct FrameReader<R> {
    reader: BufReader<R>,
    max_frame_bytes: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            max_frame_bytes: MAX_FRAME_BYTES,
        }
    }

    /// Override the frame size cap. Whole-file `didOpen` payloads can be large.
    #[must_use]
    pub fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }

    /// Read the next message.
    ///
    /// Returns `Ok(None)` on a clean EOF between frames. Malformed headers,
    /// oversized frames, and bodies that are not JSON objects are errors.
    pub async fn read_message(&mut self) -> Result<Option<ProtocolMessage>> {
        let Some(content_length) = self.read_headers().await? else {
            return Ok(None);
        };

        if content_length > self.max_frame_bytes {
            bail!(
                "Content-Length {content_length} exceeds maximum {}",
                self.max_frame_bytes
            );
        }

        let mut body = vec![0u8; content_length];
        self.reader
            .read_exact(&mut body)
            .await
            .context("reading frame body")?;

        let value: serde_json::Value =
            serde_json::from_slice(&body).context("parsing protocol frame")?;
        if !value.is_object() {
            bail!("protocol frame is not a JSON object");
        }
        Ok(Some(ProtocolMessage::new(value)))
    }

    /// Read the header block and return its `Content-Length`. `None` on EOF
    /// before the first header byte; EOF anywhere later is truncation.
    async fn read_headers(&mut self) -> Result<Option<usize>> {
        let mut content_length = None;
        let mut line = String::new();

        for index in 0.. {
            line.clear();
            let read = self
                .reader
                .read_line(&mut line)
                .await
                .context("reading header line")?;
            match (read, index) {
                (0, 0) => return Ok(None),
                (0, _) => bail!("unexpected EOF while reading headers"),
                _ => {}
            }

            let header = line.trim();
            if header.is_empty() {
                break;
            }
            content_length = parse_content_length(header)?.or(content_length);
        }

        content_length
            .map(Some)
            .context("missing Content-Length header")
    }
}

/// Value of a `Content-Length` header line, `None` for any other header.
fn parse_content_length(header: &str) -> Result<Option<usize>> {
    let Some((name, value)) = header.split_once(':') else {
        return Ok(None);
    };
    if !name.trim().eq_ignore_ascii_case("content-length") {
        return Ok(None);
    }
    value
        .trim()
        .parse()
        .map(Some)
        .with_context(|| format!("invalid Content-Length value {:?}", value.trim()))
}

/// Writes framed protocol messages to an async writer.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write one message and flush.
    pub async fn write_message(&mut self, message: &ProtocolMessage) -> Result<()> {
        let body = serde_json::to_vec(message.as_value()).context("serializing protocol frame")?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());

        self.writer
            .write_all(header.as_bytes())
            .await
            .context("writing frame header")?;
        self.writer
            .write_all(&body)
            .await
            .context("writing frame body")?;
        self.writer.flush().await.context("flushing frame")?;

        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}
