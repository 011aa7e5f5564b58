//! Length-prefixed frame transport over the driver's stdio pipes.
//!
//! Each frame on the stream is a 4-byte little-endian length followed by that
//! many bytes of UTF-8 JSON. [`FrameDecoder`] reassembles frames from
//! arbitrarily fragmented reads; [`PipeTransport`] wraps a write half and a
//! read half of the subprocess pipes and converts between frames and
//! [`serde_json::Value`] messages. Key casing is translated at this boundary:
//! outbound messages are camelized for the wire, inbound messages are
//! snake-cased for the API.
//!
//! Framing errors are fatal. There is no frame-level recovery: a malformed
//! length prefix, a truncated final frame, or an unparseable payload all
//! terminate the receive loop, and with it the session.

use drover_protocol::casing;
use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::error::{Error, Result};

#[cfg(test)]
mod tests;

/// Refuse frames larger than this; a bigger prefix means the stream is
/// desynchronized, not that the driver sent a 256 MiB message.
const MAX_FRAME_BYTES: usize = 256 * 1024 * 1024;

/// Read buffer size for the receive loop.
const READ_CHUNK_BYTES: usize = 32 * 1024;

/// Stateful reassembler for length-prefixed frames.
///
/// One instance per stream. Feed it raw chunks as they arrive; each call
/// yields the zero or more frames completed by that chunk. Partial state
/// (including a split length prefix) is carried to the next call.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Bytes of the 4-byte length prefix received so far.
    prefix: Vec<u8>,
    /// Bytes still needed to complete the current frame. Zero means a fresh
    /// length prefix is expected next.
    remaining: usize,
    /// Payload bytes accumulated for the current frame.
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes one raw chunk and returns every frame it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Vec<u8>>> {
        let mut frames = Vec::new();
        let mut rest = chunk;

        while !rest.is_empty() {
            if self.remaining == 0 {
                let need = 4 - self.prefix.len();
                let take = need.min(rest.len());
                self.prefix.extend_from_slice(&rest[..take]);
                rest = &rest[take..];
                if self.prefix.len() < 4 {
                    break;
                }

                let length =
                    u32::from_le_bytes([self.prefix[0], self.prefix[1], self.prefix[2], self.prefix[3]])
                        as usize;
                self.prefix.clear();
                if length > MAX_FRAME_BYTES {
                    return Err(Error::TransportError(format!(
                        "frame length {length} exceeds limit; stream is desynchronized"
                    )));
                }
                self.remaining = length;
                self.buffer = Vec::with_capacity(length);
                if self.remaining == 0 {
                    frames.push(Vec::new());
                }
            } else {
                let take = self.remaining.min(rest.len());
                self.buffer.extend_from_slice(&rest[..take]);
                rest = &rest[take..];
                self.remaining -= take;
                if self.remaining == 0 {
                    frames.push(std::mem::take(&mut self.buffer));
                }
            }
        }

        Ok(frames)
    }

    /// True if a partial prefix or partial payload is buffered. EOF in this
    /// state means the stream was truncated mid-frame.
    pub fn mid_frame(&self) -> bool {
        self.remaining > 0 || !self.prefix.is_empty()
    }
}

/// Encodes one message into its wire frame: camelized JSON behind a 4-byte
/// little-endian length prefix.
pub fn encode_frame(message: Value) -> Result<Vec<u8>> {
    let payload = serde_json::to_vec(&casing::message_to_wire(message))?;
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Object-safe sending half of a transport.
pub trait Transport: Send {
    /// Sends one message to the driver as a single frame.
    fn send(&mut self, message: Value) -> BoxFuture<'_, Result<()>>;
}

/// Object-safe receiving half of a transport. [`run`](Self::run) drives the
/// read loop until EOF or a fatal transport error.
pub trait TransportReceiver: Send {
    fn run(self: Box<Self>) -> BoxFuture<'static, Result<()>>;
}

/// Both halves of a transport plus the inbound message channel, ready to hand
/// to a `Connection`.
pub struct TransportParts {
    pub sender: Box<dyn Transport>,
    pub receiver: Box<dyn TransportReceiver>,
    pub message_rx: mpsc::UnboundedReceiver<Value>,
}

/// Transport over the driver subprocess's stdin/stdout pipes.
pub struct PipeTransport<W, R> {
    sender: PipeTransportSender<W>,
    receiver: PipeTransportReceiver<R>,
}

impl<W, R> PipeTransport<W, R>
where
    W: AsyncWrite + Unpin + Send + 'static,
    R: AsyncRead + Unpin + Send + 'static,
{
    /// Creates a transport writing to `stdin` and reading from `stdout`.
    /// Returns the transport and the channel on which decoded inbound
    /// messages are delivered.
    pub fn new(stdin: W, stdout: R) -> (Self, mpsc::UnboundedReceiver<Value>) {
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let transport = Self {
            sender: PipeTransportSender { writer: stdin },
            receiver: PipeTransportReceiver {
                reader: stdout,
                message_tx,
                decoder: FrameDecoder::new(),
            },
        };
        (transport, message_rx)
    }

    /// Splits into the send and receive halves.
    pub fn into_parts(self) -> (PipeTransportSender<W>, PipeTransportReceiver<R>) {
        (self.sender, self.receiver)
    }

    /// Boxes both halves for a `Connection`.
    pub fn into_transport_parts(self, message_rx: mpsc::UnboundedReceiver<Value>) -> TransportParts {
        let (sender, receiver) = self.into_parts();
        TransportParts {
            sender: Box::new(sender),
            receiver: Box::new(receiver),
            message_rx,
        }
    }

    /// Runs the receive loop on this transport directly. Only used when the
    /// halves have not been split.
    pub async fn run(&mut self) -> Result<()> {
        self.receiver.run_loop().await
    }
}

/// Sending half of a [`PipeTransport`].
pub struct PipeTransportSender<W> {
    writer: W,
}

impl<W> PipeTransportSender<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Writes one message as a frame. The length prefix and payload go out as
    /// one logical unit; a reader never observes payload bytes before the
    /// complete prefix.
    pub async fn send(&mut self, message: Value) -> Result<()> {
        let frame = encode_frame(message)?;
        self.writer
            .write_all(&frame)
            .await
            .map_err(|e| Error::TransportError(format!("failed to write frame: {e}")))?;
        self.writer
            .flush()
            .await
            .map_err(|e| Error::TransportError(format!("failed to flush frame: {e}")))?;
        Ok(())
    }
}

impl<W> Transport for PipeTransportSender<W>
where
    W: AsyncWrite + Unpin + Send,
{
    fn send(&mut self, message: Value) -> BoxFuture<'_, Result<()>> {
        Box::pin(PipeTransportSender::send(self, message))
    }
}

/// Receiving half of a [`PipeTransport`].
pub struct PipeTransportReceiver<R> {
    reader: R,
    message_tx: mpsc::UnboundedSender<Value>,
    decoder: FrameDecoder,
}

impl<R> PipeTransportReceiver<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// Reads raw chunks, reassembles frames, and forwards decoded messages.
    ///
    /// Returns `Ok(())` on clean EOF or when the connection drops the message
    /// channel. Any framing or payload decode failure is returned as a fatal
    /// error.
    pub async fn run_loop(&mut self) -> Result<()> {
        let mut chunk = vec![0u8; READ_CHUNK_BYTES];
        loop {
            let n = self
                .reader
                .read(&mut chunk)
                .await
                .map_err(|e| Error::TransportError(format!("failed to read from driver: {e}")))?;

            if n == 0 {
                if self.decoder.mid_frame() {
                    return Err(Error::TransportError(
                        "stream closed mid-frame: truncated length prefix or payload".to_string(),
                    ));
                }
                return Ok(());
            }

            for frame in self.decoder.push(&chunk[..n])? {
                let message: Value = serde_json::from_slice(&frame).map_err(|e| {
                    Error::TransportError(format!("malformed frame payload: {e}"))
                })?;
                let message = casing::message_to_api(message);
                if self.message_tx.send(message).is_err() {
                    // Connection is gone; stop reading.
                    return Ok(());
                }
            }
        }
    }
}

impl<R> TransportReceiver for PipeTransportReceiver<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    fn run(mut self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move { self.run_loop().await })
    }
}
