// src/connection/sniffer.rs

//! Tells raw TCP clients apart from WebSocket clients by peeking at the first bytes.

use crate::core::GateError;
use bytes::{Buf, Bytes, BytesMut};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};

/// The sniffer decides once this many bytes are buffered.
pub const SNIFF_MIN_BYTES: usize = 5;
/// At most this many leading bytes are inspected.
pub const SNIFF_MAX_BYTES: usize = 23;

const WEBSOCKET_PREFIX: &[u8] = b"GET /";

/// The protocol a connection speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Length-prefixed frames directly on the socket.
    TcpRaw,
    /// Frames carried in binary WebSocket messages after an HTTP upgrade.
    WebSocket,
}

/// One-shot protocol detection.
pub struct ProtocolSniffer;

impl ProtocolSniffer {
    /// Reads until at least `SNIFF_MIN_BYTES` are buffered (or the peer hits EOF) and
    /// classifies the connection.
    ///
    /// The bytes read are not lost: the returned stream replays them before reading
    /// from the socket again.
    pub async fn sniff<S>(mut stream: S) -> Result<(Protocol, SniffedStream<S>), GateError>
    where
        S: AsyncRead + Unpin,
    {
        let mut buf = BytesMut::with_capacity(SNIFF_MAX_BYTES);
        while buf.len() < SNIFF_MIN_BYTES {
            if stream.read_buf(&mut buf).await? == 0 {
                break;
            }
        }
        let inspected = &buf[..buf.len().min(SNIFF_MAX_BYTES)];
        let protocol = Self::classify(inspected);
        Ok((protocol, SniffedStream::new(buf.freeze(), stream)))
    }

    /// Classifies a connection from its leading bytes.
    ///
    /// A raw frame cannot start with `GET /`: read as a length that is over 1 GB.
    pub fn classify(prefix: &[u8]) -> Protocol {
        if prefix.starts_with(WEBSOCKET_PREFIX) {
            Protocol::WebSocket
        } else {
            Protocol::TcpRaw
        }
    }
}

/// A stream that yields a buffered prefix before the underlying stream's data.
pub struct SniffedStream<S> {
    prefix: Bytes,
    inner: S,
}

impl<S> SniffedStream<S> {
    pub fn new(prefix: Bytes, inner: S) -> Self {
        Self { prefix, inner }
    }

    /// Bytes not yet handed to a reader.
    pub fn buffered(&self) -> &[u8] {
        &self.prefix
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for SniffedStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        if this.prefix.has_remaining() {
            let n = this.prefix.len().min(buf.remaining());
            buf.put_slice(&this.prefix[..n]);
            this.prefix.advance(n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for SniffedStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, std::io::Error>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), std::io::Error>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
