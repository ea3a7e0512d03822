// src/connection/pipeline.rs

//! The fixed transport stages installed after sniffing: either the frame codec directly
//! on the socket, or a WebSocket upgrade followed by a binary-message adapter feeding the
//! same codec. The result is a reader half and a writer half that speak `Frame`s.

use super::sniffer::{Protocol, SniffedStream};
use crate::core::GateError;
use crate::core::protocol::{Frame, GameFrameCodec};
use bytes::BytesMut;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_util::codec::{Decoder, Encoder, Framed};
use tracing::debug;

type RawFramed<S> = Framed<SniffedStream<S>, GameFrameCodec>;
type WsStream<S> = WebSocketStream<SniffedStream<S>>;

/// Transport settings for the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub max_frame_size: usize,
    pub websocket_path: String,
}

/// Installs the stages for `protocol` and splits the connection into its halves.
///
/// For WebSocket this performs the HTTP upgrade; a request for any path other than
/// `websocket_path` is answered with 404 and fails.
pub async fn establish<S>(
    protocol: Protocol,
    stream: SniffedStream<S>,
    settings: &PipelineSettings,
) -> Result<(FrameReader<S>, FrameWriter<S>), GateError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let codec = GameFrameCodec::new(settings.max_frame_size);
    match protocol {
        Protocol::TcpRaw => {
            let (sink, stream) = Framed::new(stream, codec).split();
            Ok((FrameReader::Raw(stream), FrameWriter::Raw(sink)))
        }
        Protocol::WebSocket => {
            let path = settings.websocket_path.clone();
            let ws = tokio_tungstenite::accept_hdr_async(
                stream,
                move |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
                    if req.uri().path() == path {
                        return Ok(response);
                    }
                    debug!("Rejecting WebSocket upgrade for path '{}'.", req.uri().path());
                    let mut not_found = ErrorResponse::new(Some("Not Found".to_string()));
                    *not_found.status_mut() = StatusCode::NOT_FOUND;
                    Err(not_found)
                },
            )
            .await?;
            let (sink, stream) = ws.split();
            Ok((
                FrameReader::WebSocket {
                    stream,
                    buffer: BytesMut::new(),
                    codec,
                },
                FrameWriter::WebSocket { sink, codec },
            ))
        }
    }
}

/// The receiving half: yields decoded frames in arrival order.
pub enum FrameReader<S> {
    Raw(SplitStream<RawFramed<S>>),
    WebSocket {
        stream: SplitStream<WsStream<S>>,
        buffer: BytesMut,
        codec: GameFrameCodec,
    },
}

impl<S> FrameReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// The next frame, or `None` once the peer has closed the connection.
    ///
    /// Cancel safe: partially received data stays buffered in `self`.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>, GateError> {
        match self {
            FrameReader::Raw(stream) => stream.next().await.transpose(),
            FrameReader::WebSocket {
                stream,
                buffer,
                codec,
            } => loop {
                if let Some(frame) = codec.decode(buffer)? {
                    return Ok(Some(frame));
                }
                match stream.next().await {
                    Some(Ok(Message::Binary(data))) => buffer.extend_from_slice(&data),
                    Some(Ok(Message::Text(_))) => {
                        return Err(GateError::ProtocolViolation(
                            "text WebSocket messages are not supported".into(),
                        ));
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(None),
                    // Pings are answered by tungstenite itself.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                }
            },
        }
    }
}

/// The sending half, owned by the connection's writer task.
pub enum FrameWriter<S> {
    Raw(SplitSink<RawFramed<S>, Frame>),
    WebSocket {
        sink: SplitSink<WsStream<S>, Message>,
        codec: GameFrameCodec,
    },
}

impl<S> FrameWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub async fn send(&mut self, frame: Frame) -> Result<(), GateError> {
        match self {
            FrameWriter::Raw(sink) => sink.send(frame).await,
            FrameWriter::WebSocket { sink, codec } => {
                let mut buf = BytesMut::with_capacity(frame.wire_length() + 4);
                codec.encode(frame, &mut buf)?;
                sink.send(Message::Binary(buf.freeze())).await?;
                Ok(())
            }
        }
    }

    /// Flushes and closes the transport. For WebSocket this sends a Close frame.
    pub async fn close(&mut self) -> Result<(), GateError> {
        match self {
            FrameWriter::Raw(sink) => sink.close().await,
            FrameWriter::WebSocket { sink, .. } => Ok(sink.close().await?),
        }
    }
}
