//! WebSocket transport implementation.
//!
//! This module provides a WebSocket-based transport using tokio-tungstenite.

use async_trait::async_trait;
use bytes::BytesMut;
use confab_protocol::{codec, Frame};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    accept_async,
    tungstenite::{Error as WsError, Message},
    WebSocketStream,
};
use tracing::{debug, info, warn};

use crate::traits::{Accepted, ConnectionId, FrameSink, FrameStream, Transport, TransportError};

/// WebSocket transport configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum message size in bytes.
    pub max_message_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".parse().unwrap(),
            max_message_size: 64 * 1024, // 64 KB
        }
    }
}

/// WebSocket transport.
pub struct WebSocketTransport {
    listener: TcpListener,
    config: WebSocketConfig,
}

impl WebSocketTransport {
    /// Create a new WebSocket transport.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn new(config: WebSocketConfig) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(TransportError::Io)?;

        info!("WebSocket transport listening on {}", config.bind_addr);

        Ok(Self { listener, config })
    }

    /// Create a new WebSocket transport with default config.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails.
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        Self::new(WebSocketConfig {
            bind_addr: addr,
            ..Default::default()
        })
        .await
    }

    /// Get the local address this transport is bound to.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn accept(&self) -> Result<Accepted, TransportError> {
        let (stream, addr) = self.listener.accept().await.map_err(TransportError::Io)?;

        debug!("Accepted TCP connection from {}", addr);

        let ws_stream = accept_async(stream)
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;

        debug!("WebSocket handshake completed with {}", addr);

        let (sink, stream) = ws_stream.split();

        Ok(Accepted {
            id: ConnectionId::generate(),
            remote_addr: Some(addr.to_string()),
            reader: Box::new(WsFrameReader {
                stream,
                buffer: BytesMut::with_capacity(4096),
                max_message_size: self.config.max_message_size,
            }),
            writer: Box::new(WsFrameWriter { sink }),
        })
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

/// Inbound half of a WebSocket connection.
struct WsFrameReader {
    stream: SplitStream<WebSocketStream<TcpStream>>,
    /// Buffer for partial protocol frames.
    buffer: BytesMut,
    max_message_size: usize,
}

#[async_trait]
impl FrameStream for WsFrameReader {
    async fn next_frame(&mut self) -> Result<Option<Frame>, TransportError> {
        // Drain any frame already buffered before touching the socket
        if let Some(frame) = codec::decode_from(&mut self.buffer)? {
            return Ok(Some(frame));
        }

        loop {
            match self.stream.next().await {
                Some(Ok(Message::Binary(data))) => {
                    if data.len() > self.max_message_size {
                        warn!(
                            "Message too large: {} bytes (max: {})",
                            data.len(),
                            self.max_message_size
                        );
                        return Err(TransportError::Protocol(
                            confab_protocol::ProtocolError::FrameTooLarge(data.len()),
                        ));
                    }

                    self.buffer.extend_from_slice(&data);

                    if let Some(frame) = codec::decode_from(&mut self.buffer)? {
                        return Ok(Some(frame));
                    }
                    // Need more data, keep reading
                }
                Some(Ok(Message::Text(text))) => {
                    // For compatibility, treat text as binary
                    self.buffer.extend_from_slice(text.as_bytes());

                    if let Some(frame) = codec::decode_from(&mut self.buffer)? {
                        return Ok(Some(frame));
                    }
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                    // Keepalive is handled by the WebSocket layer itself;
                    // the protocol has its own Ping/Pong frames
                }
                Some(Ok(Message::Close(_))) => {
                    debug!("Received close frame");
                    return Ok(None);
                }
                Some(Ok(Message::Frame(_))) => {
                    // Raw frame, ignore
                }
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                    debug!("Connection closed");
                    return Ok(None);
                }
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    debug!("WebSocket stream ended");
                    return Ok(None);
                }
            }
        }
    }
}

/// Outbound half of a WebSocket connection.
struct WsFrameWriter {
    sink: SplitSink<WebSocketStream<TcpStream>, Message>,
}

#[async_trait]
impl FrameSink for WsFrameWriter {
    async fn send_frame(&mut self, frame: &Frame) -> Result<(), TransportError> {
        let data = codec::encode(frame)?;
        self.sink
            .send(Message::Binary(data.to_vec()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.sink.close().await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::SendFailed(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::connect_async;

    #[test]
    fn test_websocket_config_default() {
        let config = WebSocketConfig::default();
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.max_message_size, 64 * 1024);
    }

    #[tokio::test]
    async fn test_accept_and_exchange_frames() {
        let transport = WebSocketTransport::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = transport.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let (mut ws, _) = connect_async(format!("ws://{addr}")).await.unwrap();

            let frame = Frame::identify(1, "alice");
            let data = codec::encode(&frame).unwrap();
            ws.send(Message::Binary(data.to_vec())).await.unwrap();

            // Wait for the ack the server side sends back
            loop {
                match ws.next().await.unwrap().unwrap() {
                    Message::Binary(data) => {
                        let frame = codec::decode(&data).unwrap();
                        assert_eq!(frame, Frame::ack(1));
                        break;
                    }
                    _ => continue,
                }
            }
        });

        let mut accepted = transport.accept().await.unwrap();
        assert!(accepted.remote_addr.is_some());

        let frame = accepted.reader.next_frame().await.unwrap().unwrap();
        assert_eq!(frame, Frame::identify(1, "alice"));

        accepted.writer.send_frame(&Frame::ack(1)).await.unwrap();

        client.await.unwrap();
    }

    #[tokio::test]
    async fn test_partial_frame_reassembly() {
        let transport = WebSocketTransport::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = transport.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let (mut ws, _) = connect_async(format!("ws://{addr}")).await.unwrap();

            let frame = Frame::direct("alice", "bob", b"hello".to_vec());
            let data = codec::encode(&frame).unwrap();

            // Split the encoded frame across two WebSocket messages
            ws.send(Message::Binary(data[..3].to_vec())).await.unwrap();
            ws.send(Message::Binary(data[3..].to_vec())).await.unwrap();
            ws
        });

        let mut accepted = transport.accept().await.unwrap();
        let frame = accepted.reader.next_frame().await.unwrap().unwrap();
        assert_eq!(frame, Frame::direct("alice", "bob", b"hello".to_vec()));

        drop(client.await.unwrap());
    }
}
