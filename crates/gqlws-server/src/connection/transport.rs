//! Frame-level transport seam.
//!
//! The protocol engine reads and writes whole text frames. Anything that can
//! do that (an Axum `WebSocket`, an in-memory pipe in tests) plugs in through
//! [`FrameReader`] and [`FrameWriter`].

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use gqlws_core::TransportError;

/// Inbound half of a transport.
#[async_trait]
pub trait FrameReader: Send + 'static {
    /// Next text frame. `Ok(None)` on a clean close.
    async fn read_frame(&mut self) -> Result<Option<String>, TransportError>;
}

/// Outbound half of a transport.
#[async_trait]
pub trait FrameWriter: Send + 'static {
    /// Write one text frame.
    async fn write_frame(&mut self, frame: String) -> Result<(), TransportError>;

    /// Close the transport.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Read half of an Axum WebSocket.
pub struct WsReader {
    inner: SplitStream<WebSocket>,
}

/// Write half of an Axum WebSocket.
pub struct WsWriter {
    inner: SplitSink<WebSocket, Message>,
}

/// Split an upgraded socket into engine halves.
pub fn split_socket(socket: WebSocket) -> (WsReader, WsWriter) {
    let (sink, stream) = socket.split();
    (WsReader { inner: stream }, WsWriter { inner: sink })
}

#[async_trait]
impl FrameReader for WsReader {
    async fn read_frame(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            let Some(message) = self.inner.next().await else {
                return Ok(None);
            };
            match message.map_err(|e| TransportError::WebSocket(e.to_string()))? {
                Message::Text(text) => return Ok(Some(text.as_str().to_owned())),
                Message::Binary(bytes) => {
                    return String::from_utf8(bytes.to_vec())
                        .map(Some)
                        .map_err(|_| TransportError::InvalidUtf8);
                }
                Message::Close(_) => return Ok(None),
                // control frames are answered by the websocket layer
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
    }
}

#[async_trait]
impl FrameWriter for WsWriter {
    async fn write_frame(&mut self, frame: String) -> Result<(), TransportError> {
        self.inner
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.inner
            .close()
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    }
}
