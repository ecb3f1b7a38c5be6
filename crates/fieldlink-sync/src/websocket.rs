//! WebSocket connector for production use.
//!
//! Built on tokio-tungstenite. Only plain `ws://` is dialable as shipped;
//! `wss://` needs one of tokio-tungstenite's TLS features enabled by the
//! host application.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::descriptor::ChannelAddress;
use crate::error::{Result, SyncError};
use crate::transport::{
    Connector, FrameSource, Transport, TransportEvent, CLOSE_ABNORMAL, CLOSE_NO_STATUS,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Dials `ws://` addresses.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    type Transport = WebSocketTransport;
    type Source = WebSocketSource;

    async fn connect(
        &self,
        address: &ChannelAddress,
    ) -> Result<(WebSocketTransport, WebSocketSource)> {
        let (stream, _response) = connect_async(address.as_str())
            .await
            .map_err(|e| SyncError::Connection(format!("{}: {}", address, e)))?;
        tracing::debug!(%address, "websocket handshake complete");
        let (sink, source) = stream.split();
        Ok((
            WebSocketTransport { sink },
            WebSocketSource { source, done: false },
        ))
    }
}

/// Outbound half of a WebSocket connection.
pub struct WebSocketTransport {
    sink: SplitSink<WsStream, WsMessage>,
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.sink
            .send(WsMessage::Text(text))
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        };
        // The peer may already be gone; a failed close frame is not an error
        if let Err(e) = self.sink.send(WsMessage::Close(Some(frame))).await {
            tracing::debug!(error = %e, "close frame not sent");
        }
        let _ = self.sink.close().await;
        Ok(())
    }
}

/// Inbound half of a WebSocket connection.
pub struct WebSocketSource {
    source: SplitStream<WsStream>,
    done: bool,
}

#[async_trait]
impl FrameSource for WebSocketSource {
    async fn next_event(&mut self) -> Option<TransportEvent> {
        if self.done {
            return None;
        }
        loop {
            let event = match self.source.next().await {
                Some(Ok(WsMessage::Text(text))) => TransportEvent::Text(text),
                Some(Ok(WsMessage::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => TransportEvent::Text(text),
                    Err(_) => {
                        tracing::warn!("discarding non-UTF-8 binary frame");
                        continue;
                    }
                },
                Some(Ok(WsMessage::Close(frame))) => {
                    self.done = true;
                    match frame {
                        Some(f) => TransportEvent::Closed {
                            code: u16::from(f.code),
                            reason: f.reason.into_owned(),
                        },
                        None => TransportEvent::Closed {
                            code: CLOSE_NO_STATUS,
                            reason: String::new(),
                        },
                    }
                }
                Some(Ok(_)) => continue, // ping/pong/raw frames
                Some(Err(e)) => {
                    self.done = true;
                    TransportEvent::Error(e.to_string())
                }
                None => {
                    self.done = true;
                    TransportEvent::Closed {
                        code: CLOSE_ABNORMAL,
                        reason: "stream ended".into(),
                    }
                }
            };
            return Some(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::decode;
    use std::time::Duration;

    #[tokio::test]
    async fn test_unreachable_peer_is_connection_error() {
        // Port 9 (discard) on localhost is closed on any sane test host
        let addr = decode("127.0.0.1:9").unwrap();
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            WebSocketConnector.connect(&addr),
        )
        .await;
        match result {
            Ok(Err(SyncError::Connection(msg))) => assert!(msg.contains("127.0.0.1")),
            Ok(Err(other)) => panic!("unexpected error {other}"),
            Ok(Ok(_)) => panic!("connected to a closed port"),
            Err(_) => {} // filtered port; the caller's timeout handles it
        }
    }
}
