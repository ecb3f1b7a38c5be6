//! Transport abstraction for session channels.
//!
//! A connector dials a channel address and yields two halves: a
//! [`Transport`] for outbound text frames and a [`FrameSource`] producing
//! inbound events. The channel moves the source onto a reader task, which
//! is why the halves are separate.

use async_trait::async_trait;

use crate::descriptor::ChannelAddress;
use crate::error::Result;

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// Endpoint going away (server stopped).
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Protocol error.
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;
/// Clean closure that carried no status code.
pub const CLOSE_NO_STATUS: u16 = 1005;
/// Connection dropped without a closing handshake.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// One inbound event, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A whole text frame, never split or coalesced.
    Text(String),
    /// The peer closed, or the connection dropped.
    Closed { code: u16, reason: String },
    /// The transport failed.
    Error(String),
}

/// Outbound half of a connection.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send one text frame.
    async fn send_text(&mut self, text: String) -> Result<()>;

    /// Start a normal closing handshake.
    async fn close(&mut self) -> Result<()>;
}

/// Inbound half of a connection.
#[async_trait]
pub trait FrameSource: Send + 'static {
    /// Next inbound event. `None` once the connection is finished.
    async fn next_event(&mut self) -> Option<TransportEvent>;
}

/// Dials channel addresses.
#[async_trait]
pub trait Connector: Send + Sync {
    type Transport: Transport;
    type Source: FrameSource;

    /// Establish a connection. Callers bound this with their own timeout.
    async fn connect(&self, address: &ChannelAddress) -> Result<(Self::Transport, Self::Source)>;
}

/// An in-memory duplex network for tests.
///
/// A [`MemoryNetwork`] maps addresses to listeners. Connecting through a
/// [`MemoryConnector`] hands the listener the far end of a channel pair; the
/// connection only completes once the listener accepts it, so a listener
/// that never accepts looks like an unresponsive peer.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::{mpsc, oneshot, RwLock};

    use crate::error::SyncError;

    const QUEUE: usize = 1000;

    #[derive(Debug)]
    enum Frame {
        Text(String),
        Close(u16, String),
    }

    struct Pending {
        local: (MemoryTransport, MemorySource),
        accepted: oneshot::Sender<()>,
    }

    /// Shared state for the memory network.
    #[derive(Default)]
    pub struct MemoryNetwork {
        listeners: RwLock<HashMap<String, mpsc::Sender<Pending>>>,
    }

    impl MemoryNetwork {
        /// Create a new memory network.
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Start listening on an address.
        pub async fn listen(self: &Arc<Self>, address: &ChannelAddress) -> MemoryListener {
            let (tx, rx) = mpsc::channel(16);
            self.listeners
                .write()
                .await
                .insert(address.as_str().to_string(), tx);
            MemoryListener { incoming: rx }
        }

        /// A connector dialing into this network.
        pub fn connector(self: &Arc<Self>) -> MemoryConnector {
            MemoryConnector {
                network: Arc::clone(self),
            }
        }
    }

    /// Accepting side of a memory address.
    pub struct MemoryListener {
        incoming: mpsc::Receiver<Pending>,
    }

    impl MemoryListener {
        /// Accept the next connection. `None` once the network is dropped.
        pub async fn accept(&mut self) -> Option<(MemoryTransport, MemorySource)> {
            loop {
                let pending = self.incoming.recv().await?;
                // The dialer may have given up already
                if pending.accepted.send(()).is_ok() {
                    return Some(pending.local);
                }
            }
        }
    }

    /// Dials a [`MemoryNetwork`].
    #[derive(Clone)]
    pub struct MemoryConnector {
        network: Arc<MemoryNetwork>,
    }

    #[async_trait]
    impl Connector for MemoryConnector {
        type Transport = MemoryTransport;
        type Source = MemorySource;

        async fn connect(
            &self,
            address: &ChannelAddress,
        ) -> Result<(MemoryTransport, MemorySource)> {
            let listener = self
                .network
                .listeners
                .read()
                .await
                .get(address.as_str())
                .cloned()
                .ok_or_else(|| SyncError::Connection(format!("{}: connection refused", address)))?;

            let (to_far, far_rx) = mpsc::channel(QUEUE);
            let (to_near, near_rx) = mpsc::channel(QUEUE);
            let (accepted_tx, accepted_rx) = oneshot::channel();

            let far = (
                MemoryTransport::new(to_near),
                MemorySource::new(far_rx),
            );
            listener
                .send(Pending {
                    local: far,
                    accepted: accepted_tx,
                })
                .await
                .map_err(|_| SyncError::Connection(format!("{}: listener gone", address)))?;
            accepted_rx
                .await
                .map_err(|_| SyncError::Connection(format!("{}: connection refused", address)))?;

            Ok((MemoryTransport::new(to_far), MemorySource::new(near_rx)))
        }
    }

    /// Outbound half of a memory connection.
    pub struct MemoryTransport {
        tx: Option<mpsc::Sender<Frame>>,
    }

    impl MemoryTransport {
        fn new(tx: mpsc::Sender<Frame>) -> Self {
            Self { tx: Some(tx) }
        }

        /// Close with an explicit code, e.g. to simulate a server stopping.
        pub async fn close_with(&mut self, code: u16, reason: &str) -> Result<()> {
            if let Some(tx) = self.tx.take() {
                // Far end may be gone already; closing is still done
                let _ = tx.send(Frame::Close(code, reason.to_string())).await;
            }
            Ok(())
        }

        /// Drop the connection without a closing handshake.
        pub fn abort(&mut self) {
            self.tx = None;
        }
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn send_text(&mut self, text: String) -> Result<()> {
            let tx = self.tx.as_ref().ok_or(SyncError::NotConnected)?;
            tx.send(Frame::Text(text))
                .await
                .map_err(|_| SyncError::Transport("peer disconnected".into()))
        }

        async fn close(&mut self) -> Result<()> {
            self.close_with(CLOSE_NORMAL, "").await
        }
    }

    /// Inbound half of a memory connection.
    pub struct MemorySource {
        rx: mpsc::Receiver<Frame>,
        done: bool,
    }

    impl MemorySource {
        fn new(rx: mpsc::Receiver<Frame>) -> Self {
            Self { rx, done: false }
        }
    }

    #[async_trait]
    impl FrameSource for MemorySource {
        async fn next_event(&mut self) -> Option<TransportEvent> {
            if self.done {
                return None;
            }
            match self.rx.recv().await {
                Some(Frame::Text(text)) => Some(TransportEvent::Text(text)),
                Some(Frame::Close(code, reason)) => {
                    self.done = true;
                    Some(TransportEvent::Closed { code, reason })
                }
                None => {
                    self.done = true;
                    Some(TransportEvent::Closed {
                        code: CLOSE_ABNORMAL,
                        reason: "connection dropped".into(),
                    })
                }
            }
        }
    }
}
