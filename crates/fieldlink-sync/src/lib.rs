//! # fieldlink sync
//!
//! Pairing session channel between a field device and a desktop peer.
//!
//! ## Overview
//!
//! A pairing starts from a scanned QR code. The text is decoded into a
//! [`ChannelAddress`], a [`SessionChannel`] is opened to it within a
//! liveness timeout, and the two sides exchange text frames until one of
//! them closes. Each channel is single-use.
//!
//! ## Key Types
//!
//! - [`ChannelAddress`]: decoded connection descriptor
//! - [`SessionChannel`]: one duplex channel with an observable state
//! - [`Message`], [`Response`], [`Inbound`]: what travels on the wire
//! - [`Connector`]: dials addresses; [`WebSocketConnector`] for real peers,
//!   [`MemoryNetwork`] for tests
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fieldlink_sync::{decode, SessionChannel, WebSocketConnector, DEFAULT_LIVENESS_TIMEOUT};
//!
//! async fn example() -> fieldlink_sync::Result<()> {
//!     let address = decode("192.168.1.20:8765")?;
//!     let mut channel = SessionChannel::new(256);
//!     channel
//!         .open(&WebSocketConnector, &address, DEFAULT_LIVENESS_TIMEOUT)
//!         .await?;
//!     while let Some(event) = channel.recv().await {
//!         println!("{:?}", event);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Message Flow
//!
//! ```text
//! Field device                        Desktop
//!   |-------- open ------------------->|
//!   |<------- connected ---------------|
//!   |-------- event ------------------>|   (send)
//!   |<------- {code: 3} ---------------|
//!   |-------- close ------------------>|
//!
//!   |<------- events / planning_data --|   (receive)
//!   |-------- {code: 3} -------------->|
//!   |<------- goodbye -----------------|
//! ```

pub mod channel;
pub mod descriptor;
pub mod error;
pub mod messages;
pub mod transport;
pub mod websocket;

pub use channel::{
    interpret_close, probe, ChannelEvent, ChannelState, CloseOutcome, SessionChannel,
    DEFAULT_LIVENESS_TIMEOUT, DEFAULT_QUEUE_CAPACITY,
};
pub use descriptor::{decode, ChannelAddress};
pub use error::{DescriptorError, Result, SyncError};
pub use messages::{classify, FrameError, Inbound, Message, Response, ResponseCode};
pub use transport::{
    memory::{MemoryConnector, MemoryListener, MemoryNetwork, MemorySource, MemoryTransport},
    Connector, FrameSource, Transport, TransportEvent,
};
pub use websocket::{WebSocketConnector, WebSocketSource, WebSocketTransport};
