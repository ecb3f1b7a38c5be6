//! Session channel: one duplex message channel per pairing attempt.
//!
//! ```text
//! idle ──open──> establishing ──> open ──close──> closing ──> closed
//!                     │            │
//!                     └── fail ────┴── abnormal closure ──> lost
//! ```
//!
//! `closed` and `lost` are terminal. A reader task pushes inbound events
//! onto a queue; [`SessionChannel::recv`] consumes them in arrival order,
//! classifies each frame and interprets the final closure.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::descriptor::ChannelAddress;
use crate::error::{Result, SyncError};
use crate::messages::{classify, Inbound, Message, Response, ResponseCode};
use crate::transport::{
    Connector, FrameSource, Transport, TransportEvent, CLOSE_ABNORMAL, CLOSE_GOING_AWAY,
    CLOSE_NORMAL, CLOSE_NO_STATUS, CLOSE_PROTOCOL_ERROR,
};

/// Default liveness timeout for establishment.
pub const DEFAULT_LIVENESS_TIMEOUT: Duration = Duration::from_secs(5);

/// Default capacity of the inbound queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    Idle,
    Establishing,
    Open,
    Closing,
    Closed,
    Lost,
}

impl ChannelState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChannelState::Closed | ChannelState::Lost)
    }
}

/// How a channel ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Normal closure.
    Normal,
    /// Abnormal closure right after a goodbye or a confirmed success.
    ExpectedTeardown,
    /// The connection was lost; carries a human-readable cause.
    Lost(String),
}

/// What [`SessionChannel::recv`] yields.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Frame(Inbound),
    Closed(CloseOutcome),
}

/// Interpret a close code.
///
/// `expected` is true when the closure was announced by a goodbye or
/// follows a confirmed success; abnormal codes are then teardown artifacts.
pub fn interpret_close(code: u16, reason: &str, expected: bool) -> CloseOutcome {
    match code {
        CLOSE_NORMAL | CLOSE_NO_STATUS => CloseOutcome::Normal,
        _ if expected => CloseOutcome::ExpectedTeardown,
        CLOSE_ABNORMAL => CloseOutcome::Lost("connection lost".into()),
        CLOSE_GOING_AWAY => CloseOutcome::Lost("connection lost: server stopped".into()),
        CLOSE_PROTOCOL_ERROR => CloseOutcome::Lost("connection lost: protocol error".into()),
        other if reason.is_empty() => {
            CloseOutcome::Lost(format!("connection lost: closed with code {}", other))
        }
        other => CloseOutcome::Lost(format!(
            "connection lost: closed with code {} ({})",
            other, reason
        )),
    }
}

/// Owns exactly one duplex channel to a peer.
pub struct SessionChannel<T: Transport> {
    state: watch::Sender<ChannelState>,
    transport: Option<T>,
    events: Option<mpsc::Receiver<TransportEvent>>,
    reader: Option<JoinHandle<()>>,
    capacity: usize,
    /// A goodbye was seen or sent: the next closure is expected.
    expected_close: bool,
    /// A success outcome was seen or sent (`fini` or code 3).
    finished: bool,
}

impl<T: Transport> SessionChannel<T> {
    /// A fresh channel in the `idle` state.
    pub fn new(capacity: usize) -> Self {
        let (state, _) = watch::channel(ChannelState::Idle);
        Self {
            state,
            transport: None,
            events: None,
            reader: None,
            capacity: capacity.max(1),
            expected_close: false,
            finished: false,
        }
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Observe state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ChannelState) {
        self.state.send_replace(state);
    }

    /// Establish the channel, failing if `liveness` elapses first.
    pub async fn open<C>(
        &mut self,
        connector: &C,
        address: &ChannelAddress,
        liveness: Duration,
    ) -> Result<()>
    where
        C: Connector<Transport = T>,
    {
        let state = self.state();
        if state != ChannelState::Idle {
            return Err(SyncError::AlreadyUsed(state));
        }
        self.set_state(ChannelState::Establishing);
        debug!(%address, "establishing channel");

        let (transport, source) =
            match tokio::time::timeout(liveness, connector.connect(address)).await {
                Ok(Ok(halves)) => halves,
                Ok(Err(e)) => {
                    warn!(%address, error = %e, "channel establishment failed");
                    self.set_state(ChannelState::Lost);
                    return Err(e);
                }
                Err(_) => {
                    warn!(%address, ?liveness, "no answer within liveness timeout");
                    self.set_state(ChannelState::Lost);
                    return Err(SyncError::LivenessTimeout(liveness));
                }
            };

        let (tx, rx) = mpsc::channel(self.capacity);
        self.reader = Some(tokio::spawn(read_loop(source, tx)));
        self.transport = Some(transport);
        self.events = Some(rx);
        self.set_state(ChannelState::Open);
        info!(%address, "channel open");
        Ok(())
    }

    /// Transmit one text frame.
    pub async fn send(&mut self, text: String) -> Result<()> {
        if self.state() != ChannelState::Open {
            return Err(SyncError::NotConnected);
        }
        let transport = self.transport.as_mut().ok_or(SyncError::NotConnected)?;
        debug!(len = text.len(), "sending frame");
        transport.send_text(text).await
    }

    /// Send a structured message. Sending a goodbye marks the next
    /// closure as expected.
    pub async fn send_message(&mut self, message: &Message) -> Result<()> {
        let text = message.to_text()?;
        self.send(text).await?;
        if matches!(message, Message::Goodbye { .. }) {
            self.expected_close = true;
        }
        Ok(())
    }

    /// Send a response envelope. A sent `code 3` is a confirmed success.
    pub async fn send_response(&mut self, response: &Response) -> Result<()> {
        let text = response.to_text()?;
        self.send(text).await?;
        if response.code == ResponseCode::Imported {
            self.finished = true;
        }
        Ok(())
    }

    /// Next inbound event, in arrival order.
    ///
    /// Unparseable frames are logged and skipped. After the closing event
    /// has been returned, yields `None`.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        loop {
            let events = self.events.as_mut()?;
            let event = events.recv().await.unwrap_or(TransportEvent::Closed {
                code: CLOSE_ABNORMAL,
                reason: "reader stopped".into(),
            });
            match event {
                TransportEvent::Text(text) => match classify(&text) {
                    Ok(inbound) => {
                        self.observe(&inbound);
                        return Some(ChannelEvent::Frame(inbound));
                    }
                    Err(e) => {
                        warn!(error = %e, frame = %truncate(&text), "discarding frame");
                        continue;
                    }
                },
                TransportEvent::Closed { code, reason } => {
                    return Some(ChannelEvent::Closed(self.finish(code, &reason)));
                }
                TransportEvent::Error(e) => {
                    warn!(error = %e, "transport error");
                    return Some(ChannelEvent::Closed(self.finish(CLOSE_ABNORMAL, &e)));
                }
            }
        }
    }

    fn observe(&mut self, inbound: &Inbound) {
        match inbound {
            Inbound::Done => self.finished = true,
            Inbound::Response(r) if r.code == ResponseCode::Imported => self.finished = true,
            Inbound::Message(Message::Goodbye { .. }) => self.expected_close = true,
            _ => {}
        }
    }

    fn finish(&mut self, code: u16, reason: &str) -> CloseOutcome {
        let outcome = interpret_close(code, reason, self.expected_close || self.finished);
        match &outcome {
            CloseOutcome::Lost(why) => {
                warn!(code, reason = %why, "channel lost");
                self.set_state(ChannelState::Lost);
            }
            _ => {
                debug!(code, ?outcome, "channel closed");
                self.set_state(ChannelState::Closed);
            }
        }
        self.events = None;
        self.transport = None;
        outcome
    }

    /// Close the channel. Idempotent; a no-op on terminal channels.
    pub async fn close(&mut self) -> Result<()> {
        match self.state() {
            ChannelState::Closed | ChannelState::Lost => return Ok(()),
            ChannelState::Idle | ChannelState::Establishing => {
                self.set_state(ChannelState::Closed);
                return Ok(());
            }
            ChannelState::Open | ChannelState::Closing => {}
        }
        self.set_state(ChannelState::Closing);
        self.expected_close = true;
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.close().await {
                debug!(error = %e, "close handshake failed");
            }
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.events = None;
        self.set_state(ChannelState::Closed);
        debug!("channel closed locally");
        Ok(())
    }
}

impl<T: Transport> Drop for SessionChannel<T> {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

async fn read_loop<S: FrameSource>(mut source: S, tx: mpsc::Sender<TransportEvent>) {
    while let Some(event) = source.next_event().await {
        let last = !matches!(event, TransportEvent::Text(_));
        if tx.send(event).await.is_err() || last {
            break;
        }
    }
}

fn truncate(text: &str) -> &str {
    match text.char_indices().nth(80) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Check that a peer answers: open a channel and close it right away.
pub async fn probe<C: Connector>(
    connector: &C,
    address: &ChannelAddress,
    liveness: Duration,
) -> Result<()> {
    let mut channel = SessionChannel::<C::Transport>::new(1);
    channel.open(connector, address, liveness).await?;
    channel.close().await
}
