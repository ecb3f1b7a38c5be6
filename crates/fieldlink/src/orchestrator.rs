//! Transfer orchestration over a session channel.
//!
//! A [`TransferSession`] drives one pairing at a time through
//!
//! ```text
//! idle ──> pairing ──> sending ───────┬──> completed
//!                 └──> awaiting-peer ─┴──> failed
//! ```
//!
//! The sender exports one event and waits for exactly one response. The
//! receiver imports every graph and planning payload the peer pushes until
//! the peer says goodbye or closes.

use std::sync::Arc;
use std::time::Duration;

use fieldlink_core::{EntityId, EntityKind, EventGraph};
use fieldlink_store::Store;
use fieldlink_sync::{
    probe, ChannelAddress, ChannelEvent, ChannelState, CloseOutcome, Connector, Inbound, Message,
    Response, ResponseCode, SessionChannel, SyncError, Transport, DEFAULT_LIVENESS_TIMEOUT,
    DEFAULT_QUEUE_CAPACITY,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::error::{Result, TransferError};
use crate::export::export_event_graph;
use crate::reconcile::{ImportSummary, PlanningOutcome, Reconciler};

/// Default wait for the receiver's response after sending an event.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for transfers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Maximum time for a channel to open.
    #[serde(rename = "liveness_timeout_ms", with = "millis")]
    pub liveness_timeout: Duration,
    /// Maximum time the sender waits for a response.
    #[serde(rename = "response_timeout_ms", with = "millis")]
    pub response_timeout: Duration,
    /// Whether the receiver answers each imported graph with a response.
    pub acknowledge_imports: bool,
    /// Whether a confirmed export deletes the event locally.
    pub delete_after_export: bool,
    /// Capacity of the inbound frame queue.
    pub queue_capacity: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            liveness_timeout: DEFAULT_LIVENESS_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            acknowledge_imports: true,
            delete_after_export: true,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl TransferConfig {
    pub fn with_liveness_timeout(mut self, timeout: Duration) -> Self {
        self.liveness_timeout = timeout;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_acknowledge_imports(mut self, acknowledge: bool) -> Self {
        self.acknowledge_imports = acknowledge;
        self
    }

    pub fn with_delete_after_export(mut self, delete: bool) -> Self {
        self.delete_after_export = delete;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Observation
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferPhase {
    Idle,
    Pairing,
    Sending,
    AwaitingPeer,
    Completed,
    Failed,
}

impl TransferPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferPhase::Idle => "idle",
            TransferPhase::Pairing => "pairing",
            TransferPhase::Sending => "sending",
            TransferPhase::AwaitingPeer => "awaiting-peer",
            TransferPhase::Completed => "completed",
            TransferPhase::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferPhase::Completed | TransferPhase::Failed)
    }
}

impl std::fmt::Display for TransferPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an observer sees: the phase, a status line, and how many graphs
/// the receiver has imported so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferStatus {
    pub phase: TransferPhase,
    pub line: String,
    pub imported: usize,
}

impl Default for TransferStatus {
    fn default() -> Self {
        Self {
            phase: TransferPhase::Idle,
            line: String::new(),
            imported: 0,
        }
    }
}

/// Cancels whatever the session is doing. Cloneable and usable from any task.
#[derive(Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|flag| *flag).await.is_err() {
        std::future::pending::<()>().await;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Import Gate
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Accept,
    /// Answered with `code 1` and this reason.
    Refuse(String),
}

/// Consulted by the receiver before each graph is reconciled.
pub trait ImportGate: Send + Sync {
    fn check(&self, graph: &EventGraph) -> GateDecision;
}

/// Gate that accepts every graph.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl ImportGate for AcceptAll {
    fn check(&self, _graph: &EventGraph) -> GateDecision {
        GateDecision::Accept
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reports
// ─────────────────────────────────────────────────────────────────────────────

/// A confirmed export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReport {
    pub event_id: EntityId,
    /// Entities carried by the sent graph, the event included.
    pub entities: usize,
    /// The peer's confirmation text.
    pub message: String,
    /// Whether the event was removed locally afterwards.
    pub deleted: bool,
}

/// What a receiving session imported before the peer went away.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiveReport {
    /// Graphs reconciled.
    pub graphs: usize,
    /// Graphs refused by the import gate.
    pub refused: usize,
    pub summary: ImportSummary,
    pub planning: Vec<PlanningOutcome>,
    /// The peer ended the session with a goodbye.
    pub goodbye: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

/// Everything a session needs besides its channel.
struct SessionContext<S: ?Sized> {
    store: Arc<S>,
    import_lock: Arc<Mutex<()>>,
    gate: Arc<dyn ImportGate>,
    config: TransferConfig,
    status: watch::Sender<TransferStatus>,
}

impl<S: Store + ?Sized> SessionContext<S> {
    fn publish(&self, phase: TransferPhase, line: impl Into<String>) {
        let line = line.into();
        info!(%phase, %line, "transfer status");
        self.status.send_modify(|status| {
            status.phase = phase;
            status.line = line;
        });
    }

    /// Reconcile an `events` or `event` message, answering when acknowledging.
    async fn import_graphs<T: Transport>(
        &self,
        channel: &mut SessionChannel<T>,
        message: &Message,
        report: &mut ReceiveReport,
    ) -> Result<()> {
        let acknowledge = self.config.acknowledge_imports;
        let graphs = match message.graphs() {
            Some(Ok(graphs)) => graphs,
            Some(Err(e)) => {
                warn!(error = %e, "undecodable entity graph");
                if acknowledge {
                    channel
                        .send_response(&Response::failed(format!("invalid payload: {}", e)))
                        .await?;
                }
                return Ok(());
            }
            None => return Ok(()),
        };

        let mut refusals = Vec::new();
        let mut last = None;
        {
            let _guard = self.import_lock.lock().await;
            let reconciler = Reconciler::new(self.store.as_ref());
            for graph in &graphs {
                if let GateDecision::Refuse(reason) = self.gate.check(graph) {
                    warn!(event_id = %graph.id, %reason, "import refused");
                    report.refused += 1;
                    refusals.push(reason);
                    continue;
                }
                match reconciler.import_graph(graph).await {
                    Ok(summary) => {
                        report.graphs += 1;
                        report.summary.merge(&summary);
                        let line = format!("{} event(s) received", report.graphs);
                        let imported = report.graphs;
                        self.status.send_modify(|status| {
                            status.imported = imported;
                            status.line = line;
                        });
                        last = Some(summary);
                    }
                    Err(e) => {
                        if acknowledge {
                            channel.send_response(&Response::failed(e.to_string())).await?;
                        }
                        return Err(e);
                    }
                }
            }
        }

        if acknowledge {
            let response = if !refusals.is_empty() {
                Response::refused(refusals.join("; "))
            } else {
                let detail = last.map(|s| s.to_string()).unwrap_or_default();
                Response::imported(format!("{} event(s) imported. {}", graphs.len(), detail))
            };
            channel.send_response(&response).await?;
        }
        Ok(())
    }

    /// Reconcile a `planning_data` message. No response is sent.
    async fn import_planning(
        &self,
        message: &Message,
        target: Option<&EntityId>,
        report: &mut ReceiveReport,
    ) {
        let outcome = match message.planning_payload() {
            Some(Ok(payload)) => {
                let _guard = self.import_lock.lock().await;
                PlanningOutcome::from(
                    Reconciler::new(self.store.as_ref())
                        .import_planning(target, &payload)
                        .await,
                )
            }
            Some(Err(e)) => PlanningOutcome::failed(format!("invalid planning payload: {}", e)),
            None => return,
        };
        if outcome.success {
            info!(message = %outcome.message, "planning applied");
        } else {
            warn!(message = %outcome.message, "planning rejected");
        }
        self.publish(TransferPhase::AwaitingPeer, outcome.message.clone());
        report.planning.push(outcome);
    }
}

/// Owns one session channel at a time and drives transfers over it.
pub struct TransferSession<S: ?Sized, C: Connector> {
    ctx: SessionContext<S>,
    connector: C,
    cancel: Arc<watch::Sender<bool>>,
    channel: Option<SessionChannel<C::Transport>>,
}

impl<S: Store + ?Sized, C: Connector> TransferSession<S, C> {
    /// Create a session. `import_lock` must be shared by every session
    /// writing to the same store.
    pub fn new(
        store: Arc<S>,
        import_lock: Arc<Mutex<()>>,
        connector: C,
        config: TransferConfig,
    ) -> Self {
        let (status, _) = watch::channel(TransferStatus::default());
        let (cancel, _) = watch::channel(false);
        Self {
            ctx: SessionContext {
                store,
                import_lock,
                gate: Arc::new(AcceptAll),
                config,
                status,
            },
            connector,
            cancel: Arc::new(cancel),
            channel: None,
        }
    }

    /// Replace the import gate.
    pub fn with_gate(mut self, gate: impl ImportGate + 'static) -> Self {
        self.ctx.gate = Arc::new(gate);
        self
    }

    pub fn config(&self) -> &TransferConfig {
        &self.ctx.config
    }

    pub fn status(&self) -> TransferStatus {
        self.ctx.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TransferStatus> {
        self.ctx.status.subscribe()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: Arc::clone(&self.cancel),
        }
    }

    /// State of the current channel, if a pairing was ever attempted.
    pub fn channel_state(&self) -> Option<ChannelState> {
        self.channel.as_ref().map(|channel| channel.state())
    }

    /// Check that a peer answers within the liveness timeout.
    pub async fn probe(&self, address: &ChannelAddress) -> Result<()> {
        probe(&self.connector, address, self.ctx.config.liveness_timeout)
            .await
            .map_err(Into::into)
    }

    /// Open a fresh channel, closing any previous one first.
    async fn pair(&mut self, address: &ChannelAddress) -> Result<()> {
        if let Some(mut previous) = self.channel.take() {
            if let Err(e) = previous.close().await {
                debug!(error = %e, "closing previous channel failed");
            }
        }
        self.cancel.send_replace(false);
        let mut cancel = self.cancel.subscribe();
        self.ctx.status.send_modify(|status| status.imported = 0);
        self.ctx
            .publish(TransferPhase::Pairing, format!("connecting to {}", address));

        let channel = self
            .channel
            .insert(SessionChannel::new(self.ctx.config.queue_capacity));
        tokio::select! {
            opened = channel.open(&self.connector, address, self.ctx.config.liveness_timeout) => {
                opened.map_err(TransferError::from)
            }
            _ = cancelled(&mut cancel) => Err(TransferError::Cancelled),
        }
    }

    async fn close_channel(&mut self) {
        if let Some(channel) = self.channel.as_mut() {
            if let Err(e) = channel.close().await {
                debug!(error = %e, "channel close failed");
            }
        }
    }

    fn settle<T>(&self, result: Result<T>, success: impl FnOnce(&T) -> String) -> Result<T> {
        match &result {
            Ok(value) => self.ctx.publish(TransferPhase::Completed, success(value)),
            Err(e) => {
                warn!(error = %e, "transfer failed");
                self.ctx.publish(TransferPhase::Failed, e.to_string());
            }
        }
        result
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sending
    // ─────────────────────────────────────────────────────────────────────────

    /// Export one event to the peer at `address`.
    ///
    /// Succeeds only on `code 3` or the legacy `fini`, after which the
    /// event is deleted locally when configured to.
    pub async fn send_event(
        &mut self,
        address: &ChannelAddress,
        event_id: &EntityId,
    ) -> Result<SendReport> {
        let result = self.run_send(address, event_id).await;
        self.close_channel().await;
        self.settle(result, |report| {
            format!("{} sent: {}", report.event_id, report.message)
        })
    }

    async fn run_send(&mut self, address: &ChannelAddress, event_id: &EntityId) -> Result<SendReport> {
        self.pair(address).await?;
        // Held from export through deletion so no import lands in between
        let _guard = if self.ctx.config.delete_after_export {
            Some(Arc::clone(&self.ctx.import_lock).lock_owned().await)
        } else {
            None
        };
        let today = chrono::Local::now().date_naive();
        let graph = export_event_graph(self.ctx.store.as_ref(), event_id, today).await?;
        let entities = graph.entity_count();
        let message = Message::event(&graph).map_err(SyncError::from)?;

        self.ctx.publish(
            TransferPhase::Sending,
            format!("sending {} ({} entities)", event_id, entities),
        );
        let response_timeout = self.ctx.config.response_timeout;
        let mut cancel = self.cancel.subscribe();
        let channel = self
            .channel
            .as_mut()
            .ok_or(TransferError::Sync(SyncError::NotConnected))?;
        channel.send_message(&message).await?;

        let confirmation = tokio::select! {
            answer = await_response(channel) => answer?,
            _ = tokio::time::sleep(response_timeout) => {
                return Err(TransferError::ResponseTimeout(response_timeout));
            }
            _ = cancelled(&mut cancel) => return Err(TransferError::Cancelled),
        };
        info!(%event_id, %confirmation, "export confirmed");

        let deleted = if self.ctx.config.delete_after_export {
            match self
                .ctx
                .store
                .delete(EntityKind::Event, event_id)
                .await
            {
                Ok(deleted) => deleted,
                Err(e) => {
                    warn!(%event_id, error = %e, "exported event could not be deleted");
                    false
                }
            }
        } else {
            false
        };

        Ok(SendReport {
            event_id: event_id.clone(),
            entities,
            message: confirmation,
            deleted,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Receiving
    // ─────────────────────────────────────────────────────────────────────────

    /// Import whatever the peer at `address` pushes until it leaves.
    ///
    /// `target_event` is the locally selected event that planning payloads
    /// apply to.
    pub async fn receive(
        &mut self,
        address: &ChannelAddress,
        target_event: Option<EntityId>,
    ) -> Result<ReceiveReport> {
        let result = self.run_receive(address, target_event.as_ref()).await;
        self.close_channel().await;
        self.settle(result, |report| {
            format!("{} event(s) imported", report.graphs)
        })
    }

    async fn run_receive(
        &mut self,
        address: &ChannelAddress,
        target: Option<&EntityId>,
    ) -> Result<ReceiveReport> {
        self.pair(address).await?;
        self.ctx
            .publish(TransferPhase::AwaitingPeer, "waiting for data");

        let mut report = ReceiveReport::default();
        let mut cancel = self.cancel.subscribe();
        let channel = self
            .channel
            .as_mut()
            .ok_or(TransferError::Sync(SyncError::NotConnected))?;

        loop {
            let event = tokio::select! {
                event = channel.recv() => event,
                _ = cancelled(&mut cancel) => return Err(TransferError::Cancelled),
            };
            match event {
                Some(ChannelEvent::Frame(Inbound::Message(message))) => match &message {
                    Message::Events { .. } | Message::Event { .. } => {
                        self.ctx.import_graphs(channel, &message, &mut report).await?;
                    }
                    Message::PlanningData { .. } => {
                        self.ctx.import_planning(&message, target, &mut report).await;
                    }
                    Message::Goodbye { message: note } => {
                        info!(note = ?note, "peer said goodbye");
                        report.goodbye = true;
                        return Ok(report);
                    }
                    Message::Connected => debug!("peer link ready"),
                },
                Some(ChannelEvent::Frame(Inbound::PeerError(text))) => {
                    warn!(%text, "peer reported an error");
                    self.ctx.publish(TransferPhase::AwaitingPeer, text);
                }
                Some(ChannelEvent::Frame(other)) => {
                    debug!(?other, "ignored while awaiting peer");
                }
                Some(ChannelEvent::Closed(CloseOutcome::Lost(reason))) => {
                    return Err(TransferError::ConnectionLost(reason));
                }
                Some(ChannelEvent::Closed(_)) | None => return Ok(report),
            }
        }
    }
}

/// Wait for the one response to a sent event.
async fn await_response<T: Transport>(channel: &mut SessionChannel<T>) -> Result<String> {
    loop {
        match channel.recv().await {
            Some(ChannelEvent::Frame(Inbound::Response(response))) => {
                return match response.code {
                    ResponseCode::Imported => Ok(response.message),
                    ResponseCode::Refused => Err(TransferError::Refused(response.message)),
                    ResponseCode::Failed => Err(TransferError::PeerFailed(response.message)),
                };
            }
            Some(ChannelEvent::Frame(Inbound::Done)) => return Ok("transfer complete".into()),
            Some(ChannelEvent::Frame(Inbound::PeerError(text))) => {
                return Err(TransferError::PeerFailed(text));
            }
            Some(ChannelEvent::Frame(Inbound::Message(Message::Goodbye { .. }))) => {
                return Err(TransferError::PeerClosed);
            }
            Some(ChannelEvent::Frame(Inbound::Message(other))) => {
                debug!(kind = other.kind(), "ignored while awaiting response");
            }
            Some(ChannelEvent::Closed(CloseOutcome::Lost(reason))) => {
                return Err(TransferError::ConnectionLost(reason));
            }
            Some(ChannelEvent::Closed(_)) | None => return Err(TransferError::PeerClosed),
        }
    }
}
