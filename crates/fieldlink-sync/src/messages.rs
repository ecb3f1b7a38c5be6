//! Message envelope exchanged over a session channel.
//!
//! Every frame is one text message. Three shapes are recognized, checked in
//! this order:
//!
//! 1. Legacy sentinels: the literal `fini` (transfer complete) and any text
//!    beginning with `erreur:` or `erreur_json:` (peer failure).
//! 2. Structured messages: JSON objects with a `type`.
//! 3. Response envelopes: JSON objects with no `type` and a numeric `code`.
//!
//! Anything else is logged and discarded by the channel.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use fieldlink_core::{normalize_graphs, normalize_planning, CoreError, EventGraph, PlanningPayload};

/// Legacy "transfer complete" sentinel.
pub const SENTINEL_DONE: &str = "fini";

/// Legacy peer failure prefixes.
pub const SENTINEL_ERROR: &str = "erreur:";
pub const SENTINEL_JSON_ERROR: &str = "erreur_json:";

/// Acknowledgement code carried by a response envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ResponseCode {
    /// The receiver would not take the payload.
    Refused = 1,
    /// The receiver accepted the payload but could not store it.
    Failed = 2,
    /// The payload was imported.
    Imported = 3,
}

impl TryFrom<u8> for ResponseCode {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(ResponseCode::Refused),
            2 => Ok(ResponseCode::Failed),
            3 => Ok(ResponseCode::Imported),
            other => Err(format!("unknown response code {}", other)),
        }
    }
}

impl From<ResponseCode> for u8 {
    fn from(code: ResponseCode) -> u8 {
        code as u8
    }
}

/// `{ "code": 1|2|3, "message": "..." }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub code: ResponseCode,
    #[serde(default)]
    pub message: String,
}

impl Response {
    pub fn new(code: ResponseCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn imported(message: impl Into<String>) -> Self {
        Self::new(ResponseCode::Imported, message)
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(ResponseCode::Failed, message)
    }

    pub fn refused(message: impl Into<String>) -> Self {
        Self::new(ResponseCode::Refused, message)
    }

    pub fn to_text(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Structured messages, tagged by `type`.
///
/// Payloads are kept as raw JSON here: decoding them is part of the import
/// and its failure must be answered with a response, not dropped as an
/// unparseable frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Link ready.
    Connected,
    /// `data` is an array of entity graphs.
    Events { data: Value },
    /// `data` is one entity graph.
    Event { data: Value },
    /// Action groups for the pre-selected event.
    PlanningData {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        /// Legacy placement of the groups.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        actions: Option<Value>,
    },
    /// Intentional termination; the following closure is expected.
    Goodbye {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl Message {
    /// An `event` message carrying one graph.
    pub fn event(graph: &EventGraph) -> serde_json::Result<Self> {
        Ok(Message::Event {
            data: serde_json::to_value(graph)?,
        })
    }

    pub fn goodbye(message: impl Into<String>) -> Self {
        Message::Goodbye {
            message: Some(message.into()),
        }
    }

    pub fn planning(payload: &PlanningPayload) -> serde_json::Result<Self> {
        Ok(Message::PlanningData {
            data: Some(serde_json::to_value(payload)?),
            actions: None,
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Message::Connected => "connected",
            Message::Events { .. } => "events",
            Message::Event { .. } => "event",
            Message::PlanningData { .. } => "planning_data",
            Message::Goodbye { .. } => "goodbye",
        }
    }

    /// Normalized graphs carried by an `events` or `event` message.
    ///
    /// Returns `None` for other message kinds.
    pub fn graphs(&self) -> Option<Result<Vec<EventGraph>, CoreError>> {
        match self {
            Message::Events { data } | Message::Event { data } => {
                Some(normalize_graphs(data.clone()))
            }
            _ => None,
        }
    }

    /// Normalized planning payload of a `planning_data` message.
    ///
    /// `data` wins when it holds the groups (an array, or an object with an
    /// `actions` array); otherwise the legacy top-level `actions` is used.
    pub fn planning_payload(&self) -> Option<Result<PlanningPayload, CoreError>> {
        let Message::PlanningData { data, actions } = self else {
            return None;
        };
        let from_data = data.as_ref().filter(|d| {
            d.is_array() || d.get("actions").map_or(false, Value::is_array)
        });
        let payload = match (from_data, actions) {
            (Some(d), _) => d.clone(),
            (None, Some(a)) => a.clone(),
            (None, None) => Value::Array(Vec::new()),
        };
        Some(normalize_planning(payload))
    }

    pub fn to_text(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// One classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Legacy `fini`.
    Done,
    /// Legacy `erreur:` / `erreur_json:` with the peer's text.
    PeerError(String),
    Message(Message),
    Response(Response),
}

/// Why a frame was discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    NotJson,
    Unrecognized(String),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::NotJson => f.write_str("not JSON and not a sentinel"),
            FrameError::Unrecognized(why) => write!(f, "unrecognized frame: {}", why),
        }
    }
}

/// Classify a text frame. Sentinels are recognized before any JSON parsing.
pub fn classify(text: &str) -> Result<Inbound, FrameError> {
    let trimmed = text.trim();
    if trimmed == SENTINEL_DONE {
        return Ok(Inbound::Done);
    }
    for prefix in [SENTINEL_ERROR, SENTINEL_JSON_ERROR] {
        if trimmed.starts_with(prefix) {
            return Ok(Inbound::PeerError(trimmed.to_string()));
        }
    }

    let value: Value = serde_json::from_str(trimmed).map_err(|_| FrameError::NotJson)?;
    let Some(map) = value.as_object() else {
        return Err(FrameError::Unrecognized("not an object".into()));
    };
    if let Some(ty) = map.get("type") {
        let ty = ty.to_string();
        return serde_json::from_value::<Message>(value)
            .map(Inbound::Message)
            .map_err(|e| FrameError::Unrecognized(format!("type {}: {}", ty, e)));
    }
    if map.get("code").map_or(false, Value::is_number) {
        return serde_json::from_value::<Response>(value)
            .map(Inbound::Response)
            .map_err(|e| FrameError::Unrecognized(e.to_string()));
    }
    Err(FrameError::Unrecognized("neither type nor code".into()))
}
