//! Wire types for the hub WebSocket protocol.
//!
//! Every frame is a single JSON object, normally carrying a `type`
//! discriminator; correlated replies may leave it out. Outbound requests after authentication carry a numeric `id` that the hub
//! echoes back on the matching `result` (or on every `event` of a standing
//! subscription).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Event type the resync engine subscribes to.
pub const STATE_CHANGED: &str = "state_changed";

/// Messages sent from the client to the hub.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    /// Credential answer to `auth_required`. Carries no id.
    Auth {
        /// Long-lived access token.
        access_token: String,
    },
    /// One-shot request for the full entity state list.
    GetStates {
        /// Correlation id.
        id: u64,
    },
    /// Standing subscription to an event stream.
    SubscribeEvents {
        /// Correlation id shared by the ack and every later event.
        id: u64,
        /// Event type filter applied by the hub.
        event_type: String,
    },
    /// Fire-and-forget service invocation.
    CallService {
        /// Id required by the hub; never registered for a reply.
        id: u64,
        /// Service domain, e.g. `light`.
        domain: String,
        /// Service name, e.g. `toggle`.
        service: String,
        /// Service payload; always contains `entity_id`.
        service_data: Map<String, Value>,
    },
}

impl Outbound {
    /// Wire name of this message, used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Outbound::Auth { .. } => "auth",
            Outbound::GetStates { .. } => "get_states",
            Outbound::SubscribeEvents { .. } => "subscribe_events",
            Outbound::CallService { .. } => "call_service",
        }
    }

    /// Correlation id, if this message carries one.
    pub fn id(&self) -> Option<u64> {
        match self {
            Outbound::Auth { .. } => None,
            Outbound::GetStates { id }
            | Outbound::SubscribeEvents { id, .. }
            | Outbound::CallService { id, .. } => Some(*id),
        }
    }
}

/// Messages received from the hub.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    /// First message on every connection.
    AuthRequired {
        /// Hub software version, when reported.
        #[serde(default)]
        ha_version: Option<String>,
    },
    /// Credential accepted.
    AuthOk {
        /// Hub software version, when reported.
        #[serde(default)]
        ha_version: Option<String>,
    },
    /// Credential rejected. The hub closes the connection afterwards.
    AuthInvalid {
        /// Human-readable rejection reason.
        #[serde(default)]
        message: Option<String>,
    },
    /// Reply to a correlated request.
    Result {
        /// Id of the request this answers.
        id: u64,
        /// Whether the hub executed the request.
        success: bool,
        /// Request-specific payload.
        #[serde(default)]
        result: Option<Value>,
        /// Failure details when `success` is false.
        #[serde(default)]
        error: Option<HubError>,
    },
    /// Notification delivered on a standing subscription.
    Event {
        /// Id of the subscription request.
        id: u64,
        /// The event itself.
        event: HubEvent,
    },
    /// Any message type this client does not understand.
    #[serde(other)]
    Unknown,
}

impl Inbound {
    /// Parses a raw text frame.
    ///
    /// A correlated reply may omit `type`; an object carrying `id` and
    /// `success` without one is read as a `result`.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        let mut value: Value = serde_json::from_str(raw)?;
        if let Value::Object(fields) = &mut value {
            if !fields.contains_key("type")
                && fields.contains_key("id")
                && fields.contains_key("success")
            {
                fields.insert("type".to_string(), Value::String("result".to_string()));
            }
        }
        serde_json::from_value(value)
    }

    /// Correlation id, for replies and events.
    pub fn id(&self) -> Option<u64> {
        match self {
            Inbound::Result { id, .. } | Inbound::Event { id, .. } => Some(*id),
            _ => None,
        }
    }
}

/// Error body of a failed `result`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubError {
    /// Machine-readable error code, e.g. `unknown_command`.
    pub code: String,
    /// Human-readable description.
    #[serde(default)]
    pub message: String,
}

/// An event pushed by the hub on a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubEvent {
    /// Event type, e.g. `state_changed`.
    pub event_type: String,
    /// Event payload.
    #[serde(default)]
    pub data: Value,
    /// Timestamp the hub fired the event at.
    #[serde(default)]
    pub time_fired: Option<String>,
}

impl HubEvent {
    /// The entity a `state_changed` event refers to, when present.
    pub fn entity_id(&self) -> Option<&str> {
        self.data.get("entity_id").and_then(Value::as_str)
    }
}

/// Payload handed to a pending request's completion.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// A `result` frame.
    Result {
        /// Whether the hub executed the request.
        success: bool,
        /// Request-specific payload.
        result: Option<Value>,
        /// Failure details when `success` is false.
        error: Option<HubError>,
    },
    /// An `event` frame on a subscription.
    Event(HubEvent),
}

impl Reply {
    /// Splits an inbound frame into its correlation id and reply payload.
    ///
    /// Returns `None` for control and unknown messages.
    pub fn from_inbound(message: Inbound) -> Option<(u64, Reply)> {
        match message {
            Inbound::Result {
                id,
                success,
                result,
                error,
            } => Some((
                id,
                Reply::Result {
                    success,
                    result,
                    error,
                },
            )),
            Inbound::Event { id, event } => Some((id, Reply::Event(event))),
            _ => None,
        }
    }
}
