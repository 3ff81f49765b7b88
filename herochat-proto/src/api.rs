//! Request and response bodies for the HTTP fallback endpoints.
//!
//! | Endpoint                          | Request              | Response             |
//! |-----------------------------------|----------------------|----------------------|
//! | `POST /api/chat/send`             | [`SendRequest`]      | [`SendResponse`]     |
//! | `POST /api/chat/status`           | [`StatusRequest`]    | [`StatusResponse`]   |
//! | `POST /api/chat/{peer}/mark-read` | [`MarkReadRequest`]  | [`ApiAck`]           |
//! | `GET /api/chat/{peer}/messages`   | -                    | [`MessagesResponse`] |
//! | `GET /api/user/{peer}/status`     | -                    | [`PresenceResponse`] |
//!
//! Every response carries `success`. When it is `false`, `message` holds
//! a human-readable reason.
//!
//! The stock server has no `/api/chat/status` route. Clients treat a failed
//! status lookup as missing and read the message list instead.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::message::{ConfirmedId, CorrelationId, LifecycleState, ServerMessage};
use crate::presence::PresenceStatus;

/// Body of `POST /api/chat/send`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRequest {
    /// Conversation peer.
    pub receiver_id: u64,
    /// Message text.
    pub content: String,
}

/// The stored message echoed back by a successful send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Server-assigned id.
    pub id: ConfirmedId,
    /// Initial server-side state, when reported.
    #[serde(default)]
    pub status: Option<LifecycleState>,
}

/// The `message` field of [`SendResponse`]: an object on success, a reason
/// string on failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SendOutcome {
    /// The message was stored.
    Stored(StoredMessage),
    /// The server refused the message.
    Reason(String),
}

/// Response of `POST /api/chat/send`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendResponse {
    /// Whether the message was stored.
    pub success: bool,
    /// Stored message or failure reason.
    #[serde(default)]
    pub message: Option<SendOutcome>,
}

/// Body of `POST /api/chat/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRequest {
    /// Messages to look up.
    pub message_ids: Vec<CorrelationId>,
}

/// Response of `POST /api/chat/status`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Whether the lookup ran.
    pub success: bool,
    /// Known states, keyed by the id form used in the request.
    #[serde(default)]
    pub statuses: HashMap<CorrelationId, LifecycleState>,
    /// Failure reason.
    #[serde(default)]
    pub message: Option<String>,
}

/// Body of `POST /api/chat/{peer}/mark-read`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkReadRequest {
    /// Author of the messages being read.
    pub sender_id: u64,
}

/// Generic `{success, message}` response.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ApiAck {
    /// Whether the request succeeded.
    pub success: bool,
    /// Failure reason.
    #[serde(default)]
    pub message: Option<String>,
}

/// Response of `GET /api/chat/{peer}/messages`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MessagesResponse {
    /// Whether the listing ran.
    pub success: bool,
    /// Messages, newest first.
    #[serde(default)]
    pub messages: Vec<ServerMessage>,
    /// Whether older pages exist.
    #[serde(default)]
    pub has_next: bool,
    /// Failure reason.
    #[serde(default)]
    pub message: Option<String>,
}

/// Response of `GET /api/user/{peer}/status`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PresenceResponse {
    /// Whether the lookup ran.
    pub success: bool,
    /// The user looked up.
    #[serde(default)]
    pub user_id: Option<u64>,
    /// Current presence.
    #[serde(default)]
    pub status: Option<PresenceStatus>,
    /// Last time the user was seen, as the server formats it.
    #[serde(default)]
    pub last_seen: Option<String>,
    /// Failure reason.
    #[serde(default)]
    pub message: Option<String>,
}
