//! Push-channel frames exchanged with the chat server.
//!
//! Every frame is a JSON object `{"event": <name>, "data": {...}}`.
//! [`PushCommand`] flows client to server, [`PushEvent`] server to client.
//! The server emits many event kinds that have nothing to do with delivery
//! tracking; [`KNOWN_EVENTS`] lists the ones this crate decodes.

use serde::{Deserialize, Serialize};

use crate::message::{ConfirmedId, CorrelationId, LifecycleState, ProvisionalId};
use crate::presence::PresenceStatus;

/// Event names decoded into [`PushEvent`]. Anything else is skipped.
pub const KNOWN_EVENTS: &[&str] = &[
    "message_delivered",
    "message_status_update",
    "delivery_status_response",
    "messages_read",
    "send_message_error",
    "user_status",
    "status_response",
];

/// Commands the client emits over the push channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum PushCommand {
    /// Submit a new message. The server echoes `temp_id` in its acknowledgment.
    SendMessage {
        /// Conversation peer.
        receiver_id: u64,
        /// Message text.
        content: String,
        /// Provisional identity used to correlate the acknowledgment.
        temp_id: ProvisionalId,
        /// Whether the sender believed the recipient was online.
        friend_online: bool,
    },
    /// Mark every message from `sender_id` to us as read.
    MarkRead {
        /// Author of the messages being read (the conversation peer).
        sender_id: u64,
    },
    /// Ask the server to re-report the status of stale messages.
    RequestMessageStatus {
        /// Messages to re-check, in whichever identity form is known.
        message_ids: Vec<CorrelationId>,
        /// Conversation peer.
        receiver_id: u64,
    },
    /// Join the conversation room so peer events are routed to us.
    JoinChat {
        /// Conversation peer.
        user_id: u64,
    },
    /// Ask for the current presence of a user.
    RequestStatus {
        /// User whose presence is requested.
        user_id: u64,
    },
}

/// Server events relevant to delivery tracking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum PushEvent {
    /// The server stored a message submitted over the push channel.
    MessageDelivered {
        /// Echo of the submitting client's provisional id.
        #[serde(default)]
        temp_id: Option<ProvisionalId>,
        /// Server-assigned id.
        message_id: ConfirmedId,
        /// Initial server-side state (`sent` or `delivered`).
        status: LifecycleState,
    },
    /// A message's server-side state changed.
    MessageStatusUpdate {
        /// Message reference.
        message_id: CorrelationId,
        /// New state.
        status: LifecycleState,
    },
    /// Answer to [`PushCommand::RequestMessageStatus`].
    DeliveryStatusResponse {
        /// Message reference, as sent in the request.
        message_id: CorrelationId,
        /// Current server-side state.
        status: LifecycleState,
        /// Whether the recipient is online right now.
        #[serde(default)]
        receiver_online: bool,
    },
    /// The conversation peer read our messages.
    MessagesRead {
        /// User who read the messages.
        #[serde(alias = "sender_id")]
        reader_id: u64,
        /// Display name of the reader.
        #[serde(default)]
        reader_username: String,
    },
    /// The server refused a message submitted over the push channel.
    SendMessageError {
        /// Echo of the provisional id, when the server could parse it.
        #[serde(default)]
        temp_id: Option<ProvisionalId>,
        /// Human-readable reason.
        #[serde(default, alias = "error")]
        message: String,
    },
    /// A user's presence changed (also sent as `status_response`).
    #[serde(alias = "status_response")]
    UserStatus {
        /// User whose presence changed.
        user_id: u64,
        /// New presence.
        status: PresenceStatus,
    },
}
