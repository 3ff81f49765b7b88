//! Message identity and lifecycle types for the `HeroChat` protocol.
//!
//! Outbound messages carry two identities over their lifetime: a
//! [`ProvisionalId`] minted by the client at submission time, and a
//! [`ConfirmedId`] assigned by the server once it has stored the message.
//! Server events may refer to a message by either, so both are wrapped in
//! [`CorrelationId`] on the wire.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Default maximum allowed message content size in bytes (64 KB).
pub const MAX_CONTENT_LEN: usize = 64 * 1024;

/// Prefix shared by every provisional identifier.
const PROVISIONAL_PREFIX: &str = "temp_";

/// Client-generated identifier for a message the server has not yet stored.
///
/// Formatted as `temp_<uuid-v7>`. UUID v7 is time-ordered with a random
/// tail, so identifiers are never reused within or across sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProvisionalId(String);

impl ProvisionalId {
    /// Mints a fresh provisional identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(format!("{PROVISIONAL_PREFIX}{}", Uuid::now_v7().simple()))
    }

    /// Wraps an identifier received from the server (e.g. an echoed `temp_id`).
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ProvisionalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProvisionalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server-assigned message identifier (the backend's primary key).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfirmedId(u64);

impl ConfirmedId {
    /// Wraps a server message id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw numeric id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConfirmedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A reference to a message in either of its identity forms.
///
/// On the wire a JSON number is a confirmed id. A JSON string is a
/// provisional id unless it is made entirely of digits, in which case it is
/// treated as a stringified confirmed id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CorrelationId {
    /// Client-generated identity.
    Provisional(ProvisionalId),
    /// Server-assigned identity.
    Confirmed(ConfirmedId),
}

impl CorrelationId {
    /// Parses the textual form used in JSON strings and URLs.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        raw.parse::<u64>().map_or_else(
            |_| Self::Provisional(ProvisionalId::from_raw(raw)),
            |id| Self::Confirmed(ConfirmedId::new(id)),
        )
    }
}

impl From<ProvisionalId> for CorrelationId {
    fn from(id: ProvisionalId) -> Self {
        Self::Provisional(id)
    }
}

impl From<ConfirmedId> for CorrelationId {
    fn from(id: ConfirmedId) -> Self {
        Self::Confirmed(id)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Provisional(id) => write!(f, "{id}"),
            Self::Confirmed(id) => write!(f, "{id}"),
        }
    }
}

impl Serialize for CorrelationId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Provisional(id) => serializer.serialize_str(id.as_str()),
            Self::Confirmed(id) => serializer.serialize_u64(id.get()),
        }
    }
}

impl<'de> Deserialize<'de> for CorrelationId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Number(id) => Self::Confirmed(ConfirmedId::new(id)),
            Raw::Text(text) => Self::parse(&text),
        })
    }
}

/// Delivery lifecycle of an outbound message.
///
/// The derived ordering is the lifecycle ordering for the non-terminal
/// chain `Pending < Sent < Delivered < Read`. `Failed` sorts last but is not
/// "after" `Read`; use [`can_advance_to`](Self::can_advance_to) for
/// transition decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// Created locally, not yet acknowledged by the server.
    Pending,
    /// Stored by the server; recipient has not received it.
    #[serde(alias = "sent_offline")]
    Sent,
    /// Received by the recipient's client.
    Delivered,
    /// Seen by the recipient.
    Read,
    /// Could not be dispatched. Terminal.
    Failed,
}

impl LifecycleState {
    /// Returns `true` if moving from `self` to `next` is a forward transition.
    ///
    /// Same-state moves are not transitions. Nothing leaves `Read` or
    /// `Failed`, and every other state may move to `Failed`.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Read | Self::Failed, _) => false,
            (_, Self::Failed) => true,
            (current, next) => (next as u8) > (current as u8),
        }
    }

    /// Returns `true` for states that end tracking (`Read`, `Failed`).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Read | Self::Failed)
    }

    /// Returns `true` while the server may still report progress.
    #[must_use]
    pub const fn is_awaiting_confirmation(self) -> bool {
        matches!(self, Self::Pending | Self::Sent)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Cheap, stable hash of normalized message content.
///
/// Content is trimmed before hashing, and the first eight bytes of its
/// SHA-256 digest are kept. Collisions only cause a false duplicate
/// suppression, which is acceptable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentFingerprint(u64);

impl ContentFingerprint {
    /// Fingerprints `content` after trimming surrounding whitespace.
    #[must_use]
    pub fn of(content: &str) -> Self {
        let digest = Sha256::digest(content.trim().as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        Self(u64::from_be_bytes(head))
    }

    /// Returns the fingerprint value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContentFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// One message as reported by the server's message-list endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerMessage {
    /// Server-assigned id.
    pub id: ConfirmedId,
    /// Author's user id.
    pub sender_id: u64,
    /// Message text.
    pub content: String,
    /// ISO-8601 timestamp, as formatted by the server.
    #[serde(default)]
    pub timestamp: String,
    /// Server-side lifecycle state.
    #[serde(default = "default_server_state")]
    pub status: LifecycleState,
    /// Whether the requesting user authored this message.
    #[serde(default)]
    pub is_own: bool,
}

const fn default_server_state() -> LifecycleState {
    LifecycleState::Sent
}
