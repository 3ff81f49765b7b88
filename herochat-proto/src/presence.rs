//! Presence status types for the conversation peer.

use serde::{Deserialize, Serialize};

/// Presence status of a user as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    /// User has an active connection.
    Online,
    /// User is connected but idle.
    Away,
    /// User has no active connection.
    Offline,
}

impl PresenceStatus {
    /// Returns `true` only for [`PresenceStatus::Online`].
    ///
    /// Delivery decisions treat an idle user as unreachable.
    #[must_use]
    pub const fn is_online(self) -> bool {
        matches!(self, Self::Online)
    }
}

impl std::fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Away => write!(f, "away"),
            Self::Offline => write!(f, "offline"),
        }
    }
}
