//! Per-message tracking record.

use tokio::time::Instant;

use herochat_proto::message::{ConfirmedId, ContentFingerprint, LifecycleState, ProvisionalId};

use crate::transport::Route;

/// One outbound message the tracker is following.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedMessage {
    /// Identity minted at submission.
    pub provisional_id: ProvisionalId,
    /// Server identity, once known.
    pub confirmed_id: Option<ConfirmedId>,
    /// Trimmed message text.
    pub content: String,
    /// Fingerprint of `content`.
    pub fingerprint: ContentFingerprint,
    /// When the message was accepted.
    pub submitted_at: Instant,
    /// Current lifecycle state.
    pub state: LifecycleState,
    /// The recipient was offline when this message was submitted and it has
    /// not been seen as delivered since.
    pub delivered_while_recipient_offline: bool,
    /// Dispatched over the push channel.
    pub dispatched_via_primary: bool,
    /// Dispatched over the request/response fallback.
    pub dispatched_via_fallback: bool,
}

impl TrackedMessage {
    /// Create a `Pending` record for freshly accepted content.
    #[must_use]
    pub fn new(content: String, recipient_online: bool) -> Self {
        let fingerprint = ContentFingerprint::of(&content);
        Self {
            provisional_id: ProvisionalId::new(),
            confirmed_id: None,
            content,
            fingerprint,
            submitted_at: Instant::now(),
            state: LifecycleState::Pending,
            delivered_while_recipient_offline: !recipient_online,
            dispatched_via_primary: false,
            dispatched_via_fallback: false,
        }
    }

    /// Record the route this message goes out on.
    ///
    /// Returns `false`, leaving the record unchanged, if it was already
    /// dispatched on either route.
    pub const fn mark_dispatched(&mut self, route: Route) -> bool {
        if self.dispatched_via_primary || self.dispatched_via_fallback {
            return false;
        }
        match route {
            Route::Primary => self.dispatched_via_primary = true,
            Route::Fallback => self.dispatched_via_fallback = true,
        }
        true
    }

    /// Move to `next` if that is a forward transition.
    ///
    /// Reaching `Delivered` or `Read` clears the offline flag. Returns
    /// whether the state changed.
    pub fn advance(&mut self, next: LifecycleState) -> bool {
        if !self.state.can_advance_to(next) {
            return false;
        }
        self.state = next;
        if matches!(next, LifecycleState::Delivered | LifecycleState::Read) {
            self.delivered_while_recipient_offline = false;
        }
        true
    }

    /// The route this message was dispatched on, if any.
    #[must_use]
    pub const fn route(&self) -> Option<Route> {
        if self.dispatched_via_primary {
            Some(Route::Primary)
        } else if self.dispatched_via_fallback {
            Some(Route::Fallback)
        } else {
            None
        }
    }
}
