//! Message delivery tracking for one conversation.
//!
//! The [`DeliveryTracker`] follows every outbound message from submission
//! through `Pending -> Sent -> Delivered -> Read` (or `Failed`), merging
//! confirmations that arrive over the push channel, the HTTP fallback, and
//! periodic authoritative refreshes. State only ever moves forward, so
//! confirmations may arrive late, twice, or out of order.
//!
//! Renderer notifications are [`TrackerEvent`]s on a bounded channel, sent
//! with `try_send` so a slow consumer never stalls the tracker.
//!
//! The operations are split across submodules:
//! - [`send`]: submission and dispatch
//! - [`confirm`]: confirmations, read receipts, presence, push events
//! - [`reconcile`]: stale re-checks, authoritative refresh, timers

pub mod confirm;
pub mod guard;
pub mod message;
pub mod reconcile;
pub mod send;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use herochat_proto::message::{
    ConfirmedId, CorrelationId, LifecycleState, MAX_CONTENT_LEN, ProvisionalId, ServerMessage,
};

use crate::transport::{FallbackChannel, PushChannel};

use guard::DuplicateWindow;
use message::TrackedMessage;

/// Default width of the duplicate-suppression window.
const DEFAULT_DUPLICATE_WINDOW: Duration = Duration::from_millis(2000);

/// Maximum number of settled statuses remembered before the map is reset.
const MAX_SETTLED_TRACKING: usize = 10_000;

/// Reasons a submission is refused. Refusals create no tracking state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// Nothing left after trimming whitespace.
    #[error("message is empty")]
    Empty,

    /// Content exceeds the configured maximum.
    #[error("message too large: {size} bytes (max {max} bytes)")]
    TooLarge {
        /// Actual size in bytes.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Another submission is still being dispatched.
    #[error("a submission is already in flight")]
    InFlight,

    /// The same content was accepted moments ago.
    #[error("duplicate submission suppressed")]
    Duplicate,
}

/// Timing and sizing knobs for a [`DeliveryTracker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Identical content submitted within this window is suppressed.
    pub duplicate_window: Duration,
    /// Delay between a submission and its follow-up refresh.
    pub refresh_delay: Duration,
    /// Delay between the recipient coming online and the catch-up refresh.
    pub presence_refresh_delay: Duration,
    /// Period of the stale-message re-check.
    pub reconcile_interval: Duration,
    /// Age after which an unconfirmed message is re-checked.
    pub stale_after: Duration,
    /// Period of the recipient presence poll.
    pub presence_interval: Duration,
    /// Maximum content size in bytes.
    pub max_content_len: usize,
    /// Maximum number of settled statuses kept.
    pub max_settled: usize,
    /// Capacity of the renderer event channel.
    pub event_buffer: usize,
    /// Local user id. Server messages from this sender count as own even
    /// when the listing omits `is_own`.
    pub local_user_id: Option<u64>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            duplicate_window: DEFAULT_DUPLICATE_WINDOW,
            refresh_delay: Duration::from_millis(1500),
            presence_refresh_delay: Duration::from_millis(500),
            reconcile_interval: Duration::from_secs(30),
            stale_after: Duration::from_secs(10),
            presence_interval: Duration::from_secs(45),
            max_content_len: MAX_CONTENT_LEN,
            max_settled: MAX_SETTLED_TRACKING,
            event_buffer: 64,
            local_user_id: None,
        }
    }
}

/// Notifications for the rendering layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerEvent {
    /// A message's lifecycle state changed.
    ///
    /// Messages loaded from the server and no longer actively tracked carry
    /// no provisional id.
    StatusChanged {
        /// Provisional id, for messages submitted in this session.
        provisional_id: Option<ProvisionalId>,
        /// Server id, once known.
        confirmed_id: Option<ConfirmedId>,
        /// The new state.
        state: LifecycleState,
    },
    /// A message could not be dispatched. Sent once per failed message.
    SendFailed {
        /// The failed message.
        provisional_id: ProvisionalId,
        /// Why it failed.
        reason: String,
    },
    /// The authoritative message list was fetched.
    Refreshed {
        /// The conversation as the server reports it.
        messages: Vec<ServerMessage>,
    },
    /// The conversation peer's presence changed.
    RecipientPresence {
        /// Whether the peer is online.
        online: bool,
    },
}

/// Mutable tracker state. Never held across an await.
#[derive(Debug)]
struct TrackerState {
    /// Messages still being followed, keyed by provisional id.
    active: HashMap<ProvisionalId, TrackedMessage>,
    /// Index from server id to active entry.
    by_confirmed: HashMap<ConfirmedId, ProvisionalId>,
    /// Last known state of messages outside the active set.
    settled: HashMap<ConfirmedId, LifecycleState>,
    /// Recently accepted fingerprints.
    recent: DuplicateWindow,
    /// Last reported presence of the conversation peer.
    recipient_online: bool,
}

impl TrackerState {
    fn new(duplicate_window: Duration) -> Self {
        Self {
            active: HashMap::new(),
            by_confirmed: HashMap::new(),
            settled: HashMap::new(),
            recent: DuplicateWindow::new(duplicate_window),
            recipient_online: false,
        }
    }

    /// Find the active entry a correlation refers to.
    fn resolve(
        &self,
        correlation: &CorrelationId,
        confirmed: Option<ConfirmedId>,
    ) -> Option<ProvisionalId> {
        let direct = match correlation {
            CorrelationId::Provisional(id) => self.active.contains_key(id).then(|| id.clone()),
            CorrelationId::Confirmed(id) => self.by_confirmed.get(id).cloned(),
        };
        direct.or_else(|| confirmed.and_then(|id| self.by_confirmed.get(&id).cloned()))
    }

    /// Drop an entry from the active set.
    fn remove(&mut self, id: &ProvisionalId) -> Option<TrackedMessage> {
        let msg = self.active.remove(id)?;
        if let Some(confirmed) = msg.confirmed_id {
            self.by_confirmed.remove(&confirmed);
        }
        Some(msg)
    }

    /// Remember the last state of a message outside the active set.
    fn settle(&mut self, id: ConfirmedId, state: LifecycleState, max: usize) {
        if self.settled.len() >= max && !self.settled.contains_key(&id) {
            tracing::debug!(max, "settled status map full, resetting");
            self.settled.clear();
        }
        self.settled.insert(id, state);
    }
}

/// Tracks delivery status of outbound messages for one conversation.
///
/// Owns its transports and all state; shared as `Arc` so it can schedule
/// its own follow-up refreshes.
pub struct DeliveryTracker<P: PushChannel, F: FallbackChannel> {
    /// Persistent event channel.
    push: P,
    /// Request/response channel.
    fallback: F,
    /// The conversation peer.
    peer_id: u64,
    /// Timing and sizing knobs.
    config: TrackerConfig,
    /// All mutable tracking state.
    state: Mutex<TrackerState>,
    /// Single-submission lock.
    submitting: AtomicBool,
    /// Channel for renderer notifications.
    event_tx: mpsc::Sender<TrackerEvent>,
}

impl<P: PushChannel, F: FallbackChannel> DeliveryTracker<P, F> {
    /// Create a tracker for the conversation with `peer_id`.
    ///
    /// Returns the tracker and the receiver for [`TrackerEvent`]s that the
    /// rendering layer should consume.
    pub fn new(
        push: P,
        fallback: F,
        peer_id: u64,
        config: TrackerConfig,
    ) -> (Arc<Self>, mpsc::Receiver<TrackerEvent>) {
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer.max(1));
        let tracker = Self {
            push,
            fallback,
            peer_id,
            state: Mutex::new(TrackerState::new(config.duplicate_window)),
            config,
            submitting: AtomicBool::new(false),
            event_tx,
        };
        (Arc::new(tracker), event_rx)
    }

    /// The push channel.
    pub const fn push(&self) -> &P {
        &self.push
    }

    /// The fallback channel.
    pub const fn fallback(&self) -> &F {
        &self.fallback
    }

    /// The conversation peer.
    pub const fn peer_id(&self) -> u64 {
        self.peer_id
    }

    /// Current state of an actively tracked message.
    pub fn status(&self, id: &ProvisionalId) -> Option<LifecycleState> {
        self.state.lock().active.get(id).map(|m| m.state)
    }

    /// Copy of an actively tracked message.
    pub fn snapshot(&self, id: &ProvisionalId) -> Option<TrackedMessage> {
        self.state.lock().active.get(id).cloned()
    }

    /// Number of messages in the active set.
    pub fn tracked_count(&self) -> usize {
        self.state.lock().active.len()
    }

    /// Last known state of a message, active or settled, by server id.
    pub fn settled_status(&self, id: ConfirmedId) -> Option<LifecycleState> {
        let state = self.state.lock();
        state
            .by_confirmed
            .get(&id)
            .and_then(|pid| state.active.get(pid))
            .map(|m| m.state)
            .or_else(|| state.settled.get(&id).copied())
    }

    /// Last reported presence of the conversation peer.
    pub fn recipient_online(&self) -> bool {
        self.state.lock().recipient_online
    }

    /// Send a renderer notification without waiting.
    fn notify(&self, event: TrackerEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!(?event, "renderer event channel full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::trace!("renderer event channel closed");
            }
        }
    }

    /// Apply a transition to an active entry.
    ///
    /// Attaches `confirmed` if the entry has no server id yet. Terminal
    /// states remove the entry after notifying; `Failed` also reports
    /// `failure` once. Returns whether the state changed.
    fn transition_locked(
        &self,
        state: &mut TrackerState,
        id: &ProvisionalId,
        next: LifecycleState,
        confirmed: Option<ConfirmedId>,
        failure: Option<&str>,
    ) -> bool {
        let Some(msg) = state.active.get_mut(id) else {
            return false;
        };
        if let Some(confirmed) = confirmed
            && msg.confirmed_id.is_none()
        {
            msg.confirmed_id = Some(confirmed);
            state.by_confirmed.insert(confirmed, id.clone());
        }
        let previous = msg.state;
        if !msg.advance(next) {
            tracing::trace!(provisional_id = %id, from = %previous, to = %next, "stale transition ignored");
            return false;
        }
        let confirmed_id = msg.confirmed_id;
        tracing::debug!(provisional_id = %id, from = %previous, to = %next, "message state changed");

        self.notify(TrackerEvent::StatusChanged {
            provisional_id: Some(id.clone()),
            confirmed_id,
            state: next,
        });
        if next == LifecycleState::Failed {
            let reason = failure.unwrap_or("rejected by server").to_owned();
            tracing::warn!(provisional_id = %id, %reason, "message failed");
            self.notify(TrackerEvent::SendFailed {
                provisional_id: id.clone(),
                reason,
            });
        }
        if next.is_terminal() {
            state.remove(id);
            if let Some(confirmed) = confirmed_id {
                state.settle(confirmed, next, self.config.max_settled);
            }
        }
        true
    }

    /// Apply a transition to a settled status. Returns whether it changed.
    fn advance_settled_locked(
        &self,
        state: &mut TrackerState,
        id: ConfirmedId,
        next: LifecycleState,
    ) -> bool {
        let Some(current) = state.settled.get_mut(&id) else {
            return false;
        };
        if !current.can_advance_to(next) {
            return false;
        }
        *current = next;
        self.notify(TrackerEvent::StatusChanged {
            provisional_id: None,
            confirmed_id: Some(id),
            state: next,
        });
        true
    }
}
