//! In-process transports for testing.
//!
//! [`LoopbackPush`] records every emitted command and lets a test flip its
//! connection state. [`LoopbackFallback`] plays a scripted server: it assigns
//! increasing message ids, answers status lookups from a table, and serves a
//! configurable message list and peer presence. Either can be told to fail.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use herochat_proto::event::PushCommand;
use herochat_proto::message::{ConfirmedId, CorrelationId, LifecycleState, ServerMessage};
use herochat_proto::presence::PresenceStatus;

use super::{FallbackChannel, PushChannel, SendReceipt, TransportError};

/// Push channel that records commands instead of sending them.
pub struct LoopbackPush {
    connected: AtomicBool,
    fail_emits: AtomicBool,
    emitted: Mutex<Vec<PushCommand>>,
}

impl LoopbackPush {
    /// Create a loopback push channel in the given connection state.
    #[must_use]
    pub fn new(connected: bool) -> Self {
        Self {
            connected: AtomicBool::new(connected),
            fail_emits: AtomicBool::new(false),
            emitted: Mutex::new(Vec::new()),
        }
    }

    /// Change the observed connection state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Make every subsequent [`emit`](PushChannel::emit) fail.
    pub fn fail_emits(&self, fail: bool) {
        self.fail_emits.store(fail, Ordering::SeqCst);
    }

    /// Commands emitted so far, oldest first.
    #[must_use]
    pub fn emitted(&self) -> Vec<PushCommand> {
        self.emitted.lock().clone()
    }

    /// Number of `send_message` commands emitted so far.
    #[must_use]
    pub fn sends(&self) -> usize {
        self.emitted
            .lock()
            .iter()
            .filter(|c| matches!(c, PushCommand::SendMessage { .. }))
            .count()
    }
}

impl PushChannel for LoopbackPush {
    async fn emit(&self, command: &PushCommand) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        if self.fail_emits.load(Ordering::SeqCst) {
            return Err(TransportError::Io(std::io::Error::other(
                "loopback emit failure",
            )));
        }
        self.emitted.lock().push(command.clone());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Scripted request/response server.
pub struct LoopbackFallback {
    next_id: AtomicU64,
    send_failure: Mutex<Option<String>>,
    fail_lookups: AtomicBool,
    fail_status_lookups: AtomicBool,
    sent: Mutex<Vec<(u64, String)>>,
    statuses: Mutex<HashMap<CorrelationId, LifecycleState>>,
    status_requests: Mutex<Vec<Vec<CorrelationId>>>,
    messages: Mutex<Vec<ServerMessage>>,
    mark_read_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    presence: Mutex<PresenceStatus>,
    presence_calls: AtomicUsize,
}

impl LoopbackFallback {
    /// Create a fallback whose first assigned message id is `first_id`.
    #[must_use]
    pub fn new(first_id: u64) -> Self {
        Self {
            next_id: AtomicU64::new(first_id),
            send_failure: Mutex::new(None),
            fail_lookups: AtomicBool::new(false),
            fail_status_lookups: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            statuses: Mutex::new(HashMap::new()),
            status_requests: Mutex::new(Vec::new()),
            messages: Mutex::new(Vec::new()),
            mark_read_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
            presence: Mutex::new(PresenceStatus::Offline),
            presence_calls: AtomicUsize::new(0),
        }
    }

    /// Make sends fail with `Rejected(reason)`, or succeed again with `None`.
    pub fn reject_sends(&self, reason: Option<&str>) {
        *self.send_failure.lock() = reason.map(str::to_owned);
    }

    /// Make every lookup fail: status, presence, mark-read and list fetches.
    pub fn fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }

    /// Make only [`get_status`](FallbackChannel::get_status) fail, like a
    /// server without the status endpoint.
    pub fn fail_status_lookups(&self, fail: bool) {
        self.fail_status_lookups.store(fail, Ordering::SeqCst);
    }

    /// Set the peer presence reported by [`get_presence`](FallbackChannel::get_presence).
    pub fn set_presence(&self, status: PresenceStatus) {
        *self.presence.lock() = status;
    }

    /// Set the state reported for `id` by [`get_status`](FallbackChannel::get_status).
    pub fn set_status(&self, id: impl Into<CorrelationId>, state: LifecycleState) {
        self.statuses.lock().insert(id.into(), state);
    }

    /// Replace the message list served by [`fetch_messages`](FallbackChannel::fetch_messages).
    pub fn set_messages(&self, messages: Vec<ServerMessage>) {
        *self.messages.lock() = messages;
    }

    /// `(receiver, content)` of every accepted send, oldest first.
    #[must_use]
    pub fn sent(&self) -> Vec<(u64, String)> {
        self.sent.lock().clone()
    }

    /// Id lists of every status lookup, oldest first.
    #[must_use]
    pub fn status_requests(&self) -> Vec<Vec<CorrelationId>> {
        self.status_requests.lock().clone()
    }

    /// Number of mark-read requests received.
    #[must_use]
    pub fn mark_read_calls(&self) -> usize {
        self.mark_read_calls.load(Ordering::SeqCst)
    }

    /// Number of message-list fetches received.
    #[must_use]
    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Number of presence lookups received.
    #[must_use]
    pub fn presence_calls(&self) -> usize {
        self.presence_calls.load(Ordering::SeqCst)
    }

    fn check_lookups(&self) -> Result<(), TransportError> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(TransportError::Http("loopback lookup failure".into()));
        }
        Ok(())
    }
}

impl Default for LoopbackFallback {
    fn default() -> Self {
        Self::new(1)
    }
}

impl FallbackChannel for LoopbackFallback {
    async fn send(&self, receiver_id: u64, content: &str) -> Result<SendReceipt, TransportError> {
        if let Some(reason) = self.send_failure.lock().clone() {
            return Err(TransportError::Rejected(reason));
        }
        self.sent.lock().push((receiver_id, content.to_owned()));
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(SendReceipt {
            message_id: ConfirmedId::new(id),
        })
    }

    async fn get_status(
        &self,
        ids: &[CorrelationId],
    ) -> Result<HashMap<CorrelationId, LifecycleState>, TransportError> {
        self.status_requests.lock().push(ids.to_vec());
        self.check_lookups()?;
        if self.fail_status_lookups.load(Ordering::SeqCst) {
            return Err(TransportError::Rejected("status lookup unsupported".into()));
        }
        let statuses = self.statuses.lock();
        Ok(ids
            .iter()
            .filter_map(|id| statuses.get(id).map(|s| (id.clone(), *s)))
            .collect())
    }

    async fn mark_read(&self, _peer_id: u64) -> Result<(), TransportError> {
        self.mark_read_calls.fetch_add(1, Ordering::SeqCst);
        self.check_lookups()
    }

    async fn fetch_messages(&self, _peer_id: u64) -> Result<Vec<ServerMessage>, TransportError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.check_lookups()?;
        Ok(self.messages.lock().clone())
    }

    async fn get_presence(&self, _peer_id: u64) -> Result<PresenceStatus, TransportError> {
        self.presence_calls.fetch_add(1, Ordering::SeqCst);
        self.check_lookups()?;
        Ok(*self.presence.lock())
    }
}
