//! Session wiring for one open conversation.
//!
//! [`spawn_session`] connects both channels, builds the
//! [`DeliveryTracker`], and spawns the background tasks that keep it
//! current:
//!
//! ```text
//! WsPushChannel ── ChannelEvent ──> event pump ──> DeliveryTracker ── TrackerEvent ──> renderer
//!   ^                               reconcile task ──┤        │
//!   └─ push supervisor              presence task ───┘   HttpFallback
//! ```
//!
//! While the push channel is down the session runs HTTP-only: the tracker
//! routes every dispatch through the fallback and the supervisor keeps
//! reconnecting with backoff.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use herochat_proto::event::PushCommand;

use crate::tracker::{DeliveryTracker, TrackerConfig, TrackerEvent};
use crate::transport::http::{HttpFallback, HttpOptions};
use crate::transport::websocket::{WsOptions, WsPushChannel};
use crate::transport::{ChannelEvent, FallbackChannel, PushChannel, TransportError};

/// Errors that can occur while opening a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The HTTP fallback could not be set up.
    #[error("fallback channel setup failed: {0}")]
    Fallback(#[from] TransportError),

    /// The push channel URL or cookie is invalid.
    #[error("push channel setup failed: {0}")]
    Push(TransportError),
}

/// Backoff between push channel reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Wait before the first attempt after a drop.
    pub initial_delay: Duration,
    /// Upper bound of the doubling wait.
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    /// The wait after a failed attempt that waited `current`.
    #[must_use]
    pub fn next_delay(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

/// Tracker type used by a live session.
pub type SessionTracker = DeliveryTracker<Option<WsPushChannel>, HttpFallback>;

/// Everything needed to open a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebSocket URL of the push channel. `None` runs HTTP-only.
    pub ws_url: Option<String>,
    /// Base URL of the HTTP API.
    pub http_url: String,
    /// Conversation peer.
    pub peer_id: u64,
    /// CSRF token for HTTP requests.
    pub csrf_token: Option<String>,
    /// Session cookie for both channels.
    pub session_cookie: Option<String>,
    /// Timeout for establishing the push channel.
    pub connect_timeout: Duration,
    /// Timeout for each HTTP request.
    pub request_timeout: Duration,
    /// Capacity of the push event channel.
    pub channel_capacity: usize,
    /// Push channel reconnect backoff.
    pub reconnect: ReconnectPolicy,
    /// Tracker timings and limits.
    pub tracker: TrackerConfig,
}

impl SessionConfig {
    /// A config with default timeouts and tracker settings.
    #[must_use]
    pub fn new(ws_url: Option<String>, http_url: String, peer_id: u64) -> Self {
        Self {
            ws_url,
            http_url,
            peer_id,
            csrf_token: None,
            session_cookie: None,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            channel_capacity: 256,
            reconnect: ReconnectPolicy::default(),
            tracker: TrackerConfig::default(),
        }
    }
}

/// Handle to a running session.
///
/// Background tasks are aborted when the handle is dropped.
pub struct Session {
    tracker: Arc<SessionTracker>,
    events: mpsc::Receiver<TrackerEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl Session {
    /// The conversation's delivery tracker.
    pub const fn tracker(&self) -> &Arc<SessionTracker> {
        &self.tracker
    }

    /// Renderer notifications.
    pub const fn events(&mut self) -> &mut mpsc::Receiver<TrackerEvent> {
        &mut self.events
    }

    /// Whether the push channel is currently up.
    pub fn push_connected(&self) -> bool {
        self.tracker.push().is_connected()
    }

    /// Stop background tasks and close the push channel.
    pub async fn shutdown(self) {
        // Supervisor first, or it would reconnect the closed channel.
        for task in &self.tasks {
            task.abort();
        }
        if let Some(push) = self.tracker.push() {
            push.close().await;
        }
        tracing::info!(peer_id = self.tracker.peer_id(), "session shut down");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Open a session for the conversation described by `config`.
///
/// Connects the push channel (running HTTP-only until it comes up), loads
/// the conversation, polls the peer's presence, and spawns the background
/// tasks: push event pump, push supervisor, reconcile and presence polls.
///
/// # Errors
///
/// Returns [`SessionError::Fallback`] if the HTTP client cannot be built and
/// [`SessionError::Push`] if the push URL or cookie is invalid. Push
/// connection and initial load failures are logged, not returned.
pub async fn spawn_session(config: SessionConfig) -> Result<Session, SessionError> {
    let fallback = HttpFallback::new(
        &config.http_url,
        &HttpOptions {
            request_timeout: config.request_timeout,
            csrf_token: config.csrf_token.clone(),
            session_cookie: config.session_cookie.clone(),
        },
    )?;

    let (push, channel_rx) = match &config.ws_url {
        Some(url) => {
            let options = WsOptions {
                connect_timeout: config.connect_timeout,
                session_cookie: config.session_cookie.clone(),
                event_buffer: config.channel_capacity,
            };
            let (push, rx) = WsPushChannel::new(url, &options).map_err(SessionError::Push)?;
            if let Err(e) = push.establish().await {
                tracing::warn!(url, error = %e, "push channel unavailable, running HTTP-only until reconnect");
            }
            (Some(push), Some(rx))
        }
        None => (None, None),
    };

    let (tracker, events) = DeliveryTracker::new(push, fallback, config.peer_id, config.tracker);

    let mut tasks = Vec::with_capacity(4);
    if let Some(rx) = channel_rx {
        tasks.push(tokio::spawn(pump_channel_events(Arc::clone(&tracker), rx)));
        tasks.push(tokio::spawn(supervise_push_channel(
            Arc::clone(&tracker),
            config.reconnect,
        )));
    }

    match tracker.load_conversation().await {
        Ok(superseded) => tracing::info!(superseded, "conversation loaded"),
        Err(e) => tracing::warn!(error = %e, "initial conversation load failed"),
    }
    // Over push the pump requests presence on connect.
    if !tracker.push().is_connected() {
        tracker.poll_presence().await;
    }

    tasks.push(tracker.spawn_reconcile_task());
    tasks.push(tracker.spawn_presence_task());

    tracing::info!(
        peer_id = config.peer_id,
        push = tracker.push().is_connected(),
        "session started"
    );

    Ok(Session {
        tracker,
        events,
        tasks,
    })
}

/// Background task: keep the push channel connected.
///
/// Waits for each drop, then retries [`WsPushChannel::establish`] after
/// `policy.initial_delay`, doubling the wait after every failed attempt up
/// to `policy.max_delay`. Returns at once for a session without a push
/// channel. Never exits otherwise; abort it to stop.
pub async fn supervise_push_channel(tracker: Arc<SessionTracker>, policy: ReconnectPolicy) {
    let Some(push) = tracker.push() else {
        return;
    };
    let mut delay = policy.initial_delay;
    loop {
        if push.is_connected() {
            push.wait_disconnected().await;
            delay = policy.initial_delay;
            continue;
        }
        tokio::time::sleep(delay).await;
        match push.establish().await {
            Ok(()) => tracing::info!(url = push.url(), "push channel re-established"),
            Err(e) => {
                delay = policy.next_delay(delay);
                tracing::warn!(url = push.url(), error = %e, retry_in = ?delay, "push channel reconnect failed");
            }
        }
    }
}

/// Background task: feed push channel events into the tracker.
///
/// On every `Connected` the conversation room is joined and the peer's
/// presence requested. Exits when every event sender is gone.
pub async fn pump_channel_events<P, F>(
    tracker: Arc<DeliveryTracker<P, F>>,
    mut rx: mpsc::Receiver<ChannelEvent>,
) where
    P: PushChannel + 'static,
    F: FallbackChannel + 'static,
{
    let peer_id = tracker.peer_id();
    while let Some(event) = rx.recv().await {
        match event {
            ChannelEvent::Connected => {
                for command in [
                    PushCommand::JoinChat { user_id: peer_id },
                    PushCommand::RequestStatus { user_id: peer_id },
                ] {
                    if let Err(e) = tracker.push().emit(&command).await {
                        tracing::warn!(error = %e, "push channel handshake command failed");
                    }
                }
            }
            ChannelEvent::Disconnected => {
                tracing::warn!(peer_id, "push channel disconnected, dispatching via fallback");
            }
            ChannelEvent::Event(event) => tracker.handle_push_event(event),
        }
    }
    tracing::debug!("push event pump exiting");
}
