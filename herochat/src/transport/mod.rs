//! Transport seams used by the delivery tracker.
//!
//! Two independent channels reach the chat server:
//! - [`PushChannel`]: a persistent event channel (WebSocket). Commands go out
//!   through it and confirmations arrive asynchronously as
//!   [`ChannelEvent`]s.
//! - [`FallbackChannel`]: plain request/response (HTTP), used when the push
//!   channel is down and for authoritative list fetches.
//!
//! Concrete implementations:
//! - [`websocket::WsPushChannel`] and [`http::HttpFallback`] for a live server
//! - [`loopback::LoopbackPush`] and [`loopback::LoopbackFallback`] for tests

pub mod http;
pub mod loopback;
pub mod websocket;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;

use herochat_proto::event::{PushCommand, PushEvent};
use herochat_proto::message::{ConfirmedId, CorrelationId, LifecycleState, ServerMessage};
use herochat_proto::presence::PresenceStatus;

/// Which channel a dispatch goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// The push channel.
    Primary,
    /// The request/response fallback.
    Fallback,
}

impl Route {
    /// Picks the route for one dispatch from current push availability.
    #[must_use]
    pub const fn select(push_connected: bool) -> Self {
        if push_connected {
            Self::Primary
        } else {
            Self::Fallback
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "push"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection to the server has been closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The operation timed out before completing.
    #[error("transport operation timed out")]
    Timeout,

    /// The server answered but refused the request.
    #[error("server rejected request: {0}")]
    Rejected(String),

    /// The HTTP exchange failed (status, body, or connection).
    #[error("http error: {0}")]
    Http(String),

    /// A frame could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] herochat_proto::codec::CodecError),

    /// An underlying I/O error occurred.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Observed lifecycle of the push channel, plus decoded server events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The channel (re)connected.
    Connected,
    /// The channel dropped.
    Disconnected,
    /// A server event relevant to delivery tracking.
    Event(PushEvent),
}

/// The server's answer to a fallback send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReceipt {
    /// Server-assigned message id.
    pub message_id: ConfirmedId,
}

/// Persistent event channel to the chat server.
///
/// The tracker never manages the connection; it only reads
/// [`is_connected`](Self::is_connected) and emits commands.
pub trait PushChannel: Send + Sync {
    /// Emit a command to the server.
    ///
    /// `Ok(())` means the frame was handed to the connection, not that the
    /// server processed it. Confirmation comes back as a [`ChannelEvent`].
    fn emit(
        &self,
        command: &PushCommand,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Whether the channel is currently connected.
    fn is_connected(&self) -> bool;
}

/// An absent push channel: never connected, every emit fails.
///
/// Lets a session run fallback-only when the push channel could not be
/// established.
impl<P: PushChannel> PushChannel for Option<P> {
    async fn emit(&self, command: &PushCommand) -> Result<(), TransportError> {
        match self {
            Some(push) => push.emit(command).await,
            None => Err(TransportError::ConnectionClosed),
        }
    }

    fn is_connected(&self) -> bool {
        self.as_ref().is_some_and(PushChannel::is_connected)
    }
}

/// Request/response channel to the chat server.
pub trait FallbackChannel: Send + Sync {
    /// Store a message addressed to `receiver_id`.
    fn send(
        &self,
        receiver_id: u64,
        content: &str,
    ) -> impl Future<Output = Result<SendReceipt, TransportError>> + Send;

    /// Look up the current state of each message.
    ///
    /// Ids the server does not recognise are absent from the result.
    fn get_status(
        &self,
        ids: &[CorrelationId],
    ) -> impl Future<Output = Result<HashMap<CorrelationId, LifecycleState>, TransportError>> + Send;

    /// Mark every message from `peer_id` to the local user as read.
    fn mark_read(&self, peer_id: u64)
    -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Fetch the authoritative message list of the conversation with `peer_id`.
    fn fetch_messages(
        &self,
        peer_id: u64,
    ) -> impl Future<Output = Result<Vec<ServerMessage>, TransportError>> + Send;

    /// Look up the current presence of `peer_id`.
    fn get_presence(
        &self,
        peer_id: u64,
    ) -> impl Future<Output = Result<PresenceStatus, TransportError>> + Send;
}
