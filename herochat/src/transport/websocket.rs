//! WebSocket push channel.
//!
//! Implements [`PushChannel`] over a WebSocket connection to the chat server.
//! Frames are JSON text (see [`herochat_proto::codec`]). A background reader
//! task decodes incoming frames and forwards them as [`ChannelEvent`]s; it
//! announces [`ChannelEvent::Connected`] first and
//! [`ChannelEvent::Disconnected`] when the socket goes away.
//!
//! The channel does not reconnect by itself. A supervisor waits on
//! [`WsPushChannel::wait_disconnected`] and calls
//! [`WsPushChannel::establish`] again.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use herochat_proto::codec;
use herochat_proto::event::PushCommand;

use super::{ChannelEvent, PushChannel, TransportError};

/// Type alias for the write half of a WebSocket connection.
type WsSender = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// Type alias for the read half of a WebSocket connection.
type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Connection options for [`WsPushChannel::connect`].
#[derive(Debug, Clone)]
pub struct WsOptions {
    /// How long to wait for the WebSocket handshake.
    pub connect_timeout: Duration,
    /// Value of the `Cookie` header carrying the session, if any.
    pub session_cookie: Option<String>,
    /// Capacity of the [`ChannelEvent`] channel.
    pub event_buffer: usize,
}

impl Default for WsOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            session_cookie: None,
            event_buffer: 256,
        }
    }
}

/// WebSocket push channel implementing [`PushChannel`].
///
/// One channel outlives any number of connections: after a drop,
/// [`establish`](Self::establish) opens a fresh socket and events keep
/// arriving on the same receiver.
pub struct WsPushChannel {
    /// The server URL (ws:// or wss://).
    url: String,
    options: WsOptions,
    /// Write half of the current connection (shared for concurrent emits).
    ws_sender: Mutex<Option<WsSender>>,
    /// Liveness flag of the current connection. Each connection gets its
    /// own, so a reader left over from an older one cannot clear it.
    link: parking_lot::Mutex<Arc<AtomicBool>>,
    /// Signalled whenever a connection goes down.
    disconnected: Arc<Notify>,
    events: mpsc::Sender<ChannelEvent>,
    /// Reader task of the current connection.
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl WsPushChannel {
    /// Create a disconnected channel for `url`.
    ///
    /// Returns the channel and the receiver on which decoded server events
    /// arrive, across every connection the channel makes.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] for an invalid URL or cookie.
    pub fn new(
        url: &str,
        options: &WsOptions,
    ) -> Result<(Self, mpsc::Receiver<ChannelEvent>), TransportError> {
        build_request(url, options)?;
        let (tx, rx) = mpsc::channel(options.event_buffer);
        Ok((
            Self {
                url: url.to_string(),
                options: options.clone(),
                ws_sender: Mutex::new(None),
                link: parking_lot::Mutex::new(Arc::new(AtomicBool::new(false))),
                disconnected: Arc::new(Notify::new()),
                events: tx,
                reader: parking_lot::Mutex::new(None),
            },
            rx,
        ))
    }

    /// Create a channel and open its first connection.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Timeout`] if the handshake does not finish in time.
    /// - [`TransportError::Io`] for an invalid URL or cookie, or a failed
    ///   handshake.
    pub async fn connect(
        url: &str,
        options: &WsOptions,
    ) -> Result<(Self, mpsc::Receiver<ChannelEvent>), TransportError> {
        let (channel, rx) = Self::new(url, options)?;
        channel.establish().await?;
        Ok((channel, rx))
    }

    /// Open a new connection, replacing the current one.
    ///
    /// Emits [`ChannelEvent::Connected`] once the handshake completes.
    ///
    /// # Errors
    ///
    /// Same as [`connect`](Self::connect). The channel stays disconnected.
    pub async fn establish(&self) -> Result<(), TransportError> {
        let request = build_request(&self.url, &self.options)?;
        let url = self.url.as_str();
        let (ws_stream, _response) =
            tokio::time::timeout(self.options.connect_timeout, connect_async(request))
                .await
                .map_err(|_| {
                    tracing::warn!(url, "push channel connect timed out");
                    TransportError::Timeout
                })?
                .map_err(|e| {
                    tracing::warn!(url, err = %e, "push channel connect failed");
                    map_ws_connect_error(e)
                })?;

        let (ws_sender, ws_reader) = ws_stream.split();
        *self.ws_sender.lock().await = Some(ws_sender);

        if let Some(old) = self.reader.lock().take() {
            old.abort();
        }
        let link = Arc::new(AtomicBool::new(true));
        *self.link.lock() = Arc::clone(&link);

        let _ = self.events.send(ChannelEvent::Connected).await;
        let handle = tokio::spawn(reader_loop(
            ws_reader,
            self.events.clone(),
            link,
            Arc::clone(&self.disconnected),
        ));
        *self.reader.lock() = Some(handle);

        tracing::info!(url, "push channel connected");
        Ok(())
    }

    /// Wait until the current connection goes down.
    ///
    /// Returns immediately if the channel is already disconnected.
    pub async fn wait_disconnected(&self) {
        loop {
            let notified = self.disconnected.notified();
            if !self.is_connected() {
                return;
            }
            notified.await;
        }
    }

    /// Return the server URL this channel connects to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Close the connection. Subsequent emits fail with `ConnectionClosed`.
    pub async fn close(&self) {
        self.current_link().store(false, Ordering::Relaxed);
        let sender = self.ws_sender.lock().await.take();
        if let Some(mut sender) = sender
            && let Err(e) = sender.close().await
        {
            tracing::debug!(err = %e, "push channel close failed");
        }
        self.disconnected.notify_one();
    }

    fn current_link(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.link.lock())
    }
}

impl Drop for WsPushChannel {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
    }
}

impl PushChannel for WsPushChannel {
    /// Send a command as one JSON text frame.
    ///
    /// # Errors
    ///
    /// - [`TransportError::ConnectionClosed`] if the connection is down or
    ///   the write fails (the channel then reports disconnected).
    /// - [`TransportError::Codec`] if the command cannot be encoded.
    async fn emit(&self, command: &PushCommand) -> Result<(), TransportError> {
        let link = self.current_link();
        if !link.load(Ordering::Relaxed) {
            return Err(TransportError::ConnectionClosed);
        }

        let text = codec::encode_command(command)?;

        let mut guard = self.ws_sender.lock().await;
        let Some(sender) = guard.as_mut() else {
            return Err(TransportError::ConnectionClosed);
        };
        sender.send(Message::Text(text.into())).await.map_err(|e| {
            tracing::warn!(err = %e, "push channel send failed");
            link.store(false, Ordering::Relaxed);
            self.disconnected.notify_one();
            TransportError::ConnectionClosed
        })?;

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.link.lock().load(Ordering::Relaxed)
    }
}

fn build_request(url: &str, options: &WsOptions) -> Result<Request, TransportError> {
    let mut request = url
        .into_client_request()
        .map_err(|e| TransportError::Io(std::io::Error::other(format!("invalid url: {e}"))))?;
    if let Some(cookie) = &options.session_cookie {
        let value = HeaderValue::from_str(cookie).map_err(|e| {
            TransportError::Io(std::io::Error::other(format!("invalid cookie: {e}")))
        })?;
        request.headers_mut().insert(COOKIE, value);
    }
    Ok(request)
}

/// Background task that reads WebSocket frames and forwards decoded events.
///
/// Untracked event names are dropped quietly. Malformed frames are logged
/// and skipped; the task does not disconnect on bad data.
///
/// Clears `connected`, wakes `disconnected`, and emits
/// [`ChannelEvent::Disconnected`] when the WebSocket closes or errors out.
async fn reader_loop(
    mut ws_reader: WsReader,
    tx: mpsc::Sender<ChannelEvent>,
    connected: Arc<AtomicBool>,
    disconnected: Arc<Notify>,
) {
    while let Some(msg_result) = ws_reader.next().await {
        match msg_result {
            Ok(Message::Text(text)) => match codec::decode_event(text.as_str()) {
                Ok(Some(event)) => {
                    if tx.send(ChannelEvent::Event(event)).await.is_err() {
                        // Receiver dropped: nobody is listening anymore.
                        break;
                    }
                }
                Ok(None) => {
                    tracing::trace!("untracked push event skipped");
                }
                Err(e) => {
                    tracing::warn!(err = %e, "malformed push frame, skipping");
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!("push channel closed by server");
                break;
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_)) => {}
            Err(e) => {
                tracing::warn!(err = %e, "push channel read error");
                break;
            }
        }
    }
    connected.store(false, Ordering::Relaxed);
    disconnected.notify_one();
    let _ = tx.send(ChannelEvent::Disconnected).await;
    tracing::info!("push channel reader task exiting");
}

/// Map a `tokio_tungstenite` connection error to a [`TransportError`].
fn map_ws_connect_error(err: tokio_tungstenite::tungstenite::Error) -> TransportError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err) => TransportError::Io(io_err),
        WsError::Tls(_) => TransportError::Io(std::io::Error::other(format!("TLS error: {err}"))),
        WsError::Http(response) => TransportError::Http(format!(
            "websocket upgrade refused: status {}",
            response.status()
        )),
        other => TransportError::Io(std::io::Error::other(format!(
            "push channel connection error: {other}"
        ))),
    }
}
