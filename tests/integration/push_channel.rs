//! Integration tests for the WebSocket push channel.
//!
//! Runs a scripted chat server in-process on `tokio-tungstenite` and checks:
//! - commands arrive as `{"event", "data"}` text frames
//! - acknowledgments flow back into the tracker through the event pump
//! - the join handshake on connect
//! - disconnect detection and the switch to the fallback route

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use herochat::net::pump_channel_events;
use herochat::tracker::{DeliveryTracker, TrackerConfig};
use herochat::transport::loopback::LoopbackFallback;
use herochat::transport::websocket::{WsOptions, WsPushChannel};
use herochat::transport::{ChannelEvent, PushChannel};
use herochat_proto::codec;
use herochat_proto::event::{PushCommand, PushEvent};
use herochat_proto::message::{ConfirmedId, LifecycleState};

/// A chat server that acknowledges every `send_message` with
/// `message_delivered` and reports every received command on `seen`.
///
/// Closes the connection after `close_after` commands, if given.
async fn start_chat_server(
    close_after: Option<usize>,
) -> (String, mpsc::UnboundedReceiver<PushCommand>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let mut next_id = 500;
        let mut handled = 0;

        while let Some(Ok(frame)) = ws.next().await {
            let Message::Text(text) = frame else {
                continue;
            };
            let command = codec::decode_command(text.as_str()).unwrap();
            if let PushCommand::SendMessage { temp_id, .. } = &command {
                let ack = PushEvent::MessageDelivered {
                    temp_id: Some(temp_id.clone()),
                    message_id: ConfirmedId::new(next_id),
                    status: LifecycleState::Sent,
                };
                next_id += 1;
                let frame = codec::encode_event(&ack).unwrap();
                ws.send(Message::Text(frame.into())).await.unwrap();
            }
            let _ = seen_tx.send(command);
            handled += 1;
            if close_after == Some(handled) {
                let _ = ws.close(None).await;
                break;
            }
        }
    });

    (format!("ws://{addr}/ws"), seen_rx)
}

async fn next_command(seen: &mut mpsc::UnboundedReceiver<PushCommand>) -> PushCommand {
    tokio::time::timeout(Duration::from_secs(5), seen.recv())
        .await
        .expect("server saw nothing")
        .expect("server task ended")
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

#[tokio::test]
async fn submit_over_push_is_acknowledged() {
    let (url, mut seen) = start_chat_server(None).await;
    let (push, channel_rx) = WsPushChannel::connect(&url, &WsOptions::default())
        .await
        .unwrap();
    let (tracker, _events) =
        DeliveryTracker::new(push, LoopbackFallback::default(), 2, TrackerConfig::default());
    tokio::spawn(pump_channel_events(tracker.clone(), channel_rx));

    assert_eq!(
        next_command(&mut seen).await,
        PushCommand::JoinChat { user_id: 2 }
    );
    assert_eq!(
        next_command(&mut seen).await,
        PushCommand::RequestStatus { user_id: 2 }
    );

    let id = tracker.submit("hello over push").await.unwrap();
    let PushCommand::SendMessage {
        receiver_id,
        content,
        temp_id,
        ..
    } = next_command(&mut seen).await
    else {
        panic!("expected send_message");
    };
    assert_eq!(receiver_id, 2);
    assert_eq!(content, "hello over push");
    assert_eq!(temp_id, id);

    wait_until(|| tracker.status(&id) == Some(LifecycleState::Sent)).await;
    assert_eq!(
        tracker.snapshot(&id).unwrap().confirmed_id,
        Some(ConfirmedId::new(500))
    );
    assert!(tracker.fallback().sent().is_empty());
}

#[tokio::test]
async fn dispatch_switches_to_fallback_after_disconnect() {
    // Close right after the join handshake.
    let (url, _seen) = start_chat_server(Some(2)).await;
    let (push, channel_rx) = WsPushChannel::connect(&url, &WsOptions::default())
        .await
        .unwrap();
    let (tracker, _events) =
        DeliveryTracker::new(push, LoopbackFallback::new(9), 2, TrackerConfig::default());
    tokio::spawn(pump_channel_events(tracker.clone(), channel_rx));

    wait_until(|| !tracker.push().is_connected()).await;

    let id = tracker.submit("after the drop").await.unwrap();
    let msg = tracker.snapshot(&id).unwrap();
    assert!(msg.dispatched_via_fallback);
    assert_eq!(msg.confirmed_id, Some(ConfirmedId::new(9)));
    assert_eq!(tracker.fallback().sent().len(), 1);
}

#[tokio::test]
async fn channel_reports_connect_then_disconnect() {
    let (url, _seen) = start_chat_server(Some(1)).await;
    let (push, mut channel_rx) = WsPushChannel::connect(&url, &WsOptions::default())
        .await
        .unwrap();

    assert_eq!(channel_rx.recv().await, Some(ChannelEvent::Connected));
    push.emit(&PushCommand::MarkRead { sender_id: 2 }).await.unwrap();

    let next = tokio::time::timeout(Duration::from_secs(5), channel_rx.recv())
        .await
        .unwrap();
    assert_eq!(next, Some(ChannelEvent::Disconnected));
    assert!(!push.is_connected());
}

#[tokio::test]
async fn connect_timeout_is_reported() {
    // Accept TCP but never complete the WebSocket handshake.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (_stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
    });

    let options = WsOptions {
        connect_timeout: Duration::from_millis(100),
        ..WsOptions::default()
    };
    let result = WsPushChannel::connect(&format!("ws://{addr}/ws"), &options).await;
    assert!(matches!(
        result,
        Err(herochat::transport::TransportError::Timeout)
    ));
}
