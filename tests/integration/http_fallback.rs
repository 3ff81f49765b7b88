//! Integration tests for the HTTP fallback channel.
//!
//! Runs a stub of the chat server's JSON API in-process on `axum` and
//! checks request shapes, headers, and how `success: false` and error
//! statuses are reported.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use herochat::tracker::{DeliveryTracker, TrackerConfig};
use herochat::transport::http::{HttpFallback, HttpOptions};
use herochat::transport::websocket::WsPushChannel;
use herochat::transport::{FallbackChannel, TransportError};
use herochat_proto::api::{MarkReadRequest, SendRequest, StatusRequest};
use herochat_proto::message::{ConfirmedId, CorrelationId, LifecycleState, ProvisionalId};
use herochat_proto::presence::PresenceStatus;

#[derive(Default)]
struct Recorded {
    sends: Vec<SendRequest>,
    csrf_tokens: Vec<Option<String>>,
    status_requests: Vec<Vec<CorrelationId>>,
    mark_reads: Vec<(u64, u64)>,
}

type Shared = Arc<Mutex<Recorded>>;

async fn send(
    State(rec): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<SendRequest>,
) -> (StatusCode, Json<Value>) {
    let token = headers
        .get("x-csrftoken")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let mut rec = rec.lock();
    rec.csrf_tokens.push(token);
    if body.content == "forbidden" {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({"success": false, "message": "Users are not friends"})),
        );
    }
    rec.sends.push(body.clone());
    let id = 100 + rec.sends.len();
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "message": {"id": id, "content": body.content, "status": "sent_offline"}
        })),
    )
}

async fn status(State(rec): State<Shared>, Json(body): Json<StatusRequest>) -> Json<Value> {
    let statuses: HashMap<String, &str> = body
        .message_ids
        .iter()
        .filter_map(|id| match id {
            CorrelationId::Confirmed(c) => Some((c.to_string(), "read")),
            CorrelationId::Provisional(_) => None,
        })
        .collect();
    rec.lock().status_requests.push(body.message_ids);
    Json(json!({"success": true, "statuses": statuses}))
}

async fn mark_read(
    State(rec): State<Shared>,
    Path(peer): Path<u64>,
    Json(body): Json<MarkReadRequest>,
) -> Json<Value> {
    rec.lock().mark_reads.push((peer, body.sender_id));
    Json(json!({"success": true}))
}

async fn messages(Path(peer): Path<u64>) -> (StatusCode, Json<Value>) {
    if peer == 404 {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"success": false, "message": "Chat not found"})),
        );
    }
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "messages": [
                {"id": 2, "sender_id": peer, "content": "hi back", "timestamp": "2026-01-01T10:01:00", "status": "read", "is_own": false},
                {"id": 1, "sender_id": 1, "content": "hi", "timestamp": "2026-01-01T10:00:00", "status": "delivered", "is_own": true}
            ],
            "has_next": false
        })),
    )
}

async fn presence(Path(peer): Path<u64>) -> (StatusCode, Json<Value>) {
    if peer == 403 {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({"success": false, "message": "Not friends"})),
        );
    }
    let status = if peer == 2 { "online" } else { "offline" };
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "user_id": peer,
            "status": status,
            "last_seen": null,
            "is_online": peer == 2,
            "timestamp": "2026-01-01T10:00:00"
        })),
    )
}

async fn start_api() -> (String, Shared) {
    let rec: Shared = Arc::default();
    let app = Router::new()
        .route("/api/chat/send", post(send))
        .route("/api/chat/status", post(status))
        .route("/api/chat/{peer}/mark-read", post(mark_read))
        .route("/api/chat/{peer}/messages", get(messages))
        .route("/api/user/{peer}/status", get(presence))
        .with_state(Arc::clone(&rec));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), rec)
}

fn options_with_token() -> HttpOptions {
    HttpOptions {
        request_timeout: Duration::from_secs(5),
        csrf_token: Some("csrf-123".into()),
        session_cookie: Some("session=abc".into()),
    }
}

#[tokio::test]
async fn send_returns_server_id_and_carries_csrf_header() {
    let (url, rec) = start_api().await;
    let http = HttpFallback::new(&url, &options_with_token()).unwrap();

    let receipt = http.send(2, "hello").await.unwrap();

    assert_eq!(receipt.message_id, ConfirmedId::new(101));
    let rec = rec.lock();
    assert_eq!(
        rec.sends,
        vec![SendRequest {
            receiver_id: 2,
            content: "hello".into()
        }]
    );
    assert_eq!(rec.csrf_tokens, vec![Some("csrf-123".to_string())]);
}

#[tokio::test]
async fn refused_send_is_rejected_with_reason() {
    let (url, _rec) = start_api().await;
    let http = HttpFallback::new(&url, &HttpOptions::default()).unwrap();

    let result = http.send(2, "forbidden").await;
    assert!(matches!(result, Err(TransportError::Rejected(ref r)) if r == "Users are not friends"));
}

#[tokio::test]
async fn status_lookup_returns_known_ids_only() {
    let (url, rec) = start_api().await;
    let http = HttpFallback::new(&url, &HttpOptions::default()).unwrap();
    let ids = vec![
        CorrelationId::Confirmed(ConfirmedId::new(5)),
        CorrelationId::Provisional(ProvisionalId::from_raw("temp_abc")),
    ];

    let statuses = http.get_status(&ids).await.unwrap();

    assert_eq!(statuses.len(), 1);
    assert_eq!(
        statuses.get(&CorrelationId::Confirmed(ConfirmedId::new(5))),
        Some(&LifecycleState::Read)
    );
    assert_eq!(rec.lock().status_requests, vec![ids]);
}

#[tokio::test]
async fn mark_read_posts_peer_in_path_and_body() {
    let (url, rec) = start_api().await;
    let http = HttpFallback::new(&url, &HttpOptions::default()).unwrap();

    http.mark_read(7).await.unwrap();
    assert_eq!(rec.lock().mark_reads, vec![(7, 7)]);
}

#[tokio::test]
async fn fetch_messages_decodes_listing() {
    let (url, _rec) = start_api().await;
    let http = HttpFallback::new(&url, &HttpOptions::default()).unwrap();

    let messages = http.fetch_messages(2).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert!(messages[1].is_own);
    assert_eq!(messages[1].status, LifecycleState::Delivered);
}

#[tokio::test]
async fn presence_lookup_reads_user_status() {
    let (url, _rec) = start_api().await;
    let http = HttpFallback::new(&url, &HttpOptions::default()).unwrap();

    assert_eq!(http.get_presence(2).await.unwrap(), PresenceStatus::Online);
    assert_eq!(http.get_presence(5).await.unwrap(), PresenceStatus::Offline);
    assert!(matches!(
        http.get_presence(403).await,
        Err(TransportError::Rejected(ref r)) if r == "Not friends"
    ));
}

#[tokio::test]
async fn error_status_with_reason_is_rejected() {
    let (url, _rec) = start_api().await;
    let http = HttpFallback::new(&url, &HttpOptions::default()).unwrap();

    let result = http.fetch_messages(404).await;
    assert!(matches!(result, Err(TransportError::Rejected(ref r)) if r == "Chat not found"));
}

#[tokio::test]
async fn unreachable_server_is_an_http_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let http = HttpFallback::new(&format!("http://{addr}"), &HttpOptions::default()).unwrap();
    assert!(matches!(
        http.send(2, "hello").await,
        Err(TransportError::Http(_))
    ));
}

#[tokio::test]
async fn tracker_over_http_confirms_and_loads() {
    let (url, _rec) = start_api().await;
    let http = HttpFallback::new(&url, &HttpOptions::default()).unwrap();
    let (tracker, _events) =
        DeliveryTracker::new(None::<WsPushChannel>, http, 2, TrackerConfig::default());

    assert_eq!(tracker.load_conversation().await.unwrap(), 0);
    assert_eq!(
        tracker.settled_status(ConfirmedId::new(1)),
        Some(LifecycleState::Delivered)
    );

    let id = tracker.submit("hello").await.unwrap();
    let msg = tracker.snapshot(&id).unwrap();
    assert_eq!(msg.state, LifecycleState::Sent);
    assert_eq!(msg.confirmed_id, Some(ConfirmedId::new(101)));

    // Peer 2 is online on the server: the poll catches the message up.
    tracker.poll_presence().await;
    assert!(tracker.recipient_online());
    assert_eq!(tracker.status(&id), Some(LifecycleState::Delivered));
}
