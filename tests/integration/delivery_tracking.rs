//! Integration tests for message delivery tracking.
//!
//! Drives a [`DeliveryTracker`] over loopback transports through the
//! lifecycle scenarios the chat widget has to get right:
//! - offline submit then recipient coming online
//! - rapid double submit
//! - late confirmations after `read`
//! - fallback server errors
//! - channel switching between dispatches

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use herochat::tracker::{DeliveryTracker, SubmitError, TrackerConfig, TrackerEvent};
use herochat::transport::loopback::{LoopbackFallback, LoopbackPush};
use herochat_proto::event::{PushCommand, PushEvent};
use herochat_proto::message::{ConfirmedId, CorrelationId, LifecycleState, ServerMessage};
use herochat_proto::presence::PresenceStatus;

type Tracker = DeliveryTracker<LoopbackPush, LoopbackFallback>;

const PEER: u64 = 2;

fn tracker(push_connected: bool) -> (Arc<Tracker>, mpsc::Receiver<TrackerEvent>) {
    DeliveryTracker::new(
        LoopbackPush::new(push_connected),
        LoopbackFallback::new(1),
        PEER,
        TrackerConfig::default(),
    )
}

fn drain(events: &mut mpsc::Receiver<TrackerEvent>) -> Vec<TrackerEvent> {
    std::iter::from_fn(|| events.try_recv().ok()).collect()
}

fn states(events: &[TrackerEvent]) -> Vec<LifecycleState> {
    events
        .iter()
        .filter_map(|e| match e {
            TrackerEvent::StatusChanged { state, .. } => Some(*state),
            _ => None,
        })
        .collect()
}

// =============================================================================
// Lifecycle scenarios
// =============================================================================

#[tokio::test(start_paused = true)]
async fn offline_submit_then_recipient_online_becomes_delivered() {
    let (tracker, mut events) = tracker(false);

    let id = tracker.submit("hello").await.unwrap();
    let msg = tracker.snapshot(&id).unwrap();
    assert_eq!(msg.state, LifecycleState::Sent);
    assert!(msg.delivered_while_recipient_offline);
    assert_eq!(
        states(&drain(&mut events)),
        vec![LifecycleState::Pending, LifecycleState::Sent]
    );

    tracker.on_recipient_presence_change(true);

    let msg = tracker.snapshot(&id).unwrap();
    assert_eq!(msg.state, LifecycleState::Delivered);
    assert!(!msg.delivered_while_recipient_offline);

    let after = drain(&mut events);
    assert!(after.contains(&TrackerEvent::RecipientPresence { online: true }));
    assert_eq!(states(&after), vec![LifecycleState::Delivered]);
}

#[tokio::test(start_paused = true)]
async fn presence_online_schedules_one_catch_up_refresh() {
    let (tracker, _events) = tracker(false);
    tracker.submit("hello").await.unwrap();

    // Let the post-submit refresh run first.
    tokio::time::sleep(Duration::from_millis(1600)).await;
    assert_eq!(tracker.fallback().fetch_calls(), 1);

    tracker.on_recipient_presence_change(true);
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(tracker.fallback().fetch_calls(), 1);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(tracker.fallback().fetch_calls(), 2);

    // Repeating online does not trigger another catch-up.
    tracker.on_recipient_presence_change(true);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(tracker.fallback().fetch_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn double_submit_within_half_a_second_creates_one_message() {
    let (tracker, _events) = tracker(false);

    let first = tracker.submit("hello").await;
    tokio::time::advance(Duration::from_millis(300)).await;
    let second = tracker.submit("hello").await;

    assert!(first.is_ok());
    assert_eq!(second, Err(SubmitError::Duplicate));
    assert_eq!(tracker.tracked_count(), 1);
    assert_eq!(tracker.fallback().sent().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_submits_dispatch_once() {
    let (tracker, _events) = tracker(true);

    let (a, b) = tokio::join!(tracker.submit("hello"), tracker.submit("hello"));

    assert_eq!(usize::from(a.is_ok()) + usize::from(b.is_ok()), 1);
    assert_eq!(tracker.push().sends(), 1);
    assert_eq!(tracker.tracked_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn same_content_after_window_is_a_new_message() {
    let (tracker, _events) = tracker(false);

    let first = tracker.submit("hello").await.unwrap();
    tokio::time::advance(Duration::from_millis(2100)).await;
    let second = tracker.submit("hello").await.unwrap();

    assert_ne!(first, second);
    assert_eq!(tracker.fallback().sent().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn late_delivered_after_read_keeps_read() {
    let (tracker, mut events) = tracker(true);
    let id = tracker.submit("hello").await.unwrap();
    let provisional = CorrelationId::Provisional(id.clone());

    assert!(tracker.apply_confirmation(&provisional, LifecycleState::Read, Some(ConfirmedId::new(9))));
    assert!(!tracker.apply_confirmation(
        &CorrelationId::Confirmed(ConfirmedId::new(9)),
        LifecycleState::Delivered,
        None,
    ));
    assert!(!tracker.apply_confirmation(&provisional, LifecycleState::Delivered, None));

    assert_eq!(tracker.status(&id), None);
    assert_eq!(
        tracker.settled_status(ConfirmedId::new(9)),
        Some(LifecycleState::Read)
    );
    assert_eq!(
        states(&drain(&mut events)),
        vec![LifecycleState::Pending, LifecycleState::Read]
    );
}

#[tokio::test(start_paused = true)]
async fn fallback_server_error_fails_with_one_notification() {
    let (tracker, mut events) = tracker(false);
    tracker.fallback().reject_sends(Some("Users are not friends"));

    let id = tracker.submit("hello").await.unwrap();

    assert_eq!(tracker.status(&id), None);
    let events = drain(&mut events);
    let failures: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, TrackerEvent::SendFailed { .. }))
        .collect();
    assert_eq!(
        failures,
        vec![&TrackerEvent::SendFailed {
            provisional_id: id,
            reason: "server rejected request: Users are not friends".into(),
        }]
    );
    assert_eq!(
        states(&events),
        vec![LifecycleState::Pending, LifecycleState::Failed]
    );
}

#[tokio::test(start_paused = true)]
async fn failed_message_can_be_resubmitted_after_window() {
    let (tracker, _events) = tracker(false);
    tracker.fallback().reject_sends(Some("temporarily unavailable"));
    tracker.submit("hello").await.unwrap();

    tracker.fallback().reject_sends(None);
    tokio::time::advance(Duration::from_millis(2100)).await;
    let retry = tracker.submit("hello").await.unwrap();
    assert_eq!(tracker.status(&retry), Some(LifecycleState::Sent));
}

// =============================================================================
// Routing
// =============================================================================

#[tokio::test(start_paused = true)]
async fn route_is_chosen_per_dispatch() {
    let (tracker, _events) = tracker(true);

    let over_push = tracker.submit("one").await.unwrap();
    tracker.push().set_connected(false);
    let over_http = tracker.submit("two").await.unwrap();

    let push_msg = tracker.snapshot(&over_push).unwrap();
    assert!(push_msg.dispatched_via_primary && !push_msg.dispatched_via_fallback);
    let http_msg = tracker.snapshot(&over_http).unwrap();
    assert!(http_msg.dispatched_via_fallback && !http_msg.dispatched_via_primary);

    assert_eq!(tracker.push().sends(), 1);
    assert_eq!(tracker.fallback().sent(), vec![(PEER, "two".to_string())]);
}

#[tokio::test(start_paused = true)]
async fn push_round_trip_reaches_read() {
    let (tracker, mut events) = tracker(true);
    let id = tracker.submit("hello").await.unwrap();

    tracker.handle_push_event(PushEvent::MessageDelivered {
        temp_id: Some(id.clone()),
        message_id: ConfirmedId::new(40),
        status: LifecycleState::Sent,
    });
    tracker.handle_push_event(PushEvent::MessageStatusUpdate {
        message_id: CorrelationId::Confirmed(ConfirmedId::new(40)),
        status: LifecycleState::Delivered,
    });
    tracker.handle_push_event(PushEvent::MessagesRead {
        reader_id: PEER,
        reader_username: "bob".into(),
    });

    assert_eq!(tracker.status(&id), None);
    assert_eq!(
        states(&drain(&mut events)),
        vec![
            LifecycleState::Pending,
            LifecycleState::Sent,
            LifecycleState::Delivered,
            LifecycleState::Read,
        ]
    );
}

// =============================================================================
// Read receipts
// =============================================================================

#[tokio::test(start_paused = true)]
async fn mark_read_twice_equals_once() {
    let (tracker, mut events) = tracker(false);
    let a = tracker.submit("one").await.unwrap();
    let b = tracker.submit("two").await.unwrap();
    drain(&mut events);

    tracker.mark_conversation_read().await;
    let once = (tracker.status(&a), tracker.status(&b), tracker.tracked_count());
    let first = drain(&mut events);

    tracker.mark_conversation_read().await;
    let twice = (tracker.status(&a), tracker.status(&b), tracker.tracked_count());

    assert_eq!(once, twice);
    assert_eq!(states(&first), vec![LifecycleState::Read; 2]);
    assert!(drain(&mut events).is_empty());
}

#[tokio::test(start_paused = true)]
async fn mark_read_uses_push_when_connected() {
    let (tracker, _events) = tracker(true);
    tracker.mark_conversation_read().await;
    assert_eq!(
        tracker.push().emitted(),
        vec![PushCommand::MarkRead { sender_id: PEER }]
    );
    assert_eq!(tracker.fallback().mark_read_calls(), 0);
}

// =============================================================================
// Reconciliation
// =============================================================================

#[tokio::test(start_paused = true)]
async fn stale_push_message_recovers_through_status_response() {
    let (tracker, _events) = tracker(true);
    let id = tracker.submit("hello").await.unwrap();

    tokio::time::advance(Duration::from_secs(11)).await;
    assert_eq!(tracker.reconcile_stale().await, 1);

    tracker.handle_push_event(PushEvent::DeliveryStatusResponse {
        message_id: CorrelationId::Provisional(id.clone()),
        status: LifecycleState::Delivered,
        receiver_online: true,
    });
    assert_eq!(tracker.status(&id), Some(LifecycleState::Delivered));
}

#[tokio::test(start_paused = true)]
async fn periodic_reconcile_recovers_missed_confirmation_over_fallback() {
    let (tracker, _events) = tracker(false);
    let id = tracker.submit("hello").await.unwrap();
    tracker
        .fallback()
        .set_status(ConfirmedId::new(1), LifecycleState::Read);

    let task = tracker.spawn_reconcile_task();
    tokio::time::sleep(Duration::from_secs(31)).await;

    assert_eq!(tracker.status(&id), None);
    assert_eq!(
        tracker.settled_status(ConfirmedId::new(1)),
        Some(LifecycleState::Read)
    );
    task.abort();
}

#[tokio::test(start_paused = true)]
async fn refresh_supersedes_push_message_missing_its_ack() {
    let (tracker, mut events) = tracker(true);
    let id = tracker.submit("hello").await.unwrap();
    tracker.fallback().set_messages(vec![ServerMessage {
        id: ConfirmedId::new(70),
        sender_id: 1,
        content: "hello".into(),
        timestamp: "2026-01-01T10:00:00".into(),
        status: LifecycleState::Delivered,
        is_own: true,
    }]);

    // The post-submit refresh fires on its own.
    tokio::time::sleep(Duration::from_millis(1600)).await;

    assert_eq!(tracker.status(&id), None);
    assert_eq!(
        tracker.settled_status(ConfirmedId::new(70)),
        Some(LifecycleState::Delivered)
    );
    assert!(
        drain(&mut events)
            .iter()
            .any(|e| matches!(e, TrackerEvent::Refreshed { .. }))
    );

    // The late ack still moves nothing backward.
    assert!(!tracker.apply_confirmation(
        &CorrelationId::Confirmed(ConfirmedId::new(70)),
        LifecycleState::Sent,
        None,
    ));
}

#[tokio::test(start_paused = true)]
async fn refreshed_offline_message_still_catches_up_when_recipient_returns() {
    let (tracker, _events) = tracker(true);
    let id = tracker.submit("hello").await.unwrap();
    tracker.fallback().set_messages(vec![ServerMessage {
        id: ConfirmedId::new(71),
        sender_id: 1,
        content: "hello".into(),
        timestamp: "2026-01-01T10:00:00".into(),
        status: LifecycleState::Sent,
        is_own: true,
    }]);

    // The ack never arrives; the post-submit refresh reports it stored.
    tokio::time::sleep(Duration::from_millis(1600)).await;
    let msg = tracker.snapshot(&id).unwrap();
    assert_eq!(msg.state, LifecycleState::Sent);
    assert_eq!(msg.confirmed_id, Some(ConfirmedId::new(71)));
    assert!(msg.delivered_while_recipient_offline);

    tracker.handle_push_event(PushEvent::UserStatus {
        user_id: PEER,
        status: PresenceStatus::Online,
    });
    assert_eq!(tracker.status(&id), Some(LifecycleState::Delivered));
}

#[tokio::test(start_paused = true)]
async fn refreshed_unconfirmed_message_stays_in_stale_sweep() {
    let (tracker, _events) = tracker(true);
    tracker.submit("hello").await.unwrap();
    tracker.fallback().set_messages(vec![ServerMessage {
        id: ConfirmedId::new(72),
        sender_id: 1,
        content: "hello".into(),
        timestamp: "2026-01-01T10:00:00".into(),
        status: LifecycleState::Sent,
        is_own: true,
    }]);
    tokio::time::sleep(Duration::from_millis(1600)).await;

    tokio::time::advance(Duration::from_secs(10)).await;
    assert_eq!(tracker.reconcile_stale().await, 1);
    assert!(
        tracker
            .push()
            .emitted()
            .contains(&PushCommand::RequestMessageStatus {
                message_ids: vec![CorrelationId::Confirmed(ConfirmedId::new(72))],
                receiver_id: PEER,
            })
    );
}

#[tokio::test(start_paused = true)]
async fn presence_of_other_users_is_ignored() {
    let (tracker, _events) = tracker(false);
    let id = tracker.submit("hello").await.unwrap();

    tracker.handle_push_event(PushEvent::UserStatus {
        user_id: 99,
        status: PresenceStatus::Online,
    });

    assert!(!tracker.recipient_online());
    assert_eq!(tracker.status(&id), Some(LifecycleState::Sent));
}
