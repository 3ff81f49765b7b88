//! Submission and dispatch.

use std::sync::Arc;

use herochat_proto::event::PushCommand;
use herochat_proto::message::{ContentFingerprint, LifecycleState, ProvisionalId};

use crate::transport::{FallbackChannel, PushChannel, Route};

use super::guard::SubmitGuard;
use super::message::TrackedMessage;
use super::{DeliveryTracker, SubmitError, TrackerEvent};

impl<P, F> DeliveryTracker<P, F>
where
    P: PushChannel + 'static,
    F: FallbackChannel + 'static,
{
    /// Accept `content` for delivery and dispatch it.
    ///
    /// The message is tracked from `Pending` and sent over whichever
    /// channel is available right now. One refresh is scheduled
    /// `refresh_delay` after dispatch. Dispatch failures do not make this
    /// return an error; they surface as [`TrackerEvent::SendFailed`].
    ///
    /// # Errors
    ///
    /// Returns [`SubmitError`] if the content is empty or too large, another
    /// submission is in flight, or the same content was just accepted. No
    /// state is created in that case.
    pub async fn submit(self: &Arc<Self>, content: &str) -> Result<ProvisionalId, SubmitError> {
        let content = content.trim();
        if content.is_empty() {
            tracing::debug!("empty submission refused");
            return Err(SubmitError::Empty);
        }
        if content.len() > self.config.max_content_len {
            tracing::debug!(size = content.len(), "oversized submission refused");
            return Err(SubmitError::TooLarge {
                size: content.len(),
                max: self.config.max_content_len,
            });
        }

        let Some(_guard) = SubmitGuard::try_acquire(&self.submitting) else {
            tracing::debug!("submission refused, another is in flight");
            return Err(SubmitError::InFlight);
        };

        let (id, online) = {
            let mut state = self.state.lock();
            if !state.recent.admit(ContentFingerprint::of(content)) {
                tracing::debug!("duplicate submission suppressed");
                return Err(SubmitError::Duplicate);
            }
            let online = state.recipient_online;
            let msg = TrackedMessage::new(content.to_owned(), online);
            let id = msg.provisional_id.clone();
            state.active.insert(id.clone(), msg);
            (id, online)
        };

        tracing::info!(provisional_id = %id, recipient_online = online, "message submitted");
        self.notify(TrackerEvent::StatusChanged {
            provisional_id: Some(id.clone()),
            confirmed_id: None,
            state: LifecycleState::Pending,
        });

        let route = Route::select(self.push.is_connected());
        self.dispatch(&id, content, route, online).await;

        self.schedule_refresh(self.config.refresh_delay);
        Ok(id)
    }

    /// Send one tracked message over `route`.
    ///
    /// The route is recorded on the entry before anything goes out; an entry
    /// that already has a route is left alone.
    pub(crate) async fn dispatch(
        &self,
        id: &ProvisionalId,
        content: &str,
        route: Route,
        recipient_online: bool,
    ) {
        // `Some(previous)` when the entry is gone or already has a route.
        let refused = self.state.lock().active.get_mut(id).map_or(Some(None), |msg| {
            if msg.mark_dispatched(route) {
                None
            } else {
                Some(msg.route())
            }
        });
        if let Some(previous) = refused {
            tracing::warn!(provisional_id = %id, %route, ?previous, "message already dispatched, skipping");
            return;
        }
        tracing::debug!(provisional_id = %id, %route, "dispatching message");

        match route {
            Route::Primary => {
                let command = PushCommand::SendMessage {
                    receiver_id: self.peer_id,
                    content: content.to_owned(),
                    temp_id: id.clone(),
                    friend_online: recipient_online,
                };
                if let Err(e) = self.push.emit(&command).await {
                    self.fail(id, &e.to_string());
                }
            }
            Route::Fallback => match self.fallback.send(self.peer_id, content).await {
                Ok(receipt) => {
                    let mut state = self.state.lock();
                    let next = if state.recipient_online {
                        LifecycleState::Delivered
                    } else {
                        LifecycleState::Sent
                    };
                    self.transition_locked(&mut state, id, next, Some(receipt.message_id), None);
                }
                Err(e) => self.fail(id, &e.to_string()),
            },
        }
    }

    /// Move an active message to `Failed`, reporting `reason` once.
    pub(crate) fn fail(&self, id: &ProvisionalId, reason: &str) {
        let mut state = self.state.lock();
        self.transition_locked(&mut state, id, LifecycleState::Failed, None, Some(reason));
    }
}
