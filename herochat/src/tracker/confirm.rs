//! Confirmations, read receipts, presence, and push-event routing.

use std::sync::Arc;

use herochat_proto::event::{PushCommand, PushEvent};
use herochat_proto::message::{ConfirmedId, CorrelationId, LifecycleState, ProvisionalId};

use crate::transport::{FallbackChannel, PushChannel};

use super::{DeliveryTracker, TrackerEvent, TrackerState};

impl<P, F> DeliveryTracker<P, F>
where
    P: PushChannel + 'static,
    F: FallbackChannel + 'static,
{
    /// Merge a server-reported state for one message.
    ///
    /// `correlation` may be either identity form. `confirmed`, when given,
    /// is attached to an entry that has no server id yet. Messages outside
    /// the active set are matched against the settled statuses.
    ///
    /// Returns `true` if the state moved forward. Stale, duplicate, and
    /// unknown confirmations return `false` and change nothing.
    pub fn apply_confirmation(
        &self,
        correlation: &CorrelationId,
        next: LifecycleState,
        confirmed: Option<ConfirmedId>,
    ) -> bool {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if let Some(id) = state.resolve(correlation, confirmed) {
            return self.transition_locked(state, &id, next, confirmed, None);
        }

        let settled_id = match correlation {
            CorrelationId::Confirmed(id) => Some(*id),
            CorrelationId::Provisional(_) => confirmed,
        };
        if let Some(id) = settled_id
            && self.advance_settled_locked(state, id, next)
        {
            return true;
        }

        tracing::trace!(%correlation, %next, "confirmation matched nothing");
        false
    }

    /// Mark the conversation read, locally and on the server.
    ///
    /// Every message in `Sent` or `Delivered`, tracked or settled, becomes
    /// `Read`. Calling it again changes nothing locally. Failure to inform
    /// the server is logged only.
    pub async fn mark_conversation_read(&self) {
        let changed = self.apply_read_locally();
        tracing::debug!(changed, "conversation marked read");

        let result = if self.push.is_connected() {
            self.push
                .emit(&PushCommand::MarkRead {
                    sender_id: self.peer_id,
                })
                .await
        } else {
            self.fallback.mark_read(self.peer_id).await
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, peer_id = self.peer_id, "mark-read request failed");
        }
    }

    /// Apply `Read` to every message in `Sent` or `Delivered`.
    ///
    /// Returns the number of messages that changed.
    pub(crate) fn apply_read_locally(&self) -> usize {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let readable =
            |s: LifecycleState| matches!(s, LifecycleState::Sent | LifecycleState::Delivered);

        let active: Vec<ProvisionalId> = state
            .active
            .values()
            .filter(|m| readable(m.state))
            .map(|m| m.provisional_id.clone())
            .collect();
        let settled: Vec<ConfirmedId> = state
            .settled
            .iter()
            .filter(|(_, s)| readable(**s))
            .map(|(id, _)| *id)
            .collect();

        let mut changed = 0;
        for id in &active {
            if self.transition_locked(state, id, LifecycleState::Read, None, None) {
                changed += 1;
            }
        }
        for id in settled {
            if self.advance_settled_locked(state, id, LifecycleState::Read) {
                changed += 1;
            }
        }
        changed
    }

    /// Record a presence change of the conversation peer.
    ///
    /// On offline to online, messages flagged as sent while the recipient
    /// was offline advance to `Delivered` and one refresh is scheduled
    /// after `presence_refresh_delay`.
    pub fn on_recipient_presence_change(self: &Arc<Self>, online: bool) {
        let caught_up = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let was_online = state.recipient_online;
            state.recipient_online = online;
            if was_online == online {
                return;
            }
            self.notify(TrackerEvent::RecipientPresence { online });
            if !online {
                tracing::info!(peer_id = self.peer_id, "recipient went offline");
                return;
            }
            self.catch_up_locked(state)
        };

        tracing::info!(peer_id = self.peer_id, caught_up, "recipient came online");
        self.schedule_refresh(self.config.presence_refresh_delay);
    }

    /// Ask for the peer's current presence.
    ///
    /// Over the push channel the answer arrives later as a `user_status`
    /// event. Over the fallback it is applied immediately. Failures are
    /// logged and leave the last known presence in place.
    pub async fn poll_presence(self: &Arc<Self>) {
        if self.push.is_connected() {
            let command = PushCommand::RequestStatus {
                user_id: self.peer_id,
            };
            if let Err(e) = self.push.emit(&command).await {
                tracing::warn!(error = %e, peer_id = self.peer_id, "presence request failed");
            }
            return;
        }
        match self.fallback.get_presence(self.peer_id).await {
            Ok(status) => {
                tracing::trace!(peer_id = self.peer_id, %status, "polled recipient presence");
                self.on_recipient_presence_change(status.is_online());
            }
            Err(e) => tracing::warn!(error = %e, peer_id = self.peer_id, "presence lookup failed"),
        }
    }

    /// Advance every offline-flagged entry to `Delivered`.
    fn catch_up_locked(&self, state: &mut TrackerState) -> usize {
        let flagged: Vec<ProvisionalId> = state
            .active
            .values()
            .filter(|m| m.delivered_while_recipient_offline)
            .map(|m| m.provisional_id.clone())
            .collect();
        flagged
            .iter()
            .filter(|id| self.transition_locked(state, id, LifecycleState::Delivered, None, None))
            .count()
    }

    /// Route one server event into the tracker.
    pub fn handle_push_event(self: &Arc<Self>, event: PushEvent) {
        match event {
            PushEvent::MessageDelivered {
                temp_id,
                message_id,
                status,
            } => {
                let correlation =
                    temp_id.map_or(CorrelationId::Confirmed(message_id), CorrelationId::Provisional);
                self.apply_confirmation(&correlation, status, Some(message_id));
            }
            PushEvent::MessageStatusUpdate { message_id, status }
            | PushEvent::DeliveryStatusResponse {
                message_id, status, ..
            } => {
                self.apply_confirmation(&message_id, status, None);
            }
            PushEvent::MessagesRead { reader_id, .. } => {
                if reader_id == self.peer_id {
                    self.apply_read_locally();
                } else {
                    tracing::trace!(reader_id, "read receipt for another conversation");
                }
            }
            PushEvent::SendMessageError { temp_id, message } => match temp_id {
                Some(id) => self.fail(&id, &message),
                None => tracing::warn!(reason = %message, "send error without a message id"),
            },
            PushEvent::UserStatus { user_id, status } => {
                if user_id == self.peer_id {
                    self.on_recipient_presence_change(status.is_online());
                }
            }
        }
    }
}
