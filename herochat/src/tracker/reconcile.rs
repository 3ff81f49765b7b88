//! Stale re-checks, authoritative refreshes, and the timers that drive them.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;

use herochat_proto::event::PushCommand;
use herochat_proto::message::{ContentFingerprint, CorrelationId, ProvisionalId, ServerMessage};

use crate::transport::{FallbackChannel, PushChannel, TransportError};

use super::{DeliveryTracker, TrackerEvent, TrackerState};

impl<P, F> DeliveryTracker<P, F>
where
    P: PushChannel + 'static,
    F: FallbackChannel + 'static,
{
    /// Re-query messages stuck in `Pending` or `Sent` for longer than
    /// `stale_after`.
    ///
    /// Over the push channel the answers arrive later as
    /// `delivery_status_response` events; over the fallback they are
    /// applied immediately. A fallback without a status lookup is answered
    /// from the authoritative message list instead. Failures are logged and
    /// left for the next tick.
    ///
    /// Returns the number of messages re-queried.
    pub async fn reconcile_stale(&self) -> usize {
        let stale = self.stale_ids();
        if stale.is_empty() {
            return 0;
        }
        let count = stale.len();

        if self.push.is_connected() {
            let command = PushCommand::RequestMessageStatus {
                message_ids: stale,
                receiver_id: self.peer_id,
            };
            match self.push.emit(&command).await {
                Ok(()) => tracing::debug!(count, "requested status of stale messages"),
                Err(e) => tracing::warn!(error = %e, count, "stale status request failed"),
            }
            return count;
        }

        match self.fallback.get_status(&stale).await {
            Ok(statuses) => {
                let applied = statuses
                    .iter()
                    .filter(|(id, state)| self.apply_confirmation(id, **state, None))
                    .count();
                tracing::debug!(count, applied, "reconciled stale messages");
            }
            Err(e) => {
                tracing::debug!(error = %e, count, "status lookup unavailable, reading message list");
                if let Err(e) = self.refresh_from_server().await {
                    tracing::warn!(error = %e, count, "stale status lookup failed");
                }
            }
        }
        count
    }

    /// Ids of active messages awaiting confirmation past the threshold,
    /// in their most specific known form.
    fn stale_ids(&self) -> Vec<CorrelationId> {
        let state = self.state.lock();
        let mut stale: Vec<_> = state
            .active
            .values()
            .filter(|m| {
                m.state.is_awaiting_confirmation() && m.submitted_at.elapsed() >= self.config.stale_after
            })
            .map(|m| {
                (
                    m.submitted_at,
                    m.confirmed_id.map_or_else(
                        || CorrelationId::Provisional(m.provisional_id.clone()),
                        CorrelationId::Confirmed,
                    ),
                )
            })
            .collect();
        stale.sort_by_key(|(at, _)| *at);
        stale.into_iter().map(|(_, id)| id).collect()
    }

    /// Fetch the authoritative message list and merge it.
    ///
    /// Own messages are matched to active entries by server id, or by
    /// content fingerprint for entries still without one. Matched entries
    /// take the server id and the server state if it is newer. Entries the
    /// server already reports as delivered move to the settled statuses;
    /// the rest stay tracked. Emits [`TrackerEvent::Refreshed`]. Failures
    /// are logged only.
    pub async fn refresh(&self) {
        if let Err(e) = self.refresh_from_server().await {
            tracing::warn!(error = %e, peer_id = self.peer_id, "message list refresh failed");
        }
    }

    /// Initial fetch when the conversation opens.
    ///
    /// Same merge as [`refresh`](Self::refresh), but the error is returned so
    /// the caller can decide how to report it.
    ///
    /// # Errors
    ///
    /// Returns the [`TransportError`] of the failed fetch.
    pub async fn load_conversation(&self) -> Result<usize, TransportError> {
        self.refresh_from_server().await
    }

    /// Returns the number of active entries that left the active set.
    async fn refresh_from_server(&self) -> Result<usize, TransportError> {
        let messages = self.fallback.fetch_messages(self.peer_id).await?;
        let superseded = {
            let mut guard = self.state.lock();
            self.merge_server_list_locked(&mut guard, &messages)
        };
        tracing::debug!(
            total = messages.len(),
            superseded,
            "merged authoritative message list"
        );
        self.notify(TrackerEvent::Refreshed { messages });
        Ok(superseded)
    }

    fn merge_server_list_locked(&self, state: &mut TrackerState, messages: &[ServerMessage]) -> usize {
        let mut superseded = 0;
        let mut claimed: HashSet<ProvisionalId> = HashSet::new();

        let is_own =
            |m: &ServerMessage| m.is_own || self.config.local_user_id == Some(m.sender_id);
        for server in messages.iter().filter(|m| is_own(m)) {
            let matched = state.by_confirmed.get(&server.id).cloned().or_else(|| {
                if state.settled.contains_key(&server.id) {
                    return None;
                }
                let fingerprint = ContentFingerprint::of(&server.content);
                state
                    .active
                    .values()
                    .filter(|m| {
                        m.confirmed_id.is_none()
                            && m.fingerprint == fingerprint
                            && !claimed.contains(&m.provisional_id)
                    })
                    .min_by_key(|m| m.submitted_at)
                    .map(|m| m.provisional_id.clone())
            });

            let Some(id) = matched else {
                // Not ours to follow; remember it for later broadcasts.
                if !self.advance_settled_locked(state, server.id, server.status)
                    && !state.settled.contains_key(&server.id)
                {
                    state.settle(server.id, server.status, self.config.max_settled);
                }
                continue;
            };

            claimed.insert(id.clone());
            self.transition_locked(state, &id, server.status, Some(server.id), None);
            // Still awaiting confirmation: keep it for catch-up and the stale sweep.
            if state
                .active
                .get(&id)
                .is_some_and(|m| m.state.is_awaiting_confirmation())
            {
                continue;
            }
            if let Some(msg) = state.remove(&id) {
                let confirmed = msg.confirmed_id.unwrap_or(server.id);
                state.settle(confirmed, msg.state, self.config.max_settled);
            }
            superseded += 1;
        }
        superseded
    }

    /// Run one [`refresh`](Self::refresh) after `delay`.
    pub fn schedule_refresh(self: &Arc<Self>, delay: Duration) -> tokio::task::JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tracker.refresh().await;
        })
    }

    /// Spawn the periodic [`poll_presence`](Self::poll_presence) task.
    ///
    /// The first poll runs one full interval after spawning.
    pub fn spawn_presence_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let tracker = Arc::clone(self);
        let period = self.config.presence_interval;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                tracker.poll_presence().await;
            }
        })
    }

    /// Spawn the periodic [`reconcile_stale`](Self::reconcile_stale) task.
    ///
    /// The first check runs one full interval after spawning.
    pub fn spawn_reconcile_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let tracker = Arc::clone(self);
        let period = self.config.reconcile_interval;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                tracker.reconcile_stale().await;
            }
        })
    }
}
