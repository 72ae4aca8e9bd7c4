//! In-process change-notification broker for voting sessions.
//!
//! Stations and the supervisor console coordinate purely through session
//! rows; this broker fans session inserts/updates out to their SSE feeds so
//! nobody has to poll. Delivery is at-least-once from the consumer's point
//! of view: a feed that lags past the channel capacity misses messages and
//! must reconcile against the database, which the station feed does on
//! every (re)connect.

use rocket::tokio::sync::broadcast;
use serde::Serialize;

use crate::model::session::VotingSession;

/// Buffered events per subscriber before slow consumers start missing
/// messages. Session churn is bounded by the number of physical stations,
/// so this is generous.
const CHANNEL_CAPACITY: usize = 256;

/// What happened to a session row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEventKind {
    Created,
    Updated,
}

/// A change notification for a single session row, carrying the full row
/// so consumers never need a follow-up lookup.
#[derive(Debug, Clone, Serialize)]
pub struct SessionEvent {
    pub kind: SessionEventKind,
    pub session: VotingSession,
}

/// Fan-out hub for [`SessionEvent`]s, shared via rocket managed state.
pub struct SessionBroker {
    sender: broadcast::Sender<SessionEvent>,
}

impl SessionBroker {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to all session events. Filtering (by station, by status)
    /// is the subscriber's job.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all current subscribers. An election with no
    /// connected stations is fine; the event is simply dropped.
    pub fn publish(&self, kind: SessionEventKind, session: VotingSession) {
        let _ = self.sender.send(SessionEvent { kind, session });
    }
}

impl Default for SessionBroker {
    fn default() -> Self {
        Self::new(CHANNEL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::model::session::SessionStatus;

    #[rocket::async_test]
    async fn fan_out_to_all_subscribers() {
        let broker = SessionBroker::default();
        let mut rx1 = broker.subscribe();
        let mut rx2 = broker.subscribe();

        broker.publish(SessionEventKind::Created, VotingSession::example());

        for rx in [&mut rx1, &mut rx2] {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.kind, SessionEventKind::Created);
            assert_eq!(event.session.status, SessionStatus::Pending);
        }
    }

    #[rocket::async_test]
    async fn publish_without_subscribers_is_harmless() {
        let broker = SessionBroker::default();
        broker.publish(SessionEventKind::Updated, VotingSession::example());
        // A later subscriber sees nothing from before it joined.
        let mut rx = broker.subscribe();
        broker.publish(SessionEventKind::Created, VotingSession::example());
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, SessionEventKind::Created);
    }
}
