//! Per-session fan-out of state changes to connected participants.
//!
//! Events are hints to refetch the session state, never the state itself, so
//! a subscriber that falls behind is told to resync instead of being replayed.
//!
//! Events can only be published through a [`SessionTurn`]. A handler takes the
//! session's turn before it writes and publishes before letting go, so the
//! events of one session go out in the order their writes committed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rocket::response::stream::Event;
use rocket::tokio::sync::{
    broadcast::{self, error::RecvError, Receiver, Sender},
    Mutex as AsyncMutex, OwnedMutexGuard,
};
use serde::Serialize;

use crate::model::{
    api::{
        round::{RoundDescription, RoundEnded, RoundRef, Turnout},
        session::{ParticipantDescription, ParticipantUpdate, SessionUpdate},
    },
    mongodb::Id,
};

/// Events buffered per session before a slow subscriber is told to resync.
pub const CHANNEL_CAPACITY: usize = 64;

/// A state change pushed to every subscriber of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SessionEvent {
    ParticipantJoined(ParticipantDescription),
    ParticipantUpdated(ParticipantUpdate),
    ElectionUpdated(SessionUpdate),
    RoundStarted(RoundDescription),
    VoteStatus(Turnout),
    AllVoted(RoundRef),
    VotingClosed(RoundRef),
    RoundEnded(Box<RoundEnded>),
    RoundCancelled(RoundRef),
    /// Events were missed; refetch everything.
    Resync,
}

impl SessionEvent {
    /// The SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ParticipantJoined(_) => "participant_joined",
            Self::ParticipantUpdated(_) => "participant_updated",
            Self::ElectionUpdated(_) => "election_updated",
            Self::RoundStarted(_) => "round_started",
            Self::VoteStatus(_) => "vote_status",
            Self::AllVoted(_) => "all_voted",
            Self::VotingClosed(_) => "voting_closed",
            Self::RoundEnded(_) => "round_ended",
            Self::RoundCancelled(_) => "round_cancelled",
            Self::Resync => "resync",
        }
    }
}

impl From<SessionEvent> for Event {
    fn from(event: SessionEvent) -> Self {
        let name = event.name();
        match event {
            SessionEvent::Resync => Event::data("{}").event(name),
            event => Event::json(&event).event(name),
        }
    }
}

type Channels = Arc<Mutex<HashMap<Id, Sender<SessionEvent>>>>;
type Turns = Arc<Mutex<HashMap<Id, Arc<AsyncMutex<()>>>>>;

/// Registry of live event channels, one per session with at least one subscriber.
///
/// Subscribing and dropping a [`Subscription`] are the only ways entries come
/// and go. Everything else only gets to publish, through a [`SessionTurn`].
#[derive(Debug, Clone, Default)]
pub struct Notifier {
    channels: Channels,
    turns: Turns,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Id, Sender<SessionEvent>>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start receiving the session's events.
    pub fn subscribe(&self, session_id: Id) -> Subscription {
        let receiver = self
            .lock()
            .entry(session_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();
        debug!("Subscribed to session {session_id}");
        Subscription {
            session_id,
            receiver: Some(receiver),
            channels: Arc::clone(&self.channels),
        }
    }

    /// Wait until no other command is changing the session, then hold it
    /// until the returned turn is dropped.
    pub async fn turn(&self, session_id: Id) -> SessionTurn<'_> {
        let lock = Arc::clone(
            self.turns
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(session_id)
                .or_default(),
        );
        SessionTurn {
            notifier: self,
            session_id,
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Send an event to everyone subscribed to the session. Sending under the
    /// registry lock keeps events for a session in publish order.
    fn publish(&self, session_id: Id, event: SessionEvent) {
        let channels = self.lock();
        match channels.get(&session_id) {
            Some(sender) => {
                let name = event.name();
                let delivered = sender.send(event).unwrap_or(0);
                debug!("Published {name} to {delivered} subscriber(s) of session {session_id}");
            }
            None => trace!("No subscribers for {} in session {session_id}", event.name()),
        }
    }

    /// Number of sessions with live subscribers.
    #[cfg(test)]
    pub fn session_count(&self) -> usize {
        self.lock().len()
    }
}

/// Exclusive right to change one session and announce the change.
pub struct SessionTurn<'n> {
    notifier: &'n Notifier,
    session_id: Id,
    guard: Option<OwnedMutexGuard<()>>,
}

impl SessionTurn<'_> {
    pub fn publish(&self, event: SessionEvent) {
        self.notifier.publish(self.session_id, event);
    }
}

impl Drop for SessionTurn<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut turns = self
            .notifier
            .turns
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Nobody else holds or waits for the lock once the map has the only handle.
        if let Some(lock) = turns.get(&self.session_id) {
            if Arc::strong_count(lock) == 1 {
                turns.remove(&self.session_id);
            }
        }
    }
}

/// One subscriber's view of a session's events. Dropping it unsubscribes.
pub struct Subscription {
    session_id: Id,
    receiver: Option<Receiver<SessionEvent>>,
    channels: Channels,
}

impl Subscription {
    /// Wait for the next event. `None` once the channel has gone away.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        let receiver = self.receiver.as_mut()?;
        match receiver.recv().await {
            Ok(event) => Some(event),
            Err(RecvError::Lagged(missed)) => {
                warn!("Subscriber of session {} missed {missed} events", self.session_id);
                Some(SessionEvent::Resync)
            }
            Err(RecvError::Closed) => None,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // Release our receiver before counting who is left.
        drop(self.receiver.take());
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(sender) = channels.get(&self.session_id) {
            if sender.receiver_count() == 0 {
                channels.remove(&self.session_id);
                debug!("Last subscriber left session {}", self.session_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ping(round_id: Id) -> SessionEvent {
        SessionEvent::VotingClosed(round_id.into())
    }

    #[rocket::async_test]
    async fn delivers_in_publish_order() {
        let notifier = Notifier::new();
        let session = Id::new();
        let mut first = notifier.subscribe(session);
        let mut second = notifier.subscribe(session);

        let rounds = [Id::new(), Id::new(), Id::new()];
        for round in rounds {
            notifier.publish(session, ping(round));
        }
        for subscription in [&mut first, &mut second] {
            for round in rounds {
                assert_eq!(subscription.recv().await, Some(ping(round)));
            }
        }
    }

    #[rocket::async_test]
    async fn sessions_are_isolated() {
        let notifier = Notifier::new();
        let (a, b) = (Id::new(), Id::new());
        let mut sub_a = notifier.subscribe(a);
        let _sub_b = notifier.subscribe(b);

        let round = Id::new();
        notifier.publish(b, ping(Id::new()));
        notifier.publish(a, ping(round));
        assert_eq!(sub_a.recv().await, Some(ping(round)));
    }

    #[test]
    fn publishing_without_subscribers_is_a_no_op() {
        let notifier = Notifier::new();
        notifier.publish(Id::new(), SessionEvent::Resync);
        assert_eq!(notifier.session_count(), 0);
    }

    #[test]
    fn dropping_the_last_subscription_removes_the_entry() {
        let notifier = Notifier::new();
        let session = Id::new();
        let first = notifier.subscribe(session);
        let second = notifier.subscribe(session);
        assert_eq!(notifier.session_count(), 1);

        drop(first);
        assert_eq!(notifier.session_count(), 1);
        drop(second);
        assert_eq!(notifier.session_count(), 0);
    }

    #[rocket::async_test]
    async fn slow_subscriber_is_told_to_resync() {
        let notifier = Notifier::new();
        let session = Id::new();
        let mut slow = notifier.subscribe(session);

        let rounds: Vec<Id> = (0..CHANNEL_CAPACITY + 5).map(|_| Id::new()).collect();
        for round in &rounds {
            notifier.publish(session, ping(*round));
        }

        assert_eq!(slow.recv().await, Some(SessionEvent::Resync));
        // Then carries on from the oldest event still buffered.
        assert_eq!(slow.recv().await, Some(ping(rounds[5])));
    }

    #[rocket::async_test]
    async fn turns_are_taken_one_at_a_time() {
        use std::time::Duration;

        use rocket::futures::future::join;
        use rocket::tokio::time::sleep;

        let notifier = Notifier::new();
        let session = Id::new();
        let mut sub = notifier.subscribe(session);
        let (first, second) = (Id::new(), Id::new());

        let slow = async {
            let turn = notifier.turn(session).await;
            sleep(Duration::from_millis(50)).await;
            turn.publish(ping(first));
        };
        let fast = async {
            sleep(Duration::from_millis(10)).await;
            notifier.turn(session).await.publish(ping(second));
        };
        join(slow, fast).await;

        assert_eq!(sub.recv().await, Some(ping(first)));
        assert_eq!(sub.recv().await, Some(ping(second)));
        assert!(notifier.turns.lock().unwrap().is_empty());
    }

    #[rocket::async_test]
    async fn other_sessions_do_not_wait() {
        let notifier = Notifier::new();
        let _held = notifier.turn(Id::new()).await;
        let other = notifier.turn(Id::new()).await;
        drop(other);
        assert_eq!(notifier.turns.lock().unwrap().len(), 1);
    }

    #[test]
    fn event_names() {
        assert_eq!(ping(Id::new()).name(), "voting_closed");
        assert_eq!(SessionEvent::Resync.name(), "resync");
        let update = SessionEvent::ElectionUpdated(SessionUpdate { body_size: Some(9) });
        assert_eq!(update.name(), "election_updated");
        let json = rocket::serde::json::serde_json::to_string(&update).unwrap();
        assert_eq!(json, r#"{"body_size":9}"#);
    }
}
