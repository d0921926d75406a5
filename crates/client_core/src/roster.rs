use std::{sync::Arc, time::Duration};

use shared::{domain::RoomId, protocol::Participant};
use tokio::{
    sync::{broadcast, RwLock},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::warn;

use crate::{
    api::{ApiRequestError, RoomDirectory},
    ClientEvent,
};

/// Shortest polling period `spawn_polling` will use.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq)]
pub enum RosterState {
    Loading,
    Ready(Vec<Participant>),
    /// Shown as an error state until the next successful refresh.
    Failed(String),
}

/// Participant list of one room, refreshed over REST independently of the
/// realtime stream. Each fetch replaces the whole list.
pub struct ParticipantRoster {
    directory: Arc<dyn RoomDirectory>,
    room_id: RoomId,
    state: RwLock<RosterState>,
    events: broadcast::Sender<ClientEvent>,
}

impl ParticipantRoster {
    pub fn new(
        directory: Arc<dyn RoomDirectory>,
        room_id: RoomId,
        events: broadcast::Sender<ClientEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            directory,
            room_id,
            state: RwLock::new(RosterState::Loading),
            events,
        })
    }

    pub async fn state(&self) -> RosterState {
        self.state.read().await.clone()
    }

    /// Fetches the participant list once. Also serves as the manual retry
    /// after a failure.
    pub async fn refresh(&self) -> Result<Vec<Participant>, ApiRequestError> {
        match self.directory.fetch_participants(self.room_id).await {
            Ok(participants) => {
                *self.state.write().await = RosterState::Ready(participants.clone());
                let _ = self.events.send(ClientEvent::ParticipantsUpdated {
                    room_id: self.room_id,
                    participants: participants.clone(),
                });
                Ok(participants)
            }
            Err(err) => {
                let message = err.to_string();
                warn!(room_id = self.room_id.0, "participants: fetch failed: {message}");
                *self.state.write().await = RosterState::Failed(message.clone());
                let _ = self.events.send(ClientEvent::ParticipantsUnavailable {
                    room_id: self.room_id,
                    message,
                });
                Err(err)
            }
        }
    }

    /// Refreshes immediately and then every `every` until the handle is
    /// aborted. Periods below [`MIN_POLL_INTERVAL`] are raised to it.
    pub fn spawn_polling(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let roster = Arc::clone(self);
        let every = every.max(MIN_POLL_INTERVAL);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let _ = roster.refresh().await;
            }
        })
    }
}

#[cfg(test)]
#[path = "tests/roster_tests.rs"]
mod tests;
