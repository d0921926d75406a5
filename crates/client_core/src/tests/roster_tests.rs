use super::*;
use async_trait::async_trait;
use reqwest::StatusCode;
use shared::{domain::UserId, protocol::ChatRoom};
use std::collections::VecDeque;
use tokio::sync::Mutex;

/// Serves queued participant fetch results in order.
struct ScriptedDirectory {
    responses: Mutex<VecDeque<Result<Vec<Participant>, ApiRequestError>>>,
    calls: Mutex<u32>,
}

impl ScriptedDirectory {
    fn new(responses: Vec<Result<Vec<Participant>, ApiRequestError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(0),
        })
    }
}

#[async_trait]
impl RoomDirectory for ScriptedDirectory {
    async fn fetch_room(&self, room_id: RoomId) -> Result<ChatRoom, ApiRequestError> {
        Err(ApiRequestError::Status {
            status: StatusCode::NOT_FOUND,
            message: format!("room {room_id} not scripted"),
        })
    }

    async fn fetch_participants(
        &self,
        _room_id: RoomId,
    ) -> Result<Vec<Participant>, ApiRequestError> {
        *self.calls.lock().await += 1;
        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn leave_room(&self, _room_id: RoomId, _user_id: UserId) -> Result<(), ApiRequestError> {
        Ok(())
    }
}

fn participant(id: i64, username: &str) -> Participant {
    Participant {
        id: UserId(id),
        username: username.to_string(),
        is_admin: false,
        avatar_url: None,
    }
}

fn unavailable() -> ApiRequestError {
    ApiRequestError::Status {
        status: StatusCode::SERVICE_UNAVAILABLE,
        message: "participants offline".to_string(),
    }
}

#[tokio::test]
async fn roster_starts_loading_and_last_fetch_wins() {
    let directory = ScriptedDirectory::new(vec![
        Ok(vec![participant(1, "alice"), participant(2, "Bob")]),
        Ok(vec![participant(2, "Bob")]),
    ]);
    let (events, mut events_rx) = broadcast::channel(16);
    let roster = ParticipantRoster::new(directory.clone(), RoomId(7), events);
    assert_eq!(roster.state().await, RosterState::Loading);

    roster.refresh().await.expect("first refresh");
    roster.refresh().await.expect("second refresh");

    assert_eq!(
        roster.state().await,
        RosterState::Ready(vec![participant(2, "Bob")])
    );
    assert_eq!(*directory.calls.lock().await, 2);

    let mut updates = Vec::new();
    while let Ok(event) = events_rx.try_recv() {
        if let ClientEvent::ParticipantsUpdated {
            room_id,
            participants,
        } = event
        {
            assert_eq!(room_id, RoomId(7));
            updates.push(participants.len());
        }
    }
    assert_eq!(updates, vec![2, 1]);
}

#[tokio::test]
async fn failed_fetch_becomes_error_state_until_manual_retry() {
    let directory = ScriptedDirectory::new(vec![
        Err(unavailable()),
        Ok(vec![participant(1, "alice")]),
    ]);
    let (events, mut events_rx) = broadcast::channel(16);
    let roster = ParticipantRoster::new(directory, RoomId(7), events);

    assert!(roster.refresh().await.is_err());
    match roster.state().await {
        RosterState::Failed(message) => assert!(message.contains("participants offline")),
        other => panic!("expected failed state, got {other:?}"),
    }
    assert!(matches!(
        events_rx.try_recv(),
        Ok(ClientEvent::ParticipantsUnavailable { room_id: RoomId(7), .. })
    ));

    roster.refresh().await.expect("retry");
    assert_eq!(
        roster.state().await,
        RosterState::Ready(vec![participant(1, "alice")])
    );
}

#[tokio::test(start_paused = true)]
async fn polling_refreshes_on_every_tick() {
    let directory = ScriptedDirectory::new(Vec::new());
    let (events, _events_rx) = broadcast::channel(16);
    let roster = ParticipantRoster::new(directory.clone(), RoomId(7), events);

    let poller = roster.spawn_polling(Duration::from_secs(10));
    tokio::time::sleep(Duration::from_secs(25)).await;
    poller.abort();

    assert_eq!(*directory.calls.lock().await, 3);
    assert_eq!(roster.state().await, RosterState::Ready(Vec::new()));
}

#[tokio::test(start_paused = true)]
async fn zero_polling_period_is_clamped_instead_of_panicking() {
    let directory = ScriptedDirectory::new(Vec::new());
    let (events, _events_rx) = broadcast::channel(16);
    let roster = ParticipantRoster::new(directory.clone(), RoomId(7), events);

    let poller = roster.spawn_polling(Duration::ZERO);
    tokio::time::sleep(MIN_POLL_INTERVAL * 2 + MIN_POLL_INTERVAL / 2).await;
    assert!(!poller.is_finished());
    poller.abort();

    assert_eq!(*directory.calls.lock().await, 3);
}
