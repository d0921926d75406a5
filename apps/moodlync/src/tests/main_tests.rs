use super::*;

use async_trait::async_trait;
use client_core::{ApiRequestError, RoomDirectory};
use reqwest::StatusCode;
use chrono::Utc;
use shared::{domain::UserId, protocol::Participant};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Fails room loads a fixed number of times, then serves the room.
struct FlakyDirectory {
    failures_left: AtomicUsize,
    fetches: AtomicUsize,
}

impl FlakyDirectory {
    fn failing(times: usize) -> Arc<Self> {
        Arc::new(Self {
            failures_left: AtomicUsize::new(times),
            fetches: AtomicUsize::new(0),
        })
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RoomDirectory for FlakyDirectory {
    async fn fetch_room(&self, room_id: RoomId) -> Result<ChatRoom, ApiRequestError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ApiRequestError::Status {
                status: StatusCode::SERVICE_UNAVAILABLE,
                message: "rooms offline".to_string(),
            });
        }
        Ok(ChatRoom {
            id: room_id,
            name: "Calm corner".to_string(),
            description: String::new(),
            emotion: "calm".to_string(),
            theme_color: None,
            is_private: false,
            max_participants: 20,
            participants: 0,
            created_by: UserId(1),
            created_at: Utc::now(),
        })
    }

    async fn fetch_participants(
        &self,
        _room_id: RoomId,
    ) -> Result<Vec<Participant>, ApiRequestError> {
        Ok(Vec::new())
    }

    async fn leave_room(&self, _room_id: RoomId, _user_id: UserId) -> Result<(), ApiRequestError> {
        Ok(())
    }
}

fn client_with(directory: Arc<FlakyDirectory>) -> Arc<RoomClient> {
    // Nothing listens on port 1, so a websocket connect fails fast.
    RoomClient::new_with_directory(
        "http://127.0.0.1:1",
        Arc::new(SharedSecretCrypto::new(b"secret".to_vec())),
        directory,
    )
}

fn input(text: &'static str) -> Lines<BufReader<&'static [u8]>> {
    BufReader::new(text.as_bytes()).lines()
}

fn alice() -> Option<SessionUser> {
    Some(SessionUser::new(UserId(1), "alice"))
}

#[tokio::test]
async fn room_load_failure_is_retried_until_quit() {
    let directory = FlakyDirectory::failing(usize::MAX);
    let client = client_with(directory.clone());
    let mut lines = input("\n/retry\n/quit\nnever read\n");

    let err = start_with_retry(&client, alice(), RoomId(7), &mut lines)
        .await
        .expect_err("user quit");
    assert!(format!("{err:#}").contains("rooms offline"));
    assert_eq!(directory.fetches(), 3);
    assert_eq!(client.state().await, SessionState::Idle);
    assert_eq!(
        lines.next_line().await.expect("read"),
        Some("never read".to_string())
    );
}

#[tokio::test]
async fn end_of_input_gives_up_after_first_failure() {
    let directory = FlakyDirectory::failing(1);
    let client = client_with(directory.clone());
    let mut lines = input("");

    assert!(start_with_retry(&client, alice(), RoomId(7), &mut lines)
        .await
        .is_err());
    assert_eq!(directory.fetches(), 1);
}

#[tokio::test]
async fn retry_reaches_connect_and_connect_failure_is_final() {
    let directory = FlakyDirectory::failing(1);
    let client = client_with(directory.clone());
    let mut lines = input("\n\n\n");

    assert!(start_with_retry(&client, alice(), RoomId(7), &mut lines)
        .await
        .is_err());
    assert_eq!(directory.fetches(), 2);
    assert_eq!(client.state().await, SessionState::Closed);
}

#[tokio::test]
async fn missing_user_is_not_retried() {
    let directory = FlakyDirectory::failing(0);
    let client = client_with(directory.clone());
    let mut lines = input("\n");

    assert!(start_with_retry(&client, None, RoomId(7), &mut lines)
        .await
        .is_err());
    assert_eq!(directory.fetches(), 0);
}
