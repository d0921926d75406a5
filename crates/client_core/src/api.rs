//! REST calls the room view makes outside the realtime stream.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use shared::{
    domain::{RoomId, UserId},
    error::ApiError,
    protocol::{ChatRoom, Participant},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiRequestError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {message}")]
    Status { status: StatusCode, message: String },
}

/// Room metadata and membership as exposed by the backend.
#[async_trait]
pub trait RoomDirectory: Send + Sync {
    async fn fetch_room(&self, room_id: RoomId) -> Result<ChatRoom, ApiRequestError>;
    async fn fetch_participants(
        &self,
        room_id: RoomId,
    ) -> Result<Vec<Participant>, ApiRequestError>;
    async fn leave_room(&self, room_id: RoomId, user_id: UserId) -> Result<(), ApiRequestError>;
}

pub struct ChatRoomApi {
    http: Client,
    server_url: String,
}

impl ChatRoomApi {
    pub fn new(server_url: impl Into<String>) -> Self {
        let server_url: String = server_url.into();
        Self {
            http: Client::new(),
            server_url: server_url.trim_end_matches('/').to_string(),
        }
    }

    fn room_url(&self, room_id: RoomId) -> String {
        format!("{}/api/premium/chat-rooms/{}", self.server_url, room_id.0)
    }
}

#[async_trait]
impl RoomDirectory for ChatRoomApi {
    async fn fetch_room(&self, room_id: RoomId) -> Result<ChatRoom, ApiRequestError> {
        let res = self.http.get(self.room_url(room_id)).send().await?;
        Ok(ensure_success(res).await?.json().await?)
    }

    async fn fetch_participants(
        &self,
        room_id: RoomId,
    ) -> Result<Vec<Participant>, ApiRequestError> {
        let res = self
            .http
            .get(format!("{}/participants", self.room_url(room_id)))
            .send()
            .await?;
        Ok(ensure_success(res).await?.json().await?)
    }

    async fn leave_room(&self, room_id: RoomId, user_id: UserId) -> Result<(), ApiRequestError> {
        let res = self
            .http
            .delete(format!(
                "{}/participants/{}",
                self.room_url(room_id),
                user_id.0
            ))
            .send()
            .await?;
        ensure_success(res).await?;
        Ok(())
    }
}

async fn ensure_success(res: Response) -> Result<Response, ApiRequestError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }

    let body = res.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiError>(&body)
        .map(|err| err.message)
        .unwrap_or_else(|_| {
            if body.trim().is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            } else {
                body
            }
        });
    Err(ApiRequestError::Status { status, message })
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;
