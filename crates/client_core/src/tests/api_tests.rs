use super::*;
use axum::{
    extract::{Path, State},
    http::StatusCode as HttpStatus,
    routing::{delete, get},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tokio::{net::TcpListener, sync::Mutex};

#[derive(Clone, Default)]
struct DirectoryState {
    leaves: Arc<Mutex<Vec<(i64, i64)>>>,
}

fn room_json(id: i64) -> serde_json::Value {
    json!({
        "id": id,
        "name": "Calm corner",
        "description": "breathe",
        "emotion": "calm",
        "isPrivate": false,
        "maxParticipants": 20,
        "participants": 2,
        "createdBy": 1,
        "createdAt": "2024-01-01T00:00:00Z"
    })
}

async fn get_room(
    Path(room_id): Path<i64>,
) -> Result<Json<serde_json::Value>, (HttpStatus, Json<ApiError>)> {
    if room_id == 7 {
        Ok(Json(room_json(room_id)))
    } else {
        Err((
            HttpStatus::NOT_FOUND,
            Json(ApiError::new("Chat room not found")),
        ))
    }
}

async fn get_participants(Path(_room_id): Path<i64>) -> Json<serde_json::Value> {
    Json(json!([
        { "id": 1, "username": "alice", "isAdmin": true },
        { "id": 2, "username": "Bob", "isAdmin": false, "avatarUrl": "https://cdn.example/bob.png" }
    ]))
}

async fn delete_participant(
    State(state): State<DirectoryState>,
    Path((room_id, user_id)): Path<(i64, i64)>,
) -> HttpStatus {
    state.leaves.lock().await.push((room_id, user_id));
    HttpStatus::NO_CONTENT
}

async fn internal_error() -> (HttpStatus, &'static str) {
    (HttpStatus::INTERNAL_SERVER_ERROR, "")
}

async fn spawn_directory_server() -> (String, DirectoryState) {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let state = DirectoryState::default();
    let app = Router::new()
        .route("/api/premium/chat-rooms/:room_id", get(get_room))
        .route(
            "/api/premium/chat-rooms/:room_id/participants",
            get(get_participants),
        )
        .route(
            "/api/premium/chat-rooms/:room_id/participants/:user_id",
            delete(delete_participant),
        )
        .route("/broken/api/premium/chat-rooms/:room_id", get(internal_error))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), state)
}

#[tokio::test]
async fn fetch_room_parses_room_metadata_with_trailing_slash_base() {
    let (server_url, _state) = spawn_directory_server().await;
    let api = ChatRoomApi::new(format!("{server_url}/"));

    let room = api.fetch_room(RoomId(7)).await.expect("room");
    assert_eq!(room.id, RoomId(7));
    assert_eq!(room.emotion, "calm");
    assert_eq!(room.max_participants, 20);
    assert_eq!(room.created_by, UserId(1));
}

#[tokio::test]
async fn fetch_room_surfaces_backend_error_message() {
    let (server_url, _state) = spawn_directory_server().await;
    let api = ChatRoomApi::new(server_url);

    match api.fetch_room(RoomId(99)).await {
        Err(ApiRequestError::Status { status, message }) => {
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert_eq!(message, "Chat room not found");
        }
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn empty_error_body_falls_back_to_status_reason() {
    let (server_url, _state) = spawn_directory_server().await;
    let api = ChatRoomApi::new(format!("{server_url}/broken"));

    match api.fetch_room(RoomId(7)).await {
        Err(ApiRequestError::Status { status, message }) => {
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(message, "Internal Server Error");
        }
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn fetch_participants_returns_full_list() {
    let (server_url, _state) = spawn_directory_server().await;
    let api = ChatRoomApi::new(server_url);

    let participants = api.fetch_participants(RoomId(7)).await.expect("participants");
    assert_eq!(participants.len(), 2);
    assert!(participants[0].is_admin);
    assert_eq!(participants[1].username, "Bob");
    assert_eq!(
        participants[1].avatar_url.as_deref(),
        Some("https://cdn.example/bob.png")
    );
}

#[tokio::test]
async fn leave_room_deletes_the_membership() {
    let (server_url, state) = spawn_directory_server().await;
    let api = ChatRoomApi::new(server_url);

    api.leave_room(RoomId(7), UserId(1)).await.expect("leave");
    assert_eq!(*state.leaves.lock().await, vec![(7, 1)]);
}
