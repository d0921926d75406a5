use std::sync::Arc;

use anyhow::{Context, Result};
use futures::StreamExt;
use shared::{domain::RoomId, protocol::ChatRoom};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use crate::{
    api::{ChatRoomApi, RoomDirectory},
    crypto::RoomCrypto,
    message_log::ChatMessage,
    roster::ParticipantRoster,
    session::{FrameOutcome, RoomSession, SendOutcome, SessionError, SessionState, SessionUser},
    transport::{websocket_url, Disconnected, Transport, WsReader, WsTransport},
    ClientEvent, CONNECTION_ISSUE_NOTICE,
};

/// Owns the session, the websocket and the reader task of one open room.
pub struct RoomClient {
    server_url: String,
    directory: Arc<dyn RoomDirectory>,
    inner: Mutex<RoomClientState>,
    events: broadcast::Sender<ClientEvent>,
}

struct RoomClientState {
    session: RoomSession,
    transport: Option<WsTransport>,
    reader_task: Option<JoinHandle<()>>,
    /// Set once `join_room` went out; only then is there a membership to
    /// remove over REST.
    joined: bool,
}

impl RoomClient {
    pub fn new(server_url: impl Into<String>, crypto: Arc<dyn RoomCrypto>) -> Arc<Self> {
        let server_url = server_url.into();
        let directory = Arc::new(ChatRoomApi::new(server_url.clone()));
        Self::new_with_directory(server_url, crypto, directory)
    }

    pub fn new_with_directory(
        server_url: impl Into<String>,
        crypto: Arc<dyn RoomCrypto>,
        directory: Arc<dyn RoomDirectory>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(1024);
        Arc::new(Self {
            server_url: server_url.into(),
            directory,
            inner: Mutex::new(RoomClientState {
                session: RoomSession::new(crypto),
                transport: None,
                reader_task: None,
                joined: false,
            }),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.session.state()
    }

    pub async fn room(&self) -> Option<ChatRoom> {
        self.inner.lock().await.session.room().cloned()
    }

    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.inner.lock().await.session.log().snapshot()
    }

    /// Roster for `room_id` sharing this client's directory and event stream.
    pub fn participant_roster(&self, room_id: RoomId) -> Arc<ParticipantRoster> {
        ParticipantRoster::new(Arc::clone(&self.directory), room_id, self.events.clone())
    }

    /// Loads the room, opens the stream and joins. A failed room fetch leaves
    /// the session idle so `start` can be retried; a failed connect closes it.
    pub async fn start(
        self: &Arc<Self>,
        user: Option<SessionUser>,
        room_id: RoomId,
    ) -> Result<ChatRoom> {
        let Some(user) = user else {
            return Err(SessionError::MissingUser.into());
        };
        {
            let state = self.inner.lock().await.session.state();
            if state != SessionState::Idle {
                return Err(SessionError::AlreadyStarted(state).into());
            }
        }
        let ws_url = websocket_url(&self.server_url)?;

        let room = match self.directory.fetch_room(room_id).await {
            Ok(room) => room,
            Err(err) => {
                let _ = self.events.send(ClientEvent::RoomUnavailable {
                    room_id,
                    message: err.to_string(),
                });
                return Err(err).with_context(|| format!("failed to load chat room {room_id}"));
            }
        };

        self.inner
            .lock()
            .await
            .session
            .start(Some(user), Some(room.clone()))?;
        self.emit_state(SessionState::Connecting);

        let connected = WsTransport::connect(&ws_url).await;
        let mut guard = self.inner.lock().await;
        let (mut transport, reader) = match connected {
            Ok(pair) => pair,
            Err(err) => {
                guard.session.on_transport_closed();
                drop(guard);
                self.emit_state(SessionState::Closed);
                return Err(err.into());
            }
        };

        if let Err(err) = guard.session.on_transport_open(&mut transport) {
            transport.close();
            guard.session.on_transport_closed();
            drop(guard);
            self.emit_state(SessionState::Closed);
            return Err(err.into());
        }
        info!(room_id = room_id.0, url = %ws_url, "realtime: joined room");
        self.emit_state(SessionState::Active);
        guard.joined = true;
        guard.transport = Some(transport);
        guard.reader_task = Some(self.spawn_reader(reader));
        Ok(room)
    }

    /// Sends the draft as an encrypted chat message. A closed stream raises a
    /// [`ClientEvent::ConnectionIssue`] and keeps the draft.
    pub async fn send(&self, draft: &mut String) -> Result<SendOutcome> {
        let outcome = {
            let mut guard = self.inner.lock().await;
            let state = &mut *guard;
            match state.transport.as_mut() {
                Some(transport) => state.session.send_draft(draft, transport)?,
                None => state.session.send_draft(draft, &mut Disconnected)?,
            }
        };

        if outcome == SendOutcome::ConnectionIssue {
            let _ = self
                .events
                .send(ClientEvent::ConnectionIssue(CONNECTION_ISSUE_NOTICE.to_string()));
        }
        Ok(outcome)
    }

    /// Leaves the room over the stream and over REST, then closes the stream.
    /// The REST leave is skipped when the room was never joined. Safe to call
    /// repeatedly. Returns whether `leave_room` was sent.
    pub async fn stop(&self) -> bool {
        let (membership, had_context, leave_sent, reader_task) = {
            let mut guard = self.inner.lock().await;
            let state = &mut *guard;
            let membership = state
                .session
                .user()
                .map(|user| user.user_id)
                .zip(state.session.room().map(|room| room.id))
                .filter(|_| state.joined);
            let had_context = state.session.room().is_some();
            let leave_sent = match state.transport.as_mut() {
                Some(transport) => state.session.leave(transport),
                None => state.session.leave(&mut Disconnected),
            };
            state.transport = None;
            state.joined = false;
            (membership, had_context, leave_sent, state.reader_task.take())
        };

        if let Some(task) = reader_task {
            task.abort();
        }

        if had_context {
            self.emit_state(SessionState::Closed);
        }
        let Some((user_id, room_id)) = membership else {
            return leave_sent;
        };

        if let Err(err) = self.directory.leave_room(room_id, user_id).await {
            warn!(
                room_id = room_id.0,
                user_id = user_id.0,
                "realtime: REST leave failed: {err}"
            );
        }
        leave_sent
    }

    fn spawn_reader(self: &Arc<Self>, mut reader: WsReader) -> JoinHandle<()> {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(msg) = reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        let outcome = client.inner.lock().await.session.on_frame(&text);
                        if let FrameOutcome::Appended(message) = outcome {
                            let _ = client.events.send(ClientEvent::MessageReceived(message));
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        warn!("realtime: stream error: {err}");
                        break;
                    }
                }
            }

            let was_closed = {
                let mut guard = client.inner.lock().await;
                if let Some(transport) = guard.transport.as_ref() {
                    transport.mark_closed();
                }
                let was_closed = guard.session.state() == SessionState::Closed;
                guard.session.on_transport_closed();
                was_closed
            };
            if !was_closed {
                client.emit_state(SessionState::Closed);
            }
        })
    }

    fn emit_state(&self, state: SessionState) {
        let _ = self.events.send(ClientEvent::SessionStateChanged(state));
    }
}

#[cfg(test)]
#[path = "tests/realtime_tests.rs"]
mod tests;
