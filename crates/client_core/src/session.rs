//! Membership state machine for one open chat room.
//!
//! The session is transport-agnostic: every operation that emits frames takes
//! the outbound [`Transport`] by reference, so the owner decides how frames
//! reach the wire and the state machine stays synchronous.

use std::sync::Arc;

use chrono::Utc;
use shared::{
    domain::UserId,
    error::ProtocolError,
    protocol::{decode_envelope, encode_envelope, ChatEnvelope, ChatRoom, Envelope},
};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    crypto::{CryptoError, RoomCrypto},
    message_log::{ChatMessage, MessageLog, UNDECRYPTABLE_MESSAGE},
    transport::Transport,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Registered,
    Joined,
    Active,
    Closed,
}

impl SessionState {
    /// `Joined` and `Active` are the same operating state; membership is
    /// assumed as soon as `join_room` has been sent.
    pub fn is_operating(self) -> bool {
        matches!(self, SessionState::Joined | SessionState::Active)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub user_id: UserId,
    pub username: String,
    pub avatar_url: Option<String>,
}

impl SessionUser {
    pub fn new(user_id: UserId, username: impl Into<String>) -> Self {
        Self {
            user_id,
            username: username.into(),
            avatar_url: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no authenticated user")]
    MissingUser,
    #[error("room metadata not loaded")]
    MissingRoom,
    #[error("session already started (state {0:?})")]
    AlreadyStarted(SessionState),
    #[error("transport opened while session was {0:?}")]
    UnexpectedOpen(SessionState),
    #[error("failed to encrypt message: {0}")]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoredFrame {
    Malformed,
    UnknownType,
    OtherRoom,
    Control,
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    Appended(ChatMessage),
    Ignored(IgnoredFrame),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// Empty draft or no room session; nothing happened.
    Ignored,
    /// Transport was not open. The draft is kept and nothing is queued.
    ConnectionIssue,
}

struct SessionContext {
    user: SessionUser,
    room: ChatRoom,
}

pub struct RoomSession {
    crypto: Arc<dyn RoomCrypto>,
    state: SessionState,
    context: Option<SessionContext>,
    log: MessageLog,
}

impl RoomSession {
    pub fn new(crypto: Arc<dyn RoomCrypto>) -> Self {
        Self {
            crypto,
            state: SessionState::Idle,
            context: None,
            log: MessageLog::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn room(&self) -> Option<&ChatRoom> {
        self.context.as_ref().map(|ctx| &ctx.room)
    }

    pub fn user(&self) -> Option<&SessionUser> {
        self.context.as_ref().map(|ctx| &ctx.user)
    }

    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    /// `Idle -> Connecting`. Both the user and the room metadata must be
    /// available, otherwise the session stays idle.
    pub fn start(
        &mut self,
        user: Option<SessionUser>,
        room: Option<ChatRoom>,
    ) -> Result<(), SessionError> {
        if self.state != SessionState::Idle {
            return Err(SessionError::AlreadyStarted(self.state));
        }
        let user = user.ok_or(SessionError::MissingUser)?;
        let room = room.ok_or(SessionError::MissingRoom)?;

        info!(
            room_id = room.id.0,
            user_id = user.user_id.0,
            "room session: connecting"
        );
        self.context = Some(SessionContext { user, room });
        self.state = SessionState::Connecting;
        Ok(())
    }

    /// Sends `register` then `join_room` and treats membership as confirmed.
    pub fn on_transport_open(&mut self, transport: &mut dyn Transport) -> Result<(), SessionError> {
        let Some(ctx) = self.context.as_ref() else {
            return Err(SessionError::UnexpectedOpen(self.state));
        };
        if self.state != SessionState::Connecting {
            return Err(SessionError::UnexpectedOpen(self.state));
        }

        let register = encode_envelope(&Envelope::Register {
            user_id: ctx.user.user_id,
            emotion: ctx.room.emotion.clone(),
        })?;
        let join = encode_envelope(&Envelope::JoinRoom {
            user_id: ctx.user.user_id,
            room_id: ctx.room.id,
        })?;
        let room_id = ctx.room.id;

        send_control(transport, "register", register);
        self.state = SessionState::Registered;
        send_control(transport, "join_room", join);
        self.state = SessionState::Joined;

        self.state = SessionState::Active;
        info!(room_id = room_id.0, "room session: active");
        Ok(())
    }

    /// Dispatches one incoming text frame. Nothing here is fatal to the
    /// session.
    pub fn on_frame(&mut self, frame: &str) -> FrameOutcome {
        let active_room = match self.context.as_ref() {
            Some(ctx) if self.state.is_operating() => ctx.room.id,
            _ => return FrameOutcome::Ignored(IgnoredFrame::Inactive),
        };

        let chat = match decode_envelope(frame) {
            Ok(Envelope::ChatMessage(chat)) => chat,
            Ok(Envelope::Unknown) => {
                debug!("room session: ignoring envelope of unknown type");
                return FrameOutcome::Ignored(IgnoredFrame::UnknownType);
            }
            Ok(other) => {
                debug!(kind = other.kind(), "room session: ignoring control envelope");
                return FrameOutcome::Ignored(IgnoredFrame::Control);
            }
            Err(err) => {
                debug!("room session: dropping frame: {err}");
                return FrameOutcome::Ignored(IgnoredFrame::Malformed);
            }
        };

        if chat.room_id != active_room {
            debug!(
                room_id = chat.room_id.0,
                active_room_id = active_room.0,
                "room session: discarding message for another room"
            );
            return FrameOutcome::Ignored(IgnoredFrame::OtherRoom);
        }

        let content = if chat.encrypted {
            self.decrypt_content(&chat)
        } else {
            chat.message
        };

        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            user_id: chat.user_id,
            username: chat.username,
            content,
            timestamp: chat.timestamp.unwrap_or_else(Utc::now),
            avatar_url: chat.avatar_url,
        };
        FrameOutcome::Appended(self.log.append(message).clone())
    }

    /// Encrypts and sends the trimmed draft. The draft is cleared only when a
    /// frame was handed to the transport; the message itself shows up in the
    /// log once the server reflects it back.
    pub fn send_draft(
        &mut self,
        draft: &mut String,
        transport: &mut dyn Transport,
    ) -> Result<SendOutcome, SessionError> {
        let text = draft.trim();
        if text.is_empty() {
            return Ok(SendOutcome::Ignored);
        }
        let Some(ctx) = self.context.as_ref() else {
            return Ok(SendOutcome::Ignored);
        };
        if !transport.is_open() || !self.state.is_operating() {
            warn!(
                room_id = ctx.room.id.0,
                "room session: send attempted while transport is not open"
            );
            return Ok(SendOutcome::ConnectionIssue);
        }

        let key = self.crypto.derive_room_key(ctx.room.id)?;
        let ciphertext = self.crypto.encrypt(text, &key)?;
        let frame = encode_envelope(&Envelope::ChatMessage(ChatEnvelope {
            room_id: ctx.room.id,
            user_id: ctx.user.user_id,
            username: ctx.user.username.clone(),
            message: ciphertext,
            encrypted: true,
            room_emotion: Some(ctx.room.emotion.clone()),
            timestamp: None,
            avatar_url: ctx.user.avatar_url.clone(),
        }))?;

        if let Err(err) = transport.send_text(frame) {
            warn!(room_id = ctx.room.id.0, "room session: send failed: {err}");
            return Ok(SendOutcome::ConnectionIssue);
        }
        draft.clear();
        Ok(SendOutcome::Sent)
    }

    /// Tears the session down. `leave_room` goes out only if the transport is
    /// still open; calling this again is a no-op. Returns whether `leave_room`
    /// was sent.
    pub fn leave(&mut self, transport: &mut dyn Transport) -> bool {
        let Some(ctx) = self.context.take() else {
            return false;
        };

        let mut sent = false;
        if transport.is_open() {
            match encode_envelope(&Envelope::LeaveRoom {
                user_id: ctx.user.user_id,
                room_id: ctx.room.id,
            }) {
                Ok(frame) => sent = transport.send_text(frame).is_ok(),
                Err(err) => warn!("room session: failed to encode leave_room: {err}"),
            }
        }
        transport.close();

        self.state = SessionState::Closed;
        self.log.clear();
        info!(room_id = ctx.room.id.0, leave_sent = sent, "room session: closed");
        sent
    }

    /// Connection lost. No reconnect is attempted; the log stays readable
    /// until [`RoomSession::leave`].
    pub fn on_transport_closed(&mut self) {
        if self.state != SessionState::Closed {
            info!(previous = ?self.state, "room session: transport closed");
            self.state = SessionState::Closed;
        }
    }

    fn decrypt_content(&self, chat: &ChatEnvelope) -> String {
        let opened = self
            .crypto
            .derive_room_key(chat.room_id)
            .and_then(|key| self.crypto.decrypt(&chat.message, &key));
        match opened {
            Ok(plaintext) => plaintext,
            Err(err) => {
                warn!(
                    room_id = chat.room_id.0,
                    user_id = chat.user_id.0,
                    "room session: undecryptable message: {err}"
                );
                UNDECRYPTABLE_MESSAGE.to_string()
            }
        }
    }
}

fn send_control(transport: &mut dyn Transport, kind: &str, frame: String) {
    if let Err(err) = transport.send_text(frame) {
        warn!("room session: {kind} not sent: {err}");
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
