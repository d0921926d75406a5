//! Client side of the MoodLync premium chat rooms: envelope dispatch, room
//! membership, encrypted messaging and the participant roster.

use shared::{domain::RoomId, protocol::Participant};

pub mod api;
pub mod crypto;
pub mod message_log;
pub mod realtime;
pub mod roster;
pub mod session;
pub mod transport;

pub use api::{ApiRequestError, ChatRoomApi, RoomDirectory};
pub use crypto::{CryptoError, RoomCrypto, RoomKey, SharedSecretCrypto};
pub use message_log::{ChatMessage, MessageLog, UNDECRYPTABLE_MESSAGE};
pub use realtime::RoomClient;
pub use roster::{ParticipantRoster, RosterState, MIN_POLL_INTERVAL};
pub use session::{
    FrameOutcome, IgnoredFrame, RoomSession, SendOutcome, SessionError, SessionState, SessionUser,
};
pub use transport::{websocket_url, Transport, TransportError, WsTransport};

/// Notice raised when the user tries to send while the stream is down.
pub const CONNECTION_ISSUE_NOTICE: &str = "Connection issue… please try again";

#[derive(Debug, Clone)]
pub enum ClientEvent {
    SessionStateChanged(SessionState),
    MessageReceived(ChatMessage),
    ParticipantsUpdated {
        room_id: RoomId,
        participants: Vec<Participant>,
    },
    ParticipantsUnavailable {
        room_id: RoomId,
        message: String,
    },
    RoomUnavailable {
        room_id: RoomId,
        message: String,
    },
    ConnectionIssue(String),
}
