use chrono::{DateTime, Utc};
use shared::domain::UserId;

/// Content substituted when a message cannot be decrypted with the room key.
pub const UNDECRYPTABLE_MESSAGE: &str = "🔒 [Encrypted message - unable to decrypt]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Generated locally on receipt; not a server identifier.
    pub id: String,
    pub user_id: UserId,
    pub username: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub avatar_url: Option<String>,
}

/// Messages of the open room in arrival order.
#[derive(Debug, Default, Clone)]
pub struct MessageLog {
    entries: Vec<ChatMessage>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, message: ChatMessage) -> &ChatMessage {
        self.entries.push(message);
        &self.entries[self.entries.len() - 1]
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChatMessage> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.entries.last()
    }

    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.entries.clone()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}
