use std::{collections::HashMap, fs, path::Path};

use client_core::SessionUser;
use shared::domain::UserId;

pub const CONFIG_FILE: &str = "moodlync.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub server_url: String,
    pub user_id: Option<i64>,
    pub username: Option<String>,
    pub avatar_url: Option<String>,
    pub room_id: Option<i64>,
    pub room_secret: Option<String>,
    pub participants_poll_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:5000".into(),
            user_id: None,
            username: None,
            avatar_url: None,
            room_id: None,
            room_secret: None,
            participants_poll_secs: 10,
        }
    }
}

impl Settings {
    /// The signed-in user, if both id and name are configured.
    pub fn session_user(&self) -> Option<SessionUser> {
        let user_id = self.user_id?;
        let username = self.username.as_deref()?.trim();
        if username.is_empty() {
            return None;
        }
        let mut user = SessionUser::new(UserId(user_id), username);
        user.avatar_url = self.avatar_url.clone();
        Some(user)
    }
}

pub fn load_settings() -> Settings {
    load_settings_from(Path::new(CONFIG_FILE), |key| std::env::var(key).ok())
}

/// Defaults, then `path` if it parses, then environment. Later layers win;
/// values that fail to parse are skipped.
pub fn load_settings_from(path: &Path, env: impl Fn(&str) -> Option<String>) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            for (key, value) in &file_cfg {
                settings.apply(key, value.clone());
            }
        }
    }

    for key in KEYS {
        let upper = key.to_ascii_uppercase();
        if let Some(v) = env(&format!("MOODLYNC_{upper}")) {
            settings.apply(key, v);
        }
        if let Some(v) = env(&format!("APP__{upper}")) {
            settings.apply(key, v);
        }
    }

    settings
}

const KEYS: [&str; 7] = [
    "server_url",
    "user_id",
    "username",
    "avatar_url",
    "room_id",
    "room_secret",
    "participants_poll_secs",
];

impl Settings {
    pub(crate) fn apply(&mut self, key: &str, value: String) {
        match key {
            "server_url" => self.server_url = value,
            "user_id" => {
                if let Ok(parsed) = value.trim().parse() {
                    self.user_id = Some(parsed);
                }
            }
            "username" => self.username = Some(value),
            "avatar_url" => self.avatar_url = Some(value),
            "room_id" => {
                if let Ok(parsed) = value.trim().parse() {
                    self.room_id = Some(parsed);
                }
            }
            "room_secret" => self.room_secret = Some(value),
            "participants_poll_secs" => {
                if let Ok(parsed) = value.trim().parse::<u64>() {
                    if parsed > 0 {
                        self.participants_poll_secs = parsed;
                    }
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
