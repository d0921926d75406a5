//! Room-scoped symmetric encryption for chat message bodies.
//!
//! Every participant of a room derives the same key from the room id, so the
//! key never travels over the wire. Ciphertext is carried in the `message`
//! field of a `chat_message` envelope as base64(nonce || ciphertext || tag).

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    ChaCha20Poly1305, Key, Nonce,
};
use shared::domain::RoomId;
use thiserror::Error;
use zeroize::Zeroize;

pub const ROOM_KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const ROOM_KEY_INFO_PREFIX: &[u8] = b"moodlync/room-key/v1";
/// Deterministic application salt for room key derivation.
const ROOM_KEY_APP_SALT: &[u8] = b"moodlync/room-key-app-salt";

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("room key derivation failed for room {room_id}")]
    KeyDerivation { room_id: i64 },
    #[error("message encryption failed")]
    Encrypt,
    #[error("ciphertext is not valid base64")]
    Encoding,
    #[error("ciphertext too short: {len} bytes")]
    Truncated { len: usize },
    #[error("message authentication failed")]
    Decrypt,
    #[error("decrypted message is not valid utf-8")]
    Utf8,
}

pub struct RoomKey([u8; ROOM_KEY_LEN]);

impl RoomKey {
    pub fn from_bytes(bytes: [u8; ROOM_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ROOM_KEY_LEN] {
        &self.0
    }
}

impl Drop for RoomKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RoomKey(..)")
    }
}

/// Keyed encrypt/decrypt capability used by the room session.
pub trait RoomCrypto: Send + Sync {
    /// Must be a pure function of `room_id`.
    fn derive_room_key(&self, room_id: RoomId) -> Result<RoomKey, CryptoError>;
    fn encrypt(&self, plaintext: &str, key: &RoomKey) -> Result<String, CryptoError>;
    fn decrypt(&self, ciphertext: &str, key: &RoomKey) -> Result<String, CryptoError>;
}

/// HKDF-SHA256 room keys over a deployment-wide secret, ChaCha20-Poly1305
/// message sealing.
pub struct SharedSecretCrypto {
    secret: Vec<u8>,
}

impl SharedSecretCrypto {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

impl Drop for SharedSecretCrypto {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

impl RoomCrypto for SharedSecretCrypto {
    fn derive_room_key(&self, room_id: RoomId) -> Result<RoomKey, CryptoError> {
        let mut info = build_room_key_info(room_id);
        let hk = hkdf::Hkdf::<sha2::Sha256>::new(Some(ROOM_KEY_APP_SALT), &self.secret);
        let mut okm = [0u8; ROOM_KEY_LEN];
        let expanded = hk.expand(&info, &mut okm);
        info.zeroize();
        if expanded.is_err() {
            okm.zeroize();
            return Err(CryptoError::KeyDerivation { room_id: room_id.0 });
        }
        Ok(RoomKey(okm))
    }

    fn encrypt(&self, plaintext: &str, key: &RoomKey) -> Result<String, CryptoError> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let sealed = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::Encrypt)?;

        let mut framed = Vec::with_capacity(NONCE_LEN + sealed.len());
        framed.extend_from_slice(nonce.as_slice());
        framed.extend_from_slice(&sealed);
        Ok(STANDARD.encode(framed))
    }

    fn decrypt(&self, ciphertext: &str, key: &RoomKey) -> Result<String, CryptoError> {
        let framed = STANDARD
            .decode(ciphertext.trim())
            .map_err(|_| CryptoError::Encoding)?;
        if framed.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::Truncated { len: framed.len() });
        }

        let (nonce, sealed) = framed.split_at(NONCE_LEN);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
        let opened = cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| CryptoError::Decrypt)?;

        match String::from_utf8(opened) {
            Ok(plaintext) => Ok(plaintext),
            Err(err) => {
                err.into_bytes().zeroize();
                Err(CryptoError::Utf8)
            }
        }
    }
}

fn build_room_key_info(room_id: RoomId) -> Vec<u8> {
    let mut info = Vec::with_capacity(ROOM_KEY_INFO_PREFIX.len() + 1 + 8);
    info.extend_from_slice(ROOM_KEY_INFO_PREFIX);
    info.push(0);
    info.extend_from_slice(&room_id.0.to_be_bytes());
    info
}

#[cfg(test)]
#[path = "tests/crypto_tests.rs"]
mod tests;
