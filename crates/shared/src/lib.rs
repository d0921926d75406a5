//! Wire types shared by the chat client and anything speaking its protocol.

pub mod domain;
pub mod error;
pub mod protocol;
