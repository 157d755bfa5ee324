//! Outbound side of the chat-session client.

pub mod port;
pub mod types;
