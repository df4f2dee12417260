//! Deep Agents Protocol
//!
//! Shared types for the agent session channel and the request/response API.
//! Channel frames are serialized as JSON over WebSocket.

use uuid::Uuid;

// Re-exports
pub mod client;
pub mod server;
pub mod types;

pub use client::ChannelCommand;
pub use server::ChannelEvent;
pub use types::*;

/// Prefix of every per-session channel name
pub const CHANNEL_PREFIX: &str = "agent_session_";

/// Channel a session's events are published on
pub fn channel_name(session_id: &str) -> String {
    format!("{CHANNEL_PREFIX}{session_id}")
}

/// Generate a new unique ID
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
