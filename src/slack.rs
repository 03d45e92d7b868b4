//! Slack platform integration.
//!
//! Implemented directly against the Slack wire APIs: the Web API over HTTP
//! for posting, editing (with message metadata), and history, and Socket
//! Mode over WebSocket for event delivery. Message metadata round-tripping
//! (`chat.update` `metadata`, `conversations.history`
//! `include_all_metadata`) is the load-bearing feature here — it is the
//! relay's only persistence.

pub mod client;
pub mod socket;

pub use client::{BotIdentity, HistoryEntry, MessageMetadata, MessageRef, SlackClient};
pub use socket::{ChatEvent, SocketModeListener};
