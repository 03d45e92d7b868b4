//! Relaybot: a Slack bridge to a conversational-AI backend.
//!
//! Conversation continuity is round-tripped through Slack message metadata
//! instead of a database, streamed answers are edited into the reply message
//! at a bounded rate, and the unofficial reverse-proxy backend fails over by
//! rotating through a pool of relay endpoints.

pub mod backend;
pub mod config;
pub mod error;
pub mod router;
pub mod search;
pub mod slack;
pub mod streamer;
pub mod thread;

pub use error::{Error, Result};

use serde::{Deserialize, Serialize};

/// Position within the backend's server-side conversation tree.
///
/// Serialized camelCase because it is the wire schema carried in Slack
/// message metadata (`event_payload`). Both fields absent means "start a
/// new conversation".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_message_id: Option<String>,
}

impl ConversationRef {
    /// True when neither identifier is present — a fresh conversation.
    pub fn is_empty(&self) -> bool {
        self.conversation_id.is_none() && self.parent_message_id.is_none()
    }
}

/// One answer from the AI backend.
///
/// Intermediate streamed forms share the same identity with growing `text`;
/// `id` becomes the next turn's `parent_message_id`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub text: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Answer {
    /// The conversation position a follow-up turn should continue from.
    pub fn thread_ref(&self) -> ConversationRef {
        ConversationRef {
            conversation_id: self.conversation_id.clone(),
            parent_message_id: self.id.clone(),
        }
    }
}

/// Which concrete backend the adapter talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendMode {
    /// Directly-authenticated official API.
    Key,
    /// Session-token reverse-proxy API with endpoint rotation.
    Token,
}

impl std::str::FromStr for BackendMode {
    type Err = error::ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "key" => Ok(BackendMode::Key),
            "token" => Ok(BackendMode::Token),
            other => Err(error::ConfigError::Invalid(format!(
                "unknown backend mode: {other} (expected \"key\" or \"token\")"
            ))),
        }
    }
}

impl std::fmt::Display for BackendMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendMode::Key => write!(f, "key"),
            BackendMode::Token => write!(f, "token"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_mode_from_str() {
        assert_eq!("key".parse::<BackendMode>().unwrap(), BackendMode::Key);
        assert_eq!("TOKEN".parse::<BackendMode>().unwrap(), BackendMode::Token);
        assert_eq!(" Key ".parse::<BackendMode>().unwrap(), BackendMode::Key);
        assert!("proxy".parse::<BackendMode>().is_err());
    }

    #[test]
    fn test_conversation_ref_round_trip() {
        let reference = ConversationRef {
            conversation_id: Some("c1".into()),
            parent_message_id: Some("m1".into()),
        };
        let json = serde_json::to_value(&reference).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"conversationId": "c1", "parentMessageId": "m1"})
        );
        let back: ConversationRef = serde_json::from_value(json).unwrap();
        assert_eq!(back, reference);
    }

    #[test]
    fn test_empty_ref_serializes_without_fields() {
        let json = serde_json::to_value(ConversationRef::default()).unwrap();
        assert_eq!(json, serde_json::json!({}));
    }

    #[test]
    fn test_answer_thread_ref_uses_answer_id_as_parent() {
        let answer = Answer {
            text: "hi".into(),
            conversation_id: Some("c1".into()),
            id: Some("m1".into()),
        };
        let reference = answer.thread_ref();
        assert_eq!(reference.conversation_id.as_deref(), Some("c1"));
        assert_eq!(reference.parent_message_id.as_deref(), Some("m1"));
    }
}
