//! Conversation thread continuity.
//!
//! Not a database: the channel-local thread position is recovered by reading
//! the metadata on the bot's most recent reply in the channel, and persisted
//! by stamping the same metadata onto the current reply as it is edited.
//! Losing the metadata (message deleted, never written) silently resets the
//! thread. The mention path keeps a process-local position instead, cleared
//! by the explicit `reset` command.

use crate::error::SlackError;
use crate::slack::{HistoryEntry, MessageMetadata, SlackClient};
use crate::{Answer, ConversationRef};
use std::sync::Arc;
use std::sync::Mutex;

/// The metadata event type this relay owns on Slack messages.
pub const METADATA_EVENT_TYPE: &str = "chat_gpt";

/// Derived store for channel-local conversation positions.
pub struct ThreadStore {
    slack: Arc<SlackClient>,
}

impl ThreadStore {
    pub fn new(slack: Arc<SlackClient>) -> Self {
        Self { slack }
    }

    /// Recover the conversation position for a turn triggered by the message
    /// at `latest_ts`: the immediately preceding message's metadata, or the
    /// empty ref when there is none. A failed history call is fatal to the
    /// turn and propagates.
    pub async fn recover(
        &self,
        channel: &str,
        latest_ts: &str,
    ) -> Result<ConversationRef, SlackError> {
        let entries = self.slack.history(channel, latest_ts, 2).await?;
        Ok(recover_from_entries(&entries))
    }

    /// Metadata payload stamped onto every edit of the reply message — the
    /// only write path for conversation continuity.
    pub fn stamp(answer: &Answer) -> MessageMetadata {
        MessageMetadata {
            event_type: METADATA_EVENT_TYPE.into(),
            event_payload: serde_json::to_value(answer.thread_ref())
                .unwrap_or(serde_json::Value::Null),
        }
    }
}

/// History arrives newest first with the triggering message included, so the
/// preceding message is entry [1]. Anything missing or malformed means a
/// fresh conversation.
fn recover_from_entries(entries: &[HistoryEntry]) -> ConversationRef {
    let Some(previous) = entries.get(1) else {
        return ConversationRef::default();
    };
    let Some(metadata) = &previous.metadata else {
        return ConversationRef::default();
    };
    if metadata.event_type != METADATA_EVENT_TYPE {
        return ConversationRef::default();
    }
    serde_json::from_value(metadata.event_payload.clone()).unwrap_or_default()
}

/// Process-local thread position for the mention path, which does not read
/// message metadata.
#[derive(Default)]
pub struct MentionThread {
    inner: Mutex<ConversationRef>,
}

impl MentionThread {
    pub fn current(&self) -> ConversationRef {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Adopt the identifiers the answer carries, keeping whichever field it
    /// omits.
    pub fn record(&self, answer: &Answer) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(conversation_id) = &answer.conversation_id {
            guard.conversation_id = Some(conversation_id.clone());
        }
        if let Some(id) = &answer.id {
            guard.parent_message_id = Some(id.clone());
        }
    }

    pub fn reset(&self) {
        *self.inner.lock().unwrap_or_else(|e| e.into_inner()) = ConversationRef::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(ts: &str, metadata: Option<serde_json::Value>) -> HistoryEntry {
        serde_json::from_value(serde_json::json!({
            "ts": ts,
            "bot_id": "B01",
            "metadata": metadata,
        }))
        .unwrap()
    }

    #[test]
    fn test_recover_uses_preceding_message_metadata() {
        let entries = vec![
            entry("2.000", None),
            entry(
                "1.000",
                Some(serde_json::json!({
                    "event_type": "chat_gpt",
                    "event_payload": {"conversationId": "c1", "parentMessageId": "m1"},
                })),
            ),
        ];
        let reference = recover_from_entries(&entries);
        assert_eq!(reference.conversation_id.as_deref(), Some("c1"));
        assert_eq!(reference.parent_message_id.as_deref(), Some("m1"));
    }

    #[test]
    fn test_recover_without_prior_message_is_empty() {
        assert!(recover_from_entries(&[entry("2.000", None)]).is_empty());
        assert!(recover_from_entries(&[]).is_empty());
    }

    #[test]
    fn test_recover_without_metadata_is_empty() {
        let entries = vec![entry("2.000", None), entry("1.000", None)];
        assert!(recover_from_entries(&entries).is_empty());
    }

    #[test]
    fn test_recover_ignores_foreign_event_types() {
        let entries = vec![
            entry("2.000", None),
            entry(
                "1.000",
                Some(serde_json::json!({
                    "event_type": "task_created",
                    "event_payload": {"conversationId": "c1"},
                })),
            ),
        ];
        assert!(recover_from_entries(&entries).is_empty());
    }

    #[test]
    fn test_recover_malformed_payload_is_empty() {
        let entries = vec![
            entry("2.000", None),
            entry(
                "1.000",
                Some(serde_json::json!({
                    "event_type": "chat_gpt",
                    "event_payload": "not an object",
                })),
            ),
        ];
        assert!(recover_from_entries(&entries).is_empty());
    }

    #[test]
    fn test_stamp_carries_answer_identifiers() {
        let answer = Answer {
            text: "hello".into(),
            conversation_id: Some("c1".into()),
            id: Some("m1".into()),
        };
        let metadata = ThreadStore::stamp(&answer);
        assert_eq!(metadata.event_type, METADATA_EVENT_TYPE);
        assert_eq!(
            metadata.event_payload,
            serde_json::json!({"conversationId": "c1", "parentMessageId": "m1"})
        );
    }

    #[test]
    fn test_mention_thread_record_keeps_missing_fields() {
        let thread = MentionThread::default();
        thread.record(&Answer {
            text: String::new(),
            conversation_id: Some("c1".into()),
            id: Some("m1".into()),
        });
        thread.record(&Answer {
            text: String::new(),
            conversation_id: None,
            id: Some("m2".into()),
        });
        let current = thread.current();
        assert_eq!(current.conversation_id.as_deref(), Some("c1"));
        assert_eq!(current.parent_message_id.as_deref(), Some("m2"));
    }

    #[test]
    fn test_mention_thread_reset_is_idempotent() {
        let thread = MentionThread::default();
        thread.record(&Answer {
            text: String::new(),
            conversation_id: Some("c1".into()),
            id: Some("m1".into()),
        });
        thread.reset();
        let once = thread.current();
        thread.reset();
        let twice = thread.current();
        assert!(once.is_empty());
        assert_eq!(once, twice);
    }
}
