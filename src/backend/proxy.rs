//! Session-token reverse-proxy backend.
//!
//! Speaks the unofficial conversation protocol: a client-generated message
//! id, an always-present parent id (fresh uuid when starting a thread), and
//! an event stream whose events each carry the full answer text so far.

use super::{ProgressSender, http_error, response_lines};
use crate::error::BackendError;
use crate::{Answer, ConversationRef};
use futures::StreamExt as _;
use serde::Deserialize;

const MODEL: &str = "text-davinci-002-render-sha";

pub(super) struct ProxyBackend {
    http: reqwest::Client,
    access_token: String,
}

/// One conversation stream event, reduced to the fields the relay uses.
#[derive(Debug, Deserialize)]
struct ConversationEvent {
    message: Option<ConversationMessage>,
    conversation_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConversationMessage {
    id: String,
    content: Option<MessageContent>,
}

#[derive(Debug, Deserialize)]
struct MessageContent {
    #[serde(default)]
    parts: Vec<String>,
}

impl ProxyBackend {
    pub(super) fn new(http: reqwest::Client, access_token: String) -> Self {
        Self {
            http,
            access_token,
        }
    }

    pub(super) async fn send(
        &self,
        endpoint: &str,
        prompt: &str,
        thread: &ConversationRef,
        progress: Option<&ProgressSender>,
    ) -> Result<Answer, BackendError> {
        // The protocol requires a parent id even for a fresh thread.
        let parent_message_id = thread
            .parent_message_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let mut body = serde_json::json!({
            "action": "next",
            "messages": [{
                "id": uuid::Uuid::new_v4().to_string(),
                "author": {"role": "user"},
                "content": {"content_type": "text", "parts": [prompt]},
            }],
            "model": MODEL,
            "parent_message_id": parent_message_id,
        });
        if let Some(conversation_id) = &thread.conversation_id {
            body["conversation_id"] = serde_json::Value::String(conversation_id.clone());
        }

        let response = self
            .http
            .post(endpoint)
            .bearer_auth(&self.access_token)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(http_error(response).await);
        }

        let mut lines = std::pin::pin!(response_lines(response));
        let mut answer: Option<Answer> = None;

        while let Some(line) = lines.next().await {
            let line = line.map_err(|e| BackendError::MalformedStream(e.to_string()))?;
            let Some(data) = line.strip_prefix("data: ") else {
                continue;
            };
            if data.trim() == "[DONE]" {
                break;
            }
            // Moderation and metadata events interleave with message events;
            // anything that doesn't parse as a message is skipped.
            let Some(partial) = parse_conversation_event(data) else {
                continue;
            };
            if let Some(progress) = progress {
                if !partial.text.is_empty() {
                    let _ = progress.send(partial.clone());
                }
            }
            answer = Some(partial);
        }

        answer.ok_or_else(|| {
            BackendError::MalformedStream("conversation stream carried no message".into())
        })
    }
}

/// Extract the growing answer from one `data:` event, or None for events
/// that are not message-bearing.
fn parse_conversation_event(data: &str) -> Option<Answer> {
    let event: ConversationEvent = serde_json::from_str(data).ok()?;
    let message = event.message?;
    let text = message
        .content
        .and_then(|c| c.parts.into_iter().next())
        .unwrap_or_default();
    Some(Answer {
        text,
        conversation_id: event.conversation_id,
        id: Some(message.id),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_conversation_event_full() {
        let answer = parse_conversation_event(
            r#"{"message":{"id":"m1","content":{"content_type":"text","parts":["Hello the"]}},"conversation_id":"c1"}"#,
        )
        .unwrap();
        assert_eq!(answer.text, "Hello the");
        assert_eq!(answer.conversation_id.as_deref(), Some("c1"));
        assert_eq!(answer.id.as_deref(), Some("m1"));
    }

    #[test]
    fn test_parse_conversation_event_skips_non_message_events() {
        assert!(parse_conversation_event(r#"{"moderation_response":{"flagged":false}}"#).is_none());
        assert!(parse_conversation_event("not json").is_none());
    }

    #[test]
    fn test_parse_conversation_event_tolerates_missing_parts() {
        let answer =
            parse_conversation_event(r#"{"message":{"id":"m1"},"conversation_id":null}"#).unwrap();
        assert_eq!(answer.text, "");
        assert!(answer.conversation_id.is_none());
    }
}
