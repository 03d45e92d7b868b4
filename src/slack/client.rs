//! Slack Web API client.

use crate::error::SlackError;
use serde::{Deserialize, Serialize};

const API_BASE: &str = "https://slack.com/api";

/// Shared Web API client. Constructed once and reused for all calls — the
/// inner reqwest client holds the connection pool.
pub struct SlackClient {
    http: reqwest::Client,
    bot_token: String,
}

/// Identity of the bot user, from `auth.test`.
#[derive(Debug, Clone, Deserialize)]
pub struct BotIdentity {
    pub user_id: String,
    #[serde(default)]
    pub bot_id: Option<String>,
}

/// Handle to a posted message: channel plus timestamp identity.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageRef {
    pub channel: String,
    pub ts: String,
}

/// Message metadata as Slack stores it on a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    pub event_type: String,
    pub event_payload: serde_json::Value,
}

/// One message from `conversations.history`, reduced to the fields the
/// relay reads.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryEntry {
    pub ts: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub metadata: Option<MessageMetadata>,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    messages: Vec<HistoryEntry>,
}

#[derive(Debug, Deserialize)]
struct ConnectionsOpenResponse {
    url: String,
}

impl SlackClient {
    pub fn new(http: reqwest::Client, bot_token: String) -> Self {
        Self { http, bot_token }
    }

    /// Resolve the bot's own user identity.
    pub async fn auth_test(&self) -> Result<BotIdentity, SlackError> {
        let value = self.call("auth.test", serde_json::json!({})).await?;
        parse_response("auth.test", value)
    }

    /// Post a new message and return its channel/ts handle.
    pub async fn post_message(&self, channel: &str, text: &str) -> Result<MessageRef, SlackError> {
        let value = self
            .call(
                "chat.postMessage",
                serde_json::json!({"channel": channel, "text": text}),
            )
            .await?;
        parse_response("chat.postMessage", value)
    }

    /// Edit a message in place, optionally attaching metadata.
    pub async fn update_message(
        &self,
        channel: &str,
        ts: &str,
        text: &str,
        metadata: Option<&MessageMetadata>,
    ) -> Result<(), SlackError> {
        let mut body = serde_json::json!({"channel": channel, "ts": ts, "text": text});
        if let Some(metadata) = metadata {
            body["metadata"] = serde_json::json!({
                "event_type": metadata.event_type,
                "event_payload": metadata.event_payload,
            });
        }
        self.call("chat.update", body).await?;
        Ok(())
    }

    /// Fetch channel history ending at `latest` (inclusive), newest first,
    /// with message metadata included.
    pub async fn history(
        &self,
        channel: &str,
        latest: &str,
        limit: u16,
    ) -> Result<Vec<HistoryEntry>, SlackError> {
        let response = self
            .http
            .get(format!("{API_BASE}/conversations.history"))
            .bearer_auth(&self.bot_token)
            .query(&[
                ("channel", channel),
                ("latest", latest),
                ("inclusive", "true"),
                ("limit", &limit.to_string()),
                ("include_all_metadata", "true"),
            ])
            .send()
            .await?;
        let value: serde_json::Value = response.json().await?;
        let value = check_ok("conversations.history", value)?;
        let history: HistoryResponse = parse_response("conversations.history", value)?;
        Ok(history.messages)
    }

    /// Open a Socket Mode connection; returns the WebSocket URL. Uses the
    /// app-level token, not the bot token.
    pub async fn connections_open(&self, app_token: &str) -> Result<String, SlackError> {
        let response = self
            .http
            .post(format!("{API_BASE}/apps.connections.open"))
            .bearer_auth(app_token)
            .send()
            .await?;
        let value: serde_json::Value = response.json().await?;
        let value = check_ok("apps.connections.open", value)?;
        let open: ConnectionsOpenResponse = parse_response("apps.connections.open", value)?;
        Ok(open.url)
    }

    async fn call(
        &self,
        method: &'static str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, SlackError> {
        let response = self
            .http
            .post(format!("{API_BASE}/{method}"))
            .bearer_auth(&self.bot_token)
            .json(&body)
            .send()
            .await?;
        let value: serde_json::Value = response.json().await?;
        check_ok(method, value)
    }
}

/// Every Web API response carries `ok`; a false `ok` names the error.
fn check_ok(
    method: &'static str,
    value: serde_json::Value,
) -> Result<serde_json::Value, SlackError> {
    if value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false) {
        Ok(value)
    } else {
        let error = value
            .get("error")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown_error")
            .to_string();
        Err(SlackError::Api { method, error })
    }
}

fn parse_response<T: serde::de::DeserializeOwned>(
    method: &'static str,
    value: serde_json::Value,
) -> Result<T, SlackError> {
    serde_json::from_value(value).map_err(|e| SlackError::Api {
        method,
        error: format!("unexpected response shape: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_ok_accepts_ok_response() {
        let value = serde_json::json!({"ok": true, "ts": "1"});
        assert!(check_ok("chat.postMessage", value).is_ok());
    }

    #[test]
    fn test_check_ok_names_the_api_error() {
        let value = serde_json::json!({"ok": false, "error": "channel_not_found"});
        let error = check_ok("chat.postMessage", value).unwrap_err();
        assert!(error.to_string().contains("channel_not_found"));
    }

    #[test]
    fn test_history_entry_parses_metadata() {
        let entry: HistoryEntry = serde_json::from_value(serde_json::json!({
            "ts": "1700000000.000100",
            "bot_id": "B01",
            "text": "answer :end:",
            "metadata": {
                "event_type": "chat_gpt",
                "event_payload": {"conversationId": "c1", "parentMessageId": "m1"}
            }
        }))
        .unwrap();
        let metadata = entry.metadata.unwrap();
        assert_eq!(metadata.event_type, "chat_gpt");
        assert_eq!(metadata.event_payload["conversationId"], "c1");
    }

    #[test]
    fn test_history_entry_tolerates_missing_metadata() {
        let entry: HistoryEntry =
            serde_json::from_value(serde_json::json!({"ts": "1", "user": "U01"})).unwrap();
        assert!(entry.metadata.is_none());
    }
}
