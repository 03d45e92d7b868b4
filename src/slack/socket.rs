//! Slack Socket Mode listener.
//!
//! Owns the WebSocket connection lifecycle: `apps.connections.open`, the
//! envelope protocol (every envelope acked immediately, as the platform
//! contract requires), reconnect on `disconnect` envelopes, and filtering
//! of events the relay must never react to (its own messages, message
//! subtypes, events with no text).

use crate::error::SlackError;
use crate::slack::client::SlackClient;
use futures::{SinkExt as _, StreamExt as _};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// A chat event the router handles. Everything else is filtered out before
/// it reaches this enum.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// Plain channel or direct message.
    Message {
        channel: String,
        ts: String,
        user: String,
        text: String,
    },
    /// The bot was @-mentioned; `text` has the mention stripped.
    Mention {
        channel: String,
        ts: String,
        user: String,
        text: String,
    },
    /// Slash command, already acked at the socket layer.
    SlashCommand {
        command: String,
        channel: String,
        user: String,
    },
}

/// Socket Mode connection driver. `start` spawns the connect/reconnect loop
/// and yields the filtered event stream.
pub struct SocketModeListener {
    slack: Arc<SlackClient>,
    app_token: String,
    bot_user_id: String,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    envelope_id: Option<String>,
    #[serde(default)]
    payload: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct EventsApiPayload {
    event: PushEvent,
}

#[derive(Debug, Deserialize)]
struct PushEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommandPayload {
    command: String,
    channel_id: String,
    user_id: String,
}

impl SocketModeListener {
    pub fn new(slack: Arc<SlackClient>, app_token: String, bot_user_id: String) -> Self {
        Self {
            slack,
            app_token,
            bot_user_id,
        }
    }

    /// Spawn the connection loop; the receiver yields filtered events until
    /// the listener task ends.
    pub fn start(self) -> mpsc::Receiver<ChatEvent> {
        let (tx, rx) = mpsc::channel(256);

        tokio::spawn(async move {
            loop {
                match self.run_connection(&tx).await {
                    Ok(()) => {
                        tracing::info!("slack socket mode disconnected, reconnecting");
                    }
                    Err(error) => {
                        tracing::warn!(%error, "slack socket mode connection failed, reconnecting");
                    }
                }
                if tx.is_closed() {
                    break;
                }
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        });

        rx
    }

    /// Serve one WebSocket connection until Slack asks us to reconnect.
    async fn run_connection(&self, tx: &mpsc::Sender<ChatEvent>) -> Result<(), SlackError> {
        let url = self.slack.connections_open(&self.app_token).await?;
        let (mut socket, _) = connect_async(url.as_str())
            .await
            .map_err(|e| SlackError::Socket(e.to_string()))?;
        tracing::info!("slack socket mode connected");

        while let Some(frame) = socket.next().await {
            let frame = frame.map_err(|e| SlackError::Socket(e.to_string()))?;
            match frame {
                WsMessage::Text(raw) => {
                    let envelope: Envelope = match serde_json::from_str(raw.as_str()) {
                        Ok(envelope) => envelope,
                        Err(error) => {
                            tracing::debug!(%error, "skipping unparseable socket frame");
                            continue;
                        }
                    };

                    // Ack before any processing — Slack expects the ack
                    // promptly, independent of how long handling takes.
                    if let Some(envelope_id) = &envelope.envelope_id {
                        let ack = serde_json::json!({"envelope_id": envelope_id}).to_string();
                        socket
                            .send(WsMessage::text(ack))
                            .await
                            .map_err(|e| SlackError::Socket(e.to_string()))?;
                    }

                    match envelope.kind.as_str() {
                        "hello" => tracing::debug!("slack socket mode hello"),
                        "disconnect" => return Ok(()),
                        "events_api" | "slash_commands" => {
                            let Some(payload) = envelope.payload else {
                                continue;
                            };
                            if let Some(event) =
                                parse_envelope_payload(&envelope.kind, payload, &self.bot_user_id)
                            {
                                if tx.send(event).await.is_err() {
                                    return Ok(());
                                }
                            }
                        }
                        other => tracing::debug!(kind = other, "ignoring socket envelope"),
                    }
                }
                WsMessage::Ping(payload) => {
                    socket
                        .send(WsMessage::Pong(payload))
                        .await
                        .map_err(|e| SlackError::Socket(e.to_string()))?;
                }
                WsMessage::Close(_) => return Ok(()),
                _ => {}
            }
        }

        Ok(())
    }
}

/// Turn an envelope payload into a routed event, or None for anything the
/// relay filters out. Pure so the filtering rules are unit-testable.
fn parse_envelope_payload(
    kind: &str,
    payload: serde_json::Value,
    bot_user_id: &str,
) -> Option<ChatEvent> {
    match kind {
        "events_api" => {
            let payload: EventsApiPayload = serde_json::from_value(payload).ok()?;
            parse_push_event(payload.event, bot_user_id)
        }
        "slash_commands" => {
            let payload: CommandPayload = serde_json::from_value(payload).ok()?;
            Some(ChatEvent::SlashCommand {
                command: payload.command,
                channel: payload.channel_id,
                user: payload.user_id,
            })
        }
        _ => None,
    }
}

fn parse_push_event(event: PushEvent, bot_user_id: &str) -> Option<ChatEvent> {
    // Edits, deletes, joins and other subtypes are not user turns.
    if event.subtype.is_some() {
        return None;
    }
    let user = event.user?;
    if user == bot_user_id || event.bot_id.is_some() {
        return None;
    }
    let text = event.text.filter(|t| !t.trim().is_empty())?;
    let channel = event.channel?;
    let ts = event.ts?;

    match event.kind.as_str() {
        "message" => Some(ChatEvent::Message {
            channel,
            ts,
            user,
            text,
        }),
        "app_mention" => Some(ChatEvent::Mention {
            channel,
            ts,
            user,
            text: strip_bot_mention(&text, bot_user_id),
        }),
        _ => None,
    }
}

/// Strip the leading `<@BOT_USER_ID>` mention so the backend sees clean
/// input. Slack formats user IDs uppercase, so a prefix strip suffices.
fn strip_bot_mention(text: &str, bot_user_id: &str) -> String {
    let mention = format!("<@{bot_user_id}>");
    text.trim_start_matches(mention.as_str())
        .trim_start()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOT: &str = "U0BOT";

    fn message_payload(user: &str, text: &str) -> serde_json::Value {
        serde_json::json!({
            "event": {
                "type": "message",
                "channel": "C01",
                "ts": "1700000000.000100",
                "user": user,
                "text": text,
            }
        })
    }

    #[test]
    fn test_plain_message_is_routed() {
        let event =
            parse_envelope_payload("events_api", message_payload("U1", "hello"), BOT).unwrap();
        assert_eq!(
            event,
            ChatEvent::Message {
                channel: "C01".into(),
                ts: "1700000000.000100".into(),
                user: "U1".into(),
                text: "hello".into(),
            }
        );
    }

    #[test]
    fn test_own_messages_are_dropped() {
        assert!(parse_envelope_payload("events_api", message_payload(BOT, "hello"), BOT).is_none());
    }

    #[test]
    fn test_bot_messages_are_dropped() {
        let mut payload = message_payload("U1", "hello");
        payload["event"]["bot_id"] = "B99".into();
        assert!(parse_envelope_payload("events_api", payload, BOT).is_none());
    }

    #[test]
    fn test_subtyped_messages_are_dropped() {
        let mut payload = message_payload("U1", "hello");
        payload["event"]["subtype"] = "message_changed".into();
        assert!(parse_envelope_payload("events_api", payload, BOT).is_none());
    }

    #[test]
    fn test_empty_text_is_dropped() {
        assert!(parse_envelope_payload("events_api", message_payload("U1", "  "), BOT).is_none());
    }

    #[test]
    fn test_mention_strips_bot_tag() {
        let payload = serde_json::json!({
            "event": {
                "type": "app_mention",
                "channel": "C01",
                "ts": "1700000000.000200",
                "user": "U1",
                "text": format!("<@{BOT}> what time is it?"),
            }
        });
        let Some(ChatEvent::Mention { text, .. }) =
            parse_envelope_payload("events_api", payload, BOT)
        else {
            panic!("expected mention event");
        };
        assert_eq!(text, "what time is it?");
    }

    #[test]
    fn test_slash_command_is_routed() {
        let payload = serde_json::json!({
            "command": "/reset",
            "channel_id": "C01",
            "user_id": "U1",
            "trigger_id": "123.456",
        });
        let event = parse_envelope_payload("slash_commands", payload, BOT).unwrap();
        assert_eq!(
            event,
            ChatEvent::SlashCommand {
                command: "/reset".into(),
                channel: "C01".into(),
                user: "U1".into(),
            }
        );
    }
}
