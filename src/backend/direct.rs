//! Directly-authenticated official completions backend.

use super::{ProgressSender, http_error, response_lines};
use crate::Answer;
use crate::error::BackendError;
use futures::StreamExt as _;
use serde::Deserialize;

const COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";
const MODEL: &str = "gpt-3.5-turbo";

/// Key-authenticated backend. Stateless per request: the official API keeps
/// no server-side conversation tree, so thread identifiers are not sent.
pub(super) struct DirectBackend {
    http: reqwest::Client,
    api_key: String,
}

/// One streamed completion chunk, reduced to the fields the relay uses.
#[derive(Debug, Deserialize)]
struct CompletionChunk {
    id: Option<String>,
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    delta: CompletionDelta,
}

#[derive(Debug, Default, Deserialize)]
struct CompletionDelta {
    content: Option<String>,
}

impl DirectBackend {
    pub(super) fn new(http: reqwest::Client, api_key: String) -> Self {
        Self { http, api_key }
    }

    pub(super) async fn send(
        &self,
        prompt: &str,
        progress: Option<&ProgressSender>,
    ) -> Result<Answer, BackendError> {
        let body = serde_json::json!({
            "model": MODEL,
            "stream": true,
            "messages": [{"role": "user", "content": prompt}],
        });

        let response = self
            .http
            .post(COMPLETIONS_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(http_error(response).await);
        }

        let mut lines = std::pin::pin!(response_lines(response));
        let mut answer = Answer::default();
        let mut saw_chunk = false;

        while let Some(line) = lines.next().await {
            let line = line.map_err(|e| BackendError::MalformedStream(e.to_string()))?;
            let Some(data) = line.strip_prefix("data: ") else {
                continue;
            };
            if data.trim() == "[DONE]" {
                break;
            }
            let Some(chunk) = parse_completion_chunk(data) else {
                tracing::debug!(data, "skipping unparseable completion chunk");
                continue;
            };
            saw_chunk = true;
            if answer.id.is_none() {
                answer.id = chunk.id;
            }
            if let Some(delta) = chunk.choices.into_iter().next().and_then(|c| c.delta.content) {
                answer.text.push_str(&delta);
                if let Some(progress) = progress {
                    let _ = progress.send(answer.clone());
                }
            }
        }

        if !saw_chunk {
            return Err(BackendError::MalformedStream(
                "completion stream carried no chunks".into(),
            ));
        }

        Ok(answer)
    }
}

fn parse_completion_chunk(data: &str) -> Option<CompletionChunk> {
    serde_json::from_str(data).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_completion_chunk_extracts_delta() {
        let chunk = parse_completion_chunk(
            r#"{"id":"chatcmpl-1","choices":[{"delta":{"content":"Hel"},"index":0}]}"#,
        )
        .unwrap();
        assert_eq!(chunk.id.as_deref(), Some("chatcmpl-1"));
        assert_eq!(
            chunk.choices[0].delta.content.as_deref(),
            Some("Hel")
        );
    }

    #[test]
    fn test_parse_completion_chunk_tolerates_empty_delta() {
        let chunk = parse_completion_chunk(
            r#"{"id":"chatcmpl-1","choices":[{"delta":{},"finish_reason":"stop"}]}"#,
        )
        .unwrap();
        assert!(chunk.choices[0].delta.content.is_none());
    }

    #[test]
    fn test_parse_completion_chunk_rejects_garbage() {
        assert!(parse_completion_chunk("not json").is_none());
    }
}
