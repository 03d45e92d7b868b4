//! AI backend client adapter.
//!
//! One `send_message` surface over two concrete backends: the official
//! key-authenticated API and the unofficial session-token reverse proxy.
//! The adapter never retries — a Token-mode failure is reported to the
//! caller, which rotates the endpoint pool before the user's next attempt.

mod direct;
pub mod pool;
mod proxy;

pub use pool::EndpointPool;

use crate::config::BackendConfig;
use crate::error::{BackendError, ConfigError};
use crate::{Answer, BackendMode, ConversationRef};
use futures::{Stream, StreamExt as _};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::io::StreamReader;

/// Sink for growing partial answers, delivered strictly before the final
/// return value.
pub type ProgressSender = tokio::sync::mpsc::UnboundedSender<Answer>;

/// Uniform client over both backend access modes.
pub struct BackendAdapter {
    direct: Option<direct::DirectBackend>,
    proxy: Option<proxy::ProxyBackend>,
    pool: Mutex<EndpointPool>,
    timeout: Duration,
}

impl BackendAdapter {
    pub fn new(http: reqwest::Client, config: &BackendConfig) -> Result<Self, ConfigError> {
        let mut pool = EndpointPool::new(config.proxy_endpoints.iter().cloned())?;
        if let Some(extra) = &config.extra_proxy_endpoint {
            pool = pool.with_priority_endpoint(extra.clone());
        }

        Ok(Self {
            direct: config
                .api_key
                .as_ref()
                .map(|key| direct::DirectBackend::new(http.clone(), key.clone())),
            proxy: config
                .access_token
                .as_ref()
                .map(|token| proxy::ProxyBackend::new(http.clone(), token.clone())),
            pool: Mutex::new(pool),
            timeout: config.timeout,
        })
    }

    /// Send one prompt and await the completed answer, streaming partials
    /// into `progress` as they arrive. Bounded by the configured timeout.
    pub async fn send_message(
        &self,
        mode: BackendMode,
        prompt: &str,
        thread: &ConversationRef,
        progress: Option<ProgressSender>,
    ) -> Result<Answer, BackendError> {
        let timeout_ms = self.timeout.as_millis() as u64;

        let request = async {
            match mode {
                BackendMode::Key => {
                    let direct = self
                        .direct
                        .as_ref()
                        .ok_or(BackendError::MissingCredential("RELAYBOT_OPENAI_API_KEY"))?;
                    direct.send(prompt, progress.as_ref()).await
                }
                BackendMode::Token => {
                    let proxy = self.proxy.as_ref().ok_or(BackendError::MissingCredential(
                        "RELAYBOT_OPENAI_ACCESS_TOKEN",
                    ))?;
                    let endpoint = self.active_endpoint();
                    proxy.send(&endpoint, prompt, thread, progress.as_ref()).await
                }
            }
        };

        match tokio::time::timeout(self.timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout { timeout_ms }),
        }
    }

    /// The reverse-proxy endpoint Token-mode requests currently use.
    pub fn active_endpoint(&self) -> String {
        self.pool.lock().unwrap_or_else(|e| e.into_inner()).active().to_string()
    }

    /// Demote the active endpoint after a failed Token-mode request.
    /// Returns the newly-active endpoint for logging.
    pub fn rotate_proxy(&self) -> String {
        let mut pool = self.pool.lock().unwrap_or_else(|e| e.into_inner());
        pool.rotate();
        pool.active().to_string()
    }
}

/// Frame a streamed HTTP response body into lines for SSE parsing.
fn response_lines(
    response: reqwest::Response,
) -> impl Stream<Item = Result<String, LinesCodecError>> {
    let bytes = response.bytes_stream().map(|r| r.map_err(std::io::Error::other));
    FramedRead::new(
        StreamReader::new(bytes),
        LinesCodec::new_with_max_length(1024 * 1024),
    )
}

/// Read a non-2xx response body for the error, without failing if the body
/// itself cannot be read.
async fn http_error(response: reqwest::Response) -> BackendError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_else(|e| format!("<unreadable body: {e}>"));
    BackendError::Http { status, body }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;

    fn config() -> BackendConfig {
        BackendConfig {
            api_key: None,
            access_token: Some("sess".into()),
            timeout: Duration::from_millis(5_000),
            default_mode: BackendMode::Token,
            proxy_endpoints: vec!["p0".into(), "p1".into(), "p2".into()],
            extra_proxy_endpoint: None,
        }
    }

    #[test]
    fn test_rotate_proxy_cycles_active_endpoint() {
        let adapter = BackendAdapter::new(reqwest::Client::new(), &config()).unwrap();
        assert_eq!(adapter.active_endpoint(), "p0");
        assert_eq!(adapter.rotate_proxy(), "p1");
        assert_eq!(adapter.rotate_proxy(), "p2");
        assert_eq!(adapter.rotate_proxy(), "p0");
    }

    #[test]
    fn test_extra_endpoint_prepended_at_startup() {
        let mut config = config();
        config.extra_proxy_endpoint = Some("extra".into());
        let adapter = BackendAdapter::new(reqwest::Client::new(), &config).unwrap();
        assert_eq!(adapter.active_endpoint(), "extra");
    }

    #[tokio::test]
    async fn test_missing_credential_is_terminal() {
        let mut config = config();
        config.access_token = None;
        let adapter = BackendAdapter::new(reqwest::Client::new(), &config).unwrap();
        let result = adapter
            .send_message(BackendMode::Token, "hi", &ConversationRef::default(), None)
            .await;
        assert!(matches!(result, Err(BackendError::MissingCredential(_))));
    }
}
