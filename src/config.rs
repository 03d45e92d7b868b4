//! Configuration loading and validation.

use crate::BackendMode;
use crate::error::{ConfigError, Result};
use std::time::Duration;

/// Default reverse-proxy endpoints, in priority order.
pub const DEFAULT_PROXY_ENDPOINTS: &[&str] = &[
    "https://gpt.pawan.krd/backend-api/conversation",
    "https://server.chatgpt.yt/api/conversation",
    "https://chat.duti.tech/api/conversation",
];

/// Relaybot configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Slack credentials and command wiring.
    pub slack: SlackConfig,

    /// AI backend credentials and selection.
    pub backend: BackendConfig,

    /// Web-search augmentation settings.
    pub search: SearchConfig,
}

/// Slack connection configuration.
#[derive(Debug, Clone)]
pub struct SlackConfig {
    /// Bot token (`xoxb-…`) for Web API calls.
    pub bot_token: String,

    /// App-level token (`xapp-…`) for Socket Mode.
    pub app_token: String,

    /// Slash command that resets session state.
    pub reset_command: String,
}

/// AI backend configuration.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// API key for the directly-authenticated backend.
    pub api_key: Option<String>,

    /// Session access token for the reverse-proxy backend.
    pub access_token: Option<String>,

    /// Per-request timeout.
    pub timeout: Duration,

    /// Mode used until a user command switches it.
    pub default_mode: BackendMode,

    /// Reverse-proxy endpoint pool, in priority order.
    pub proxy_endpoints: Vec<String>,

    /// Extra endpoint inserted ahead of the pool at startup.
    pub extra_proxy_endpoint: Option<String>,
}

/// Web-search augmentation configuration.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Brave Search API key. Augmentation degrades to a no-op without it.
    pub brave_key: Option<String>,

    /// Whether augmentation starts enabled.
    pub default_enabled: bool,
}

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> Result<Self> {
        let slack = SlackConfig {
            bot_token: require_env("RELAYBOT_SLACK_BOT_TOKEN")?,
            app_token: require_env("RELAYBOT_SLACK_APP_TOKEN")?,
            reset_command: std::env::var("RELAYBOT_RESET_COMMAND")
                .unwrap_or_else(|_| "/reset".into()),
        };

        let timeout_ms = match std::env::var("RELAYBOT_OPENAI_TIMEOUT_MS") {
            Ok(raw) => raw.parse::<u64>().map_err(|_| {
                ConfigError::Invalid(format!("RELAYBOT_OPENAI_TIMEOUT_MS is not a number: {raw}"))
            })?,
            Err(_) => 5_000,
        };

        let default_mode = match std::env::var("RELAYBOT_BACKEND_MODE") {
            Ok(raw) => raw.parse::<BackendMode>()?,
            Err(_) => BackendMode::Token,
        };

        let proxy_endpoints = match std::env::var("RELAYBOT_PROXY_ENDPOINTS") {
            Ok(raw) => parse_endpoint_list(&raw)?,
            Err(_) => DEFAULT_PROXY_ENDPOINTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        };

        let backend = BackendConfig {
            api_key: std::env::var("RELAYBOT_OPENAI_API_KEY").ok(),
            access_token: std::env::var("RELAYBOT_OPENAI_ACCESS_TOKEN").ok(),
            timeout: Duration::from_millis(timeout_ms),
            default_mode,
            proxy_endpoints,
            extra_proxy_endpoint: std::env::var("RELAYBOT_EXTRA_PROXY_ENDPOINT")
                .ok()
                .filter(|s| !s.trim().is_empty()),
        };

        let search = SearchConfig {
            brave_key: std::env::var("RELAYBOT_BRAVE_SEARCH_KEY").ok(),
            default_enabled: std::env::var("RELAYBOT_INTERNET_DEFAULT")
                .map(|raw| matches!(raw.trim(), "1" | "true" | "on"))
                .unwrap_or(false),
        };

        let config = Self {
            slack,
            backend,
            search,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot serve the default mode.
    fn validate(&self) -> std::result::Result<(), ConfigError> {
        match self.backend.default_mode {
            BackendMode::Key if self.backend.api_key.is_none() => Err(ConfigError::MissingKey(
                "RELAYBOT_OPENAI_API_KEY (required for key mode)".into(),
            )),
            BackendMode::Token if self.backend.access_token.is_none() => {
                Err(ConfigError::MissingKey(
                    "RELAYBOT_OPENAI_ACCESS_TOKEN (required for token mode)".into(),
                ))
            }
            _ => Ok(()),
        }
    }
}

fn require_env(key: &str) -> std::result::Result<String, ConfigError> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingKey(key.into()))
}

fn parse_endpoint_list(raw: &str) -> std::result::Result<Vec<String>, ConfigError> {
    let endpoints: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if endpoints.is_empty() {
        return Err(ConfigError::Invalid(
            "RELAYBOT_PROXY_ENDPOINTS must list at least one endpoint".into(),
        ));
    }
    Ok(endpoints)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_endpoint_list_trims_and_drops_empties() {
        let endpoints =
            parse_endpoint_list(" https://a/conv , ,https://b/conv ").unwrap();
        assert_eq!(endpoints, vec!["https://a/conv", "https://b/conv"]);
    }

    #[test]
    fn test_parse_endpoint_list_rejects_empty() {
        assert!(parse_endpoint_list(" , ,").is_err());
    }

    #[test]
    fn test_validate_requires_credential_for_default_mode() {
        let config = Config {
            slack: SlackConfig {
                bot_token: "xoxb-test".into(),
                app_token: "xapp-test".into(),
                reset_command: "/reset".into(),
            },
            backend: BackendConfig {
                api_key: None,
                access_token: None,
                timeout: Duration::from_millis(5_000),
                default_mode: BackendMode::Token,
                proxy_endpoints: vec!["https://a/conv".into()],
                extra_proxy_endpoint: None,
            },
            search: SearchConfig {
                brave_key: None,
                default_enabled: false,
            },
        };
        assert!(config.validate().is_err());

        let mut with_token = config.clone();
        with_token.backend.access_token = Some("sess-token".into());
        assert!(with_token.validate().is_ok());

        let mut key_mode = config;
        key_mode.backend.default_mode = BackendMode::Key;
        key_mode.backend.api_key = Some("sk-test".into());
        assert!(key_mode.validate().is_ok());
    }
}
