//! Top-level error types for Relaybot.

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Slack(#[from] SlackError),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required config key: {0}")]
    MissingKey(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// AI backend request errors.
///
/// A timeout or HTTP failure is terminal for the request. The event router
/// rotates the proxy pool when the active mode is Token; the raw detail is
/// logged, never shown to chat users.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("backend returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("backend stream ended without a usable answer: {0}")]
    MalformedStream(String),

    #[error("missing credential for backend: {0}")]
    MissingCredential(&'static str),

    #[error("backend request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Slack Web API and Socket Mode errors.
#[derive(Debug, thiserror::Error)]
pub enum SlackError {
    #[error("slack {method} failed: {error}")]
    Api { method: &'static str, error: String },

    #[error("slack request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("slack socket mode error: {0}")]
    Socket(String),
}

/// Web search and page-fetch errors. Always recovered locally: the turn
/// proceeds with the unaugmented prompt.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("no search API key configured")]
    MissingKey,

    #[error("search API returned HTTP {status}")]
    Api { status: u16 },

    #[error("search returned no results")]
    EmptyResults,

    #[error("search request failed: {0}")]
    Request(#[from] reqwest::Error),
}
