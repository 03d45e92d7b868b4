//! Reverse-proxy endpoint pool with failover rotation.

use crate::error::ConfigError;
use std::collections::VecDeque;

/// Ordered pool of reverse-proxy endpoints. The head is the endpoint in use;
/// rotation demotes it to the tail. Invariant: never empty.
#[derive(Debug, Clone)]
pub struct EndpointPool {
    endpoints: VecDeque<String>,
}

impl EndpointPool {
    pub fn new<I, S>(endpoints: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let endpoints: VecDeque<String> = endpoints.into_iter().map(Into::into).collect();
        if endpoints.is_empty() {
            return Err(ConfigError::Invalid(
                "proxy endpoint pool must not be empty".into(),
            ));
        }
        Ok(Self { endpoints })
    }

    /// Insert an endpoint ahead of the current head. Startup only.
    pub fn with_priority_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoints.push_front(endpoint.into());
        self
    }

    /// The endpoint subsequent Token-mode requests should use.
    pub fn active(&self) -> &str {
        // Invariant: the pool is never empty.
        &self.endpoints[0]
    }

    /// Demote the head to the tail. Called exactly once per failed
    /// Token-mode request, never on success.
    pub fn rotate(&mut self) {
        if let Some(head) = self.endpoints.pop_front() {
            self.endpoints.push_back(head);
        }
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
