//! Bearer token sources for outbound calls

use async_trait::async_trait;

use crate::core::error::{BrokerError, BrokerResult};

/// Supplies the bearer token attached to every upstream request
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn bearer_token(&self) -> BrokerResult<String>;
}

/// A fixed token read from configuration
#[derive(Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for StaticTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokenProvider")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn bearer_token(&self) -> BrokerResult<String> {
        if self.token.trim().is_empty() {
            return Err(BrokerError::config("No bearer token configured"));
        }
        Ok(self.token.clone())
    }
}
