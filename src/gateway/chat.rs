//! Chat gateway implementation.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::ratelimit::{Clock, Identity, RateLimiterBackend};

/// Failure reported by a chat backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct BackendError(pub String);

/// The hosted conversational model.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Send one prompt and return the model's full answer.
    async fn complete(&self, prompt: &str) -> Result<String, BackendError>;
}

/// Errors surfaced to callers of the gateway.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The request itself is malformed
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The caller is being throttled and should retry later
    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimitExceeded { retry_after_secs: u64 },

    /// The model call failed
    #[error("Chat backend error: {0}")]
    Backend(String),
}

impl GatewayError {
    /// HTTP-style status for the error kind.
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::InvalidRequest(_) => 400,
            GatewayError::RateLimitExceeded { .. } => 429,
            GatewayError::Backend(_) => 502,
        }
    }

    pub fn is_throttled(&self) -> bool {
        matches!(self, GatewayError::RateLimitExceeded { .. })
    }
}

/// A successful model answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatReply {
    pub request_id: Uuid,
    pub user_id: Identity,
    pub content: String,
    /// Calls left before the tightest window is exhausted
    pub remaining: u64,
}

/// Flatten model output into a single clean line.
///
/// Markdown emphasis markers are dropped, line breaks become spaces and runs
/// of whitespace collapse to one.
pub fn normalize_reply(raw: &str) -> String {
    raw.replace('*', "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Guards a [`ChatBackend`] with a per-user rate limiter.
pub struct ChatGateway<B: ChatBackend> {
    limiter: Arc<dyn RateLimiterBackend>,
    backend: B,
    clock: Arc<dyn Clock>,
}

impl<B: ChatBackend> ChatGateway<B> {
    pub fn new(limiter: Arc<dyn RateLimiterBackend>, backend: B, clock: Arc<dyn Clock>) -> Self {
        Self {
            limiter,
            backend,
            clock,
        }
    }

    /// Send `message` on behalf of `user_id`.
    ///
    /// The limiter is consulted before the backend; a rejected call never
    /// reaches the model.
    #[instrument(skip(self, user_id, message), fields(user_id = %user_id, message_len = message.len()))]
    pub async fn send(&self, user_id: &str, message: &str) -> Result<ChatReply, GatewayError> {
        let identity = Identity::new(user_id)
            .map_err(|e| GatewayError::InvalidRequest(e.to_string()))?;

        let prompt = message.trim();
        if prompt.is_empty() {
            warn!("Received chat request with empty message");
            return Err(GatewayError::InvalidRequest(
                "message must not be empty".to_string(),
            ));
        }

        let now = self.clock.now();
        let decision = self.limiter.check(&identity, now);
        if !decision.admitted {
            let retry_after_secs = decision.retry_after_secs(now).unwrap_or(0);
            info!(retry_after_secs = retry_after_secs, "Chat request throttled");
            return Err(GatewayError::RateLimitExceeded { retry_after_secs });
        }

        let request_id = Uuid::new_v4();
        debug!(request_id = %request_id, "Forwarding chat request to backend");

        let raw = self.backend.complete(prompt).await.map_err(|e| {
            warn!(request_id = %request_id, error = %e, "Chat backend failed");
            GatewayError::Backend(e.to_string())
        })?;

        Ok(ChatReply {
            request_id,
            user_id: identity,
            content: normalize_reply(&raw),
            remaining: decision.remaining(),
        })
    }
}
