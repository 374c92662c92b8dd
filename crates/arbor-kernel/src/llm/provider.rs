use async_trait::async_trait;

use super::types::{ChatRequest, ChatResponse};
use crate::error::EngineResult;

/// Canonical LLM provider trait (kernel-owned).
///
/// Implementations live outside the engine (HTTP adapters, local inference,
/// deterministic test backends). A transport-level failure must surface as
/// [`EngineError::Transport`](crate::EngineError::Transport) so callers can
/// apply their retry policies.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name
    fn name(&self) -> &str;

    /// Default model
    fn default_model(&self) -> &str {
        ""
    }

    /// Chat request
    async fn chat(&self, request: ChatRequest) -> EngineResult<ChatResponse>;

    /// Health check
    async fn health_check(&self) -> EngineResult<bool> {
        Ok(true)
    }
}
