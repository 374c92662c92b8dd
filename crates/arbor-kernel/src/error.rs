//! Engine error types
//!
//! Unified error handling for the decomposition engine.

use thiserror::Error;

/// Engine operation result type
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine error type
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// LLM provider transport failure (network, provider outage)
    #[error("LLM transport error: {0}")]
    Transport(String),

    /// Raw model output could not be decoded into a plan
    #[error("Plan parse error: {0}")]
    PlanParse(String),

    /// Model produced a plan with no valid tasks
    #[error("Plan contained no valid tasks")]
    EmptyPlan,

    /// Tool dispatch failed
    #[error("Tool execution failed: {tool}: {reason}")]
    ToolFailed { tool: String, reason: String },

    /// Tool is not registered
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Delegation could not spawn a child node
    #[error("Delegation failed: {0}")]
    SpawnFailed(String),

    /// Goal does not exist in the object store
    #[error("Goal not found: {0}")]
    GoalNotFound(String),

    /// Task report payload failed validation
    #[error("Invalid report: {0}")]
    InvalidReport(String),

    /// Sandbox RPC failure
    #[error("Sandbox error: {0}")]
    Sandbox(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl EngineError {
    /// Transport and sandbox failures are transient; everything else is not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Sandbox(_))
    }

    pub fn tool_failed(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ToolFailed {
            tool: tool.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io(err.to_string())
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Other(err.to_string())
    }
}
