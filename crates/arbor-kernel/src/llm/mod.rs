//! LLM interface
//!
//! The engine never talks to a provider directly; it builds a [`ChatRequest`]
//! and hands it to whichever [`LlmProvider`] implementation the host wired in.

pub mod provider;
pub mod types;

pub use provider::LlmProvider;
pub use types::{
    ChatMessage, ChatRequest, ChatResponse, LlmConfig, ResponseFormat, Role, ToolCall,
};
