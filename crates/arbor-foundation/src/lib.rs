//! Arbor Foundation
//!
//! Concrete implementations of the kernel's planning capabilities: the
//! LLM-backed generator, verifier and reviser, the tool-dispatching task
//! executor, the multi-path Aletheia planner, task reporting against the
//! object store, and an in-memory store for tests and single-process runs.

pub mod aletheia;
pub mod executor;
pub mod generator;
pub mod report;
pub mod reviser;
pub mod store;
pub mod verifier;

pub use aletheia::{AletheiaOptions, AletheiaPlanner};
pub use executor::ToolTaskExecutor;
pub use generator::LlmGenerator;
pub use report::{TaskOutcome, TaskReport, submit_report};
pub use reviser::LlmReviser;
pub use store::InMemoryStore;
pub use verifier::{LlmVerifier, VerifierConfig};
