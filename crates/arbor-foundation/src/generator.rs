//! LLM-backed plan generator
//!
//! Decomposes an objective into delegate/tool tasks under the lazy
//! hierarchical planning policy: work that is abstract or not yet knowable
//! is emitted as a `delegate` sub-objective; only fully concrete steps may
//! become `tool` tasks.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use arbor_kernel::error::{EngineError, EngineResult};
use arbor_kernel::llm::{LlmConfig, LlmProvider};
use arbor_kernel::plan::{Plan, parser};
use arbor_kernel::planning::{CompletedTask, Planner};

const DECOMPOSE_SYSTEM_PROMPT: &str = r#"You are a planning agent inside a hierarchical task decomposition engine. Decompose the objective into an ordered JSON array of tasks.

Each task is one of:
- {"id": "<short_id>", "type": "delegate", "objective": "<sub-objective>"}
- {"id": "<short_id>", "type": "tool", "objective": "<what this does>", "tool": "<registry name>", "args": {<arguments>}}

Plan lazily:
- If a step is abstract, open-ended, or depends on information that does not exist yet, emit it as a "delegate". A dedicated sub-planner will expand it once its inputs are available.
- Only emit a "tool" task when the action is fully concrete and every argument is known right now.
- Never emit placeholder shell commands; a command you cannot write out in full belongs in a delegate.
- Order tasks so that each one's inputs are produced by earlier tasks.

Return ONLY the JSON array, no other text."#;

/// An LLM-backed implementation of the [`Planner`] trait.
pub struct LlmGenerator {
    provider: Arc<dyn LlmProvider>,
}

impl LlmGenerator {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }

    fn completed_section(completed: &[CompletedTask]) -> String {
        if completed.is_empty() {
            return "(none)".to_string();
        }
        completed
            .iter()
            .map(|c| format!("  - {}: {}", c.task_id, c.result))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl Planner for LlmGenerator {
    async fn decompose(
        &self,
        objective: &str,
        completed: &[CompletedTask],
        config: &LlmConfig,
    ) -> EngineResult<Plan> {
        let user = format!(
            "Objective:\n{}\n\nSteps already completed:\n{}",
            objective,
            Self::completed_section(completed)
        );

        let request = config.request().system(DECOMPOSE_SYSTEM_PROMPT).user(user).json();
        let response = self.provider.chat(request).await?;

        let content = response
            .content()
            .ok_or_else(|| EngineError::PlanParse("planner returned empty output".into()))?;

        let plan = parser::parse(content)?;
        debug!(tasks = plan.len(), "generated plan");
        Ok(plan)
    }
}
