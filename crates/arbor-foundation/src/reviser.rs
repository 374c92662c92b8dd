//! Plan reviser
//!
//! Rewrites a flawed plan given the verifier's critique. Deliberately
//! conservative: any failure to produce a parseable rewrite returns the
//! original plan, and the node re-verifies under its own retry caps.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use arbor_kernel::llm::{LlmConfig, LlmProvider};
use arbor_kernel::plan::{Plan, parser};
use arbor_kernel::planning::Reviser;

const REVISE_SYSTEM_PROMPT: &str = r#"You are a plan repair agent. You will be given an objective, a plan (a JSON array of tasks), and a reviewer's critique explaining why the plan is flawed.

Rewrite the plan so the critique no longer applies. Keep the same JSON schema:
[{"id": "<short_id>", "type": "delegate"|"tool", "objective": "<text>", "tool": "<name, tool only>", "args": {<args, tool only>}}, ...]

- Preserve tasks the critique does not touch.
- Abstract or not-yet-knowable work stays "delegate"; only fully concrete steps are "tool".
- Return ONLY the corrected JSON array, no commentary, no code fences."#;

/// An LLM-backed implementation of the [`Reviser`] trait.
pub struct LlmReviser {
    provider: Arc<dyn LlmProvider>,
}

impl LlmReviser {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Reviser for LlmReviser {
    async fn fix(&self, plan: Plan, critique: &str, objective: &str, config: &LlmConfig) -> Plan {
        if critique.trim().is_empty() {
            return plan;
        }

        let user = format!(
            "Objective:\n{}\n\nFlawed plan:\n{}\n\nCritique:\n{}",
            objective,
            plan.to_json(),
            critique
        );
        let request = config.request().system(REVISE_SYSTEM_PROMPT).user(user).json();

        match self.provider.chat(request).await {
            Ok(response) => {
                let raw = response.content().unwrap_or_default();
                match parser::parse_strict(raw) {
                    Ok(revised) => revised,
                    Err(error) => {
                        warn!(%error, "revision did not parse, keeping previous plan");
                        plan
                    }
                }
            }
            Err(error) => {
                warn!(%error, "reviser call failed, keeping previous plan");
                plan
            }
        }
    }
}
