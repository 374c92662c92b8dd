//! Adversarial plan verifier
//!
//! Critiques a plan before it may execute. The verifier is infallible by
//! contract: transport exhaustion and unparseable verdicts both surface as
//! `Flawed`, so the node's revise loop always has something to react to.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use arbor_kernel::error::EngineError;
use arbor_kernel::json;
use arbor_kernel::llm::{LlmConfig, LlmProvider};
use arbor_kernel::plan::Plan;
use arbor_kernel::planning::{Critique, Verifier};
use arbor_kernel::retry::RetryPolicy;

const CRITIQUE_SYSTEM_PROMPT: &str = r#"You are an adversarial plan reviewer. You will be given an objective and a candidate plan (a JSON array of tasks).

First, argue both sides:
1. Make the strongest case that executing this plan achieves the objective.
2. Make the strongest case that it fails: missing steps, wrong ordering, steps whose inputs are produced after they run, blockers resolved too late.

Ground rules:
- Tasks of type "delegate" are intentionally unexpanded sub-objectives. They are valid placeholders; do not flag a delegate for lacking detail.
- Judge dependency ordering and blocker resolution, not style.

Then give your verdict as a single JSON object, nothing after it:
{"status": "approved", "reason": "<why the plan holds up>"}
or
{"status": "flawed", "critique": "<the decisive failure argument>"}"#;

/// How many chars of an unparseable verdict are preserved as the critique.
const RAW_CRITIQUE_LIMIT: usize = 500;

/// Retry bounds for verifier transport failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifierConfig {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    pub backoff: RetryPolicy,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            max_retries: 4,
            backoff: RetryPolicy::standard(),
        }
    }
}

/// An LLM-backed implementation of the [`Verifier`] trait.
pub struct LlmVerifier {
    provider: Arc<dyn LlmProvider>,
    config: VerifierConfig,
}

impl LlmVerifier {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            config: VerifierConfig::default(),
        }
    }

    pub fn with_config(mut self, config: VerifierConfig) -> Self {
        self.config = config;
        self
    }

    fn parse_verdict(raw: &str) -> Critique {
        let Some(verdict) = json::extract_object(raw) else {
            return Critique::flawed(truncate(raw, RAW_CRITIQUE_LIMIT));
        };
        match verdict.get("status").and_then(Value::as_str) {
            Some("approved") => {
                let reason = verdict
                    .get("reason")
                    .and_then(Value::as_str)
                    .unwrap_or("approved");
                Critique::approved(reason)
            }
            Some("flawed") => {
                let critique = verdict
                    .get("critique")
                    .or_else(|| verdict.get("reason"))
                    .and_then(Value::as_str)
                    .unwrap_or("plan rejected without critique");
                Critique::flawed(critique)
            }
            _ => Critique::flawed(truncate(raw, RAW_CRITIQUE_LIMIT)),
        }
    }
}

#[async_trait]
impl Verifier for LlmVerifier {
    async fn critique(&self, objective: &str, plan: &Plan, config: &LlmConfig) -> Critique {
        let user = format!("Objective:\n{}\n\nCandidate plan:\n{}", objective, plan.to_json());

        let mut attempt: u32 = 0;
        loop {
            let request = config
                .request()
                .system(CRITIQUE_SYSTEM_PROMPT)
                .user(user.clone())
                .json();

            let error = match self.provider.chat(request).await {
                Ok(response) => {
                    let raw = response.content().unwrap_or_default();
                    let verdict = Self::parse_verdict(raw);
                    debug!(approved = verdict.is_approved(), "verifier verdict");
                    return verdict;
                }
                Err(e) => e,
            };

            if error.is_retryable() && attempt < self.config.max_retries {
                let delay = self.config.backoff.delay_for(attempt);
                warn!(
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    %error,
                    "verifier transport failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            return Critique::flawed(format!("Verifier failed: {error}"));
        }
    }
}

fn truncate(s: &str, limit: usize) -> String {
    s.chars().take(limit).collect()
}
