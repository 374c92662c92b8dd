//! Aletheia multi-path planner
//!
//! Single-shot planning service independent of the node tree: fan out N
//! candidate plans, refine each concurrently through a bounded verify/revise
//! loop with sandboxed fact-checking, then select the winner. Refinement
//! paths are fully independent; a path that crashes or exceeds its soft
//! deadline is dropped rather than failing the run.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use arbor_kernel::error::{EngineError, EngineResult};
use arbor_kernel::json;
use arbor_kernel::llm::{LlmConfig, LlmProvider};
use arbor_kernel::sandbox::{SandboxHandle, SandboxManager};

const PLANS_SYSTEM_PROMPT: &str = r#"You are a strategic planner. Produce several genuinely different candidate plans for the objective — different orderings, different tools, different decompositions. Each plan is a short free-text description of the steps to take.

Return ONLY a JSON object of the form:
{"plans": ["<plan one>", "<plan two>", ...]}"#;

const VERIFY_SYSTEM_PROMPT: &str = r#"You are a skeptical reviewer fact-checking a candidate plan against a real workspace. You are given the objective, the plan, and a listing of files present in the workspace. Check the plan's assumptions against that listing: files it reads must exist, steps must come in a workable order, and blockers must be resolved before the steps that depend on them. Abstract steps that defer detail to a later planner are acceptable.

Return ONLY a JSON object of the form:
{"approved": true|false, "feedback": "<what is wrong, or why it holds up>"}"#;

const REVISE_SYSTEM_PROMPT: &str = r#"You are repairing a candidate plan. You are given the objective, the current plan, and reviewer feedback. Rewrite the plan so the feedback no longer applies, keeping everything the feedback does not touch.

Return ONLY the revised plan text, no commentary."#;

const SELECT_SYSTEM_PROMPT: &str = r#"You are choosing the single best plan from a set of verified candidates. Weigh directness, robustness, and how well each plan fits the objective.

Return ONLY a JSON object of the form:
{"selected": <1-based number of the winning plan>}"#;

/// Hard ceiling on per-path refinement iterations.
const MAX_ITERATIONS_CEILING: u32 = 6;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AletheiaOptions {
    /// Number of candidate plans to fan out (also the concurrency bound).
    pub num_plans: usize,
    /// Verify/revise iterations per path, clamped to 6.
    pub max_iterations: u32,
    /// Soft per-path deadline.
    pub path_timeout: Duration,
    /// Workspace files surfaced to the verifier prompt.
    pub listing_limit: usize,
}

impl Default for AletheiaOptions {
    fn default() -> Self {
        Self {
            num_plans: 3,
            max_iterations: 3,
            path_timeout: Duration::from_secs(600),
            listing_limit: 60,
        }
    }
}

impl AletheiaOptions {
    pub fn with_num_plans(mut self, n: usize) -> Self {
        self.num_plans = n.max(1);
        self
    }

    pub fn with_max_iterations(mut self, iterations: u32) -> Self {
        self.max_iterations = iterations;
        self
    }

    pub fn with_path_timeout(mut self, timeout: Duration) -> Self {
        self.path_timeout = timeout;
        self
    }

    fn effective_iterations(&self) -> u32 {
        self.max_iterations.clamp(1, MAX_ITERATIONS_CEILING)
    }
}

/// State of one candidate plan during fan-out.
#[derive(Debug, Clone)]
pub struct AletheiaPath {
    pub plan_text: String,
    pub iterations_left: u32,
    pub last_critique: Option<String>,
}

/// Verdict of one sandboxed fact-check.
#[derive(Debug, Clone)]
struct PathVerdict {
    approved: bool,
    feedback: String,
}

#[derive(Clone)]
pub struct AletheiaPlanner {
    provider: Arc<dyn LlmProvider>,
    sandbox: Arc<dyn SandboxManager>,
    llm: LlmConfig,
    opts: AletheiaOptions,
}

impl AletheiaPlanner {
    pub fn new(provider: Arc<dyn LlmProvider>, sandbox: Arc<dyn SandboxManager>) -> Self {
        Self {
            provider,
            sandbox,
            llm: LlmConfig::default(),
            opts: AletheiaOptions::default(),
        }
    }

    pub fn with_llm_config(mut self, llm: LlmConfig) -> Self {
        self.llm = llm;
        self
    }

    pub fn with_options(mut self, opts: AletheiaOptions) -> Self {
        self.opts = opts;
        self
    }

    /// Run the full fan-out: generate, refine concurrently, select.
    pub async fn plan(&self, objective: &str, base: &SandboxHandle) -> EngineResult<String> {
        let candidates = self.generate_candidates(objective).await?;
        info!(candidates = candidates.len(), "aletheia fan-out starting");

        let mut handles = Vec::with_capacity(candidates.len());
        for (index, plan_text) in candidates.into_iter().enumerate() {
            let planner = self.clone();
            let objective = objective.to_string();
            let base = base.clone();
            handles.push(tokio::spawn(async move {
                let refined = tokio::time::timeout(
                    planner.opts.path_timeout,
                    planner.refine_path(&objective, &base, plan_text),
                )
                .await;
                (index, refined)
            }));
        }

        let mut survivors: Vec<(usize, AletheiaPath)> = Vec::new();
        for result in join_all(handles).await {
            match result {
                Ok((index, Ok(Ok(path)))) => survivors.push((index, path)),
                Ok((index, Ok(Err(error)))) => {
                    warn!(path = index, %error, "refinement path dropped");
                }
                Ok((index, Err(_))) => {
                    warn!(path = index, "refinement path timed out");
                }
                Err(join_error) => {
                    warn!(%join_error, "refinement path crashed");
                }
            }
        }
        survivors.sort_by_key(|(index, _)| *index);

        if survivors.is_empty() {
            return Err(EngineError::Other(
                "All planning paths failed verification".into(),
            ));
        }

        let refined: Vec<AletheiaPath> = survivors.into_iter().map(|(_, p)| p).collect();
        self.select_winner(objective, &refined).await
    }

    // -----------------------------------------------------------------------
    // Candidate generation
    // -----------------------------------------------------------------------

    async fn generate_candidates(&self, objective: &str) -> EngineResult<Vec<String>> {
        let n = self.opts.num_plans.max(1);
        let user = format!("Objective:\n{objective}\n\nProduce {n} distinct plans.");
        let request = self
            .llm
            .request()
            .system(PLANS_SYSTEM_PROMPT)
            .user(user)
            .json();
        let response = self.provider.chat(request).await?;
        let raw = response.content().unwrap_or_default();

        let mut plans = parse_candidate_plans(raw);
        dedupe_in_place(&mut plans);
        plans.truncate(n);

        if plans.is_empty() {
            return Err(EngineError::PlanParse(
                "no candidate plans in planner output".into(),
            ));
        }
        Ok(plans)
    }

    // -----------------------------------------------------------------------
    // Per-path refinement
    // -----------------------------------------------------------------------

    async fn refine_path(
        &self,
        objective: &str,
        base: &SandboxHandle,
        plan_text: String,
    ) -> EngineResult<AletheiaPath> {
        let mut path = AletheiaPath {
            plan_text,
            iterations_left: self.opts.effective_iterations(),
            last_critique: None,
        };

        while path.iterations_left > 0 {
            path.iterations_left -= 1;

            let overlay = self.sandbox.branch(base).await?;
            let listing = self
                .sandbox
                .list_files(&overlay, self.opts.listing_limit)
                .await
                .unwrap_or_default();
            let verdict = self.verify_plan(objective, &path.plan_text, &listing).await;
            if let Err(error) = self.sandbox.discard(overlay).await {
                warn!(%error, "overlay discard failed");
            }

            let verdict = verdict?;
            if verdict.approved {
                debug!("path approved");
                return Ok(path);
            }
            path.last_critique = Some(verdict.feedback.clone());
            if path.iterations_left == 0 {
                break;
            }
            path.plan_text = self
                .revise_plan(objective, &path.plan_text, &verdict.feedback)
                .await?;
        }

        Err(EngineError::Other(
            "plan not approved within iteration budget".into(),
        ))
    }

    async fn verify_plan(
        &self,
        objective: &str,
        plan_text: &str,
        listing: &[String],
    ) -> EngineResult<PathVerdict> {
        let files = if listing.is_empty() {
            "(no listing available)".to_string()
        } else {
            listing.join("\n")
        };
        let user = format!(
            "Objective:\n{objective}\n\nCandidate plan:\n{plan_text}\n\nWorkspace files:\n{files}"
        );
        let request = self
            .llm
            .request()
            .system(VERIFY_SYSTEM_PROMPT)
            .user(user)
            .json();
        let response = self.provider.chat(request).await?;
        let raw = response.content().unwrap_or_default();

        match json::extract_object(raw) {
            Some(verdict) => Ok(PathVerdict {
                approved: verdict.get("approved").and_then(Value::as_bool).unwrap_or(false),
                feedback: verdict
                    .get("feedback")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            }),
            // An unparseable verdict counts as a rejection with the raw text
            // as feedback, same tolerance as the node-level verifier.
            None => Ok(PathVerdict {
                approved: false,
                feedback: raw.chars().take(500).collect(),
            }),
        }
    }

    async fn revise_plan(
        &self,
        objective: &str,
        plan_text: &str,
        feedback: &str,
    ) -> EngineResult<String> {
        let user = format!(
            "Objective:\n{objective}\n\nCurrent plan:\n{plan_text}\n\nReviewer feedback:\n{feedback}"
        );
        let request = self.llm.request().system(REVISE_SYSTEM_PROMPT).user(user);
        let response = self.provider.chat(request).await?;
        match response.content() {
            Some(revised) => Ok(json::strip_fences(revised).to_string()),
            // Keep the previous text and let the next iteration re-verify.
            None => Ok(plan_text.to_string()),
        }
    }

    // -----------------------------------------------------------------------
    // Selection
    // -----------------------------------------------------------------------

    async fn select_winner(
        &self,
        objective: &str,
        refined: &[AletheiaPath],
    ) -> EngineResult<String> {
        if refined.len() == 1 {
            return Ok(refined[0].plan_text.clone());
        }

        let numbered = refined
            .iter()
            .enumerate()
            .map(|(i, p)| format!("{}. {}", i + 1, p.plan_text))
            .collect::<Vec<_>>()
            .join("\n\n");
        let user = format!("Objective:\n{objective}\n\nVerified plans:\n{numbered}");
        let request = self
            .llm
            .request()
            .system(SELECT_SYSTEM_PROMPT)
            .user(user)
            .json();

        let raw = match self.provider.chat(request).await {
            Ok(response) => response.content().unwrap_or_default().to_string(),
            Err(error) => {
                warn!(%error, "selector call failed, falling back to first survivor");
                return Ok(refined[0].plan_text.clone());
            }
        };

        Ok(pick_selected(&raw, refined))
    }
}

/// Parse the selector's answer: a JSON `{"selected": n}`, a bare number, or
/// the winning plan text verbatim. Anything else falls back to the first
/// survivor.
fn pick_selected(raw: &str, refined: &[AletheiaPath]) -> String {
    let index = json::extract_object(raw)
        .and_then(|v| v.get("selected").and_then(Value::as_u64))
        .or_else(|| raw.trim().parse::<u64>().ok());
    if let Some(n) = index {
        if n >= 1 && (n as usize) <= refined.len() {
            return refined[n as usize - 1].plan_text.clone();
        }
    }
    let trimmed = raw.trim();
    if let Some(path) = refined.iter().find(|p| p.plan_text == trimmed) {
        return path.plan_text.clone();
    }
    refined[0].plan_text.clone()
}

/// Tolerant candidate decoding: `{"plans": [...]}`, a bare array of strings,
/// or a numbered list, in that order.
fn parse_candidate_plans(raw: &str) -> Vec<String> {
    if let Some(obj) = json::extract_object(raw) {
        if let Some(plans) = obj.get("plans").and_then(Value::as_array) {
            return collect_strings(plans);
        }
    }
    if let Some(Value::Array(items)) = json::extract_array(raw) {
        let plans = collect_strings(&items);
        if !plans.is_empty() {
            return plans;
        }
    }
    numbered_list(raw)
}

fn collect_strings(items: &[Value]) -> Vec<String> {
    items
        .iter()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn numbered_list(raw: &str) -> Vec<String> {
    raw.lines()
        .filter_map(|line| {
            let trimmed = line.trim();
            let rest = trimmed
                .split_once(['.', ')'])
                .filter(|(marker, _)| !marker.is_empty() && marker.chars().all(|c| c.is_ascii_digit()))
                .map(|(_, rest)| rest.trim())?;
            (!rest.is_empty()).then(|| rest.to_string())
        })
        .collect()
}

fn dedupe_in_place(plans: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    plans.retain(|p| seen.insert(p.clone()));
}
