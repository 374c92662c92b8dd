//! Planning capability traits
//!
//! The generate → verify → revise → execute loop is assembled from four
//! pluggable capabilities. Every node carries a [`ModuleBindings`] with one
//! implementation of each, so tests can substitute deterministic fakes
//! without touching the state machine.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::EngineResult;
use crate::llm::LlmConfig;
use crate::plan::{Plan, Task};
use crate::tool::ToolContext;

// ---------------------------------------------------------------------------
// Critique
// ---------------------------------------------------------------------------

/// The verifier's structured verdict on a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Critique {
    Approved { reason: String },
    Flawed { critique: String },
}

impl Critique {
    pub fn approved(reason: impl Into<String>) -> Self {
        Self::Approved {
            reason: reason.into(),
        }
    }

    pub fn flawed(critique: impl Into<String>) -> Self {
        Self::Flawed {
            critique: critique.into(),
        }
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved { .. })
    }
}

// ---------------------------------------------------------------------------
// Completed work
// ---------------------------------------------------------------------------

/// Outcome of one executed task, folded into the owning node's history in
/// arrival order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedTask {
    pub task_id: String,
    pub result: Value,
}

impl CompletedTask {
    pub fn new(task_id: impl Into<String>, result: Value) -> Self {
        Self {
            task_id: task_id.into(),
            result,
        }
    }
}

// ---------------------------------------------------------------------------
// Tool failure
// ---------------------------------------------------------------------------

/// Structured failure from tool dispatch. `context` carries at minimum the
/// normalized and original tool names plus the arguments that were passed.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
#[error("{reason}")]
pub struct ToolFailure {
    pub reason: String,
    pub context: Map<String, Value>,
}

impl ToolFailure {
    pub fn new(reason: impl Into<String>, context: Map<String, Value>) -> Self {
        Self {
            reason: reason.into(),
            context,
        }
    }
}

// ---------------------------------------------------------------------------
// Capability traits
// ---------------------------------------------------------------------------

/// Decomposes an objective into a plan of delegate/tool tasks.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn decompose(
        &self,
        objective: &str,
        completed: &[CompletedTask],
        config: &LlmConfig,
    ) -> EngineResult<Plan>;
}

/// Adversarially critiques a plan. Infallible by contract: transport
/// exhaustion and unparseable verdicts both come back as `Flawed`.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn critique(&self, objective: &str, plan: &Plan, config: &LlmConfig) -> Critique;
}

/// Rewrites a flawed plan given its critique. Returns the original plan when
/// the rewrite cannot be parsed, letting the caller re-verify.
#[async_trait]
pub trait Reviser: Send + Sync {
    async fn fix(&self, plan: Plan, critique: &str, objective: &str, config: &LlmConfig) -> Plan;
}

/// Dispatches a leaf `tool` task.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &Task, context: &ToolContext) -> Result<Value, ToolFailure>;
}

// ---------------------------------------------------------------------------
// Bindings
// ---------------------------------------------------------------------------

/// The pluggable component set a node runs against.
#[derive(Clone)]
pub struct ModuleBindings {
    pub planner: Arc<dyn Planner>,
    pub verifier: Arc<dyn Verifier>,
    pub reviser: Arc<dyn Reviser>,
    pub executor: Arc<dyn TaskExecutor>,
}

impl ModuleBindings {
    pub fn new(
        planner: Arc<dyn Planner>,
        verifier: Arc<dyn Verifier>,
        reviser: Arc<dyn Reviser>,
        executor: Arc<dyn TaskExecutor>,
    ) -> Self {
        Self {
            planner,
            verifier,
            reviser,
            executor,
        }
    }
}
