//! Decomposition node
//!
//! One node per objective. The node is a single-writer actor: all state
//! transitions happen inside its message handler, and anything that would
//! block (LLM calls, backoff sleeps) runs in spawned workers that report
//! back as phase-tagged messages.
//!
//! Every async phase carries a monotone token. A phase result is accepted
//! only when both the token and the phase kind match the node's current
//! expectation; anything else is a leftover from a superseded phase and is
//! dropped without touching state. Replanning cancels in-flight work by
//! bumping the token — the worker may still finish, but its message lands
//! dead.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use arbor_kernel::error::EngineResult;
use arbor_kernel::llm::LlmConfig;
use arbor_kernel::plan::{Plan, Task, TaskKind};
use arbor_kernel::planning::{CompletedTask, Critique, ModuleBindings};
use arbor_kernel::retry::RetryPolicy;
use arbor_kernel::tool::ToolContext;

// ---------------------------------------------------------------------------
// Status and phases
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Init,
    Planning,
    Verifying,
    Replanning,
    Executing,
    Done,
    Failed,
}

/// The three async steps a node can have in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Generate,
    Verify,
    Revise,
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Delegation beyond this depth fails the task.
    pub max_depth: u32,
    /// Backoff after a generator failure.
    pub planner_backoff: RetryPolicy,
    /// Backoff after a flawed verdict, before revising.
    pub verifier_backoff: RetryPolicy,
    /// Consecutive generator failures before the node gives up.
    pub max_plan_attempts: u32,
    /// Consecutive flawed verdicts before the node gives up.
    pub max_verify_rounds: u32,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            max_depth: 5,
            planner_backoff: RetryPolicy::standard(),
            verifier_backoff: RetryPolicy::standard(),
            max_plan_attempts: 5,
            max_verify_rounds: 5,
        }
    }
}

impl NodeConfig {
    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Result payload of a finished phase worker.
pub enum PhaseOutcome {
    Generated(EngineResult<Plan>),
    Verified(Critique),
    Revised(Plan),
}

pub enum NodeMsg {
    /// Kick off the first planning phase.
    Start,
    /// A phase worker finished. Fenced by `(token, phase)`.
    PhaseDone {
        token: u64,
        phase: Phase,
        outcome: PhaseOutcome,
    },
    /// A backoff sleep elapsed; re-enter `phase`. Fenced by `token`.
    Resume { token: u64, phase: Phase },
    /// Pull the next pending task.
    ExecuteNext,
    /// A child node completed its objective.
    ChildSuccess {
        node_id: String,
        completed: Vec<CompletedTask>,
    },
    /// A child node failed its objective.
    ChildFailed {
        node_id: String,
        reason: String,
        context: Value,
    },
    /// A child actor terminated; equivalent to failure unless it already
    /// reported.
    ChildDown { node_id: String },
    /// Introspection snapshot.
    GetStatus {
        reply: oneshot::Sender<NodeSnapshot>,
    },
}

impl std::fmt::Debug for NodeMsg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start => f.debug_struct("Start").finish(),
            Self::PhaseDone { token, phase, .. } => f
                .debug_struct("PhaseDone")
                .field("token", token)
                .field("phase", phase)
                .finish(),
            Self::Resume { token, phase } => f
                .debug_struct("Resume")
                .field("token", token)
                .field("phase", phase)
                .finish(),
            Self::ExecuteNext => f.debug_struct("ExecuteNext").finish(),
            Self::ChildSuccess { node_id, .. } => f
                .debug_struct("ChildSuccess")
                .field("node_id", node_id)
                .finish(),
            Self::ChildFailed { node_id, reason, .. } => f
                .debug_struct("ChildFailed")
                .field("node_id", node_id)
                .field("reason", reason)
                .finish(),
            Self::ChildDown { node_id } => f
                .debug_struct("ChildDown")
                .field("node_id", node_id)
                .finish(),
            Self::GetStatus { .. } => f.debug_struct("GetStatus").finish(),
        }
    }
}

/// Final outcome a root caller receives.
#[derive(Debug)]
pub enum NodeOutcome {
    Success(Vec<CompletedTask>),
    Failed { reason: String, context: Value },
}

/// Where a node reports when it terminates.
pub enum Reporter {
    Parent(ActorRef<NodeMsg>),
    Handle(oneshot::Sender<NodeOutcome>),
}

/// Introspection view of one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub id: String,
    pub status: NodeStatus,
    pub depth: u32,
    pub objective: String,
    pub project_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Delegation
// ---------------------------------------------------------------------------

/// Everything a supervisor needs to spawn a child frame.
pub struct ChildSpec {
    pub objective: String,
    pub depth: u32,
    pub parent: ActorRef<NodeMsg>,
    pub config: NodeConfig,
    pub llm_config: LlmConfig,
    pub tool_context: ToolContext,
    pub bindings: ModuleBindings,
}

/// Capability a node uses to delegate. The supervisor implements it; tests
/// may substitute a failing spawner.
#[async_trait]
pub trait ChildSpawner: Send + Sync {
    /// Returns the child's node id and actor reference.
    async fn spawn_child(&self, spec: ChildSpec) -> EngineResult<(String, ActorRef<NodeMsg>)>;
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

pub struct NodeArgs {
    pub id: String,
    pub objective: String,
    pub depth: u32,
    pub config: NodeConfig,
    pub llm_config: LlmConfig,
    pub tool_context: ToolContext,
    pub bindings: ModuleBindings,
    pub spawner: Arc<dyn ChildSpawner>,
    pub reporter: Option<Reporter>,
}

pub struct NodeState {
    id: String,
    objective: String,
    depth: u32,
    config: NodeConfig,
    llm_config: LlmConfig,
    tool_context: ToolContext,
    bindings: ModuleBindings,
    spawner: Arc<dyn ChildSpawner>,
    reporter: Option<Reporter>,

    status: NodeStatus,
    active_phase: Option<Phase>,
    phase_token: u64,

    plan: Option<Plan>,
    pending: VecDeque<Task>,
    completed: Vec<CompletedTask>,
    current_task: Option<Task>,
    current_child: Option<String>,
    last_critique: String,

    planner_retries: u32,
    verifier_retries: u32,
}

impl NodeState {
    fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            id: self.id.clone(),
            status: self.status,
            depth: self.depth,
            objective: self.objective.clone(),
            project_id: self.tool_context.project_id.clone(),
        }
    }
}

pub struct NodeActor;

impl Actor for NodeActor {
    type Msg = NodeMsg;
    type State = NodeState;
    type Arguments = NodeArgs;

    fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> impl Future<Output = Result<Self::State, ActorProcessingErr>> + Send {
        async move {
            Ok(NodeState {
                id: args.id,
                objective: args.objective,
                depth: args.depth,
                config: args.config,
                llm_config: args.llm_config,
                tool_context: args.tool_context,
                bindings: args.bindings,
                spawner: args.spawner,
                reporter: args.reporter,
                status: NodeStatus::Init,
                active_phase: None,
                phase_token: 0,
                plan: None,
                pending: VecDeque::new(),
                completed: Vec::new(),
                current_task: None,
                current_child: None,
                last_critique: String::new(),
                planner_retries: 0,
                verifier_retries: 0,
            })
        }
    }

    fn post_start(
        &self,
        myself: ActorRef<Self::Msg>,
        _state: &mut Self::State,
    ) -> impl Future<Output = Result<(), ActorProcessingErr>> + Send {
        async move {
            let _ = myself.send_message(NodeMsg::Start);
            Ok(())
        }
    }

    fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> impl Future<Output = Result<(), ActorProcessingErr>> + Send {
        handle_message(myself, message, state)
    }
}

async fn handle_message(
    myself: ActorRef<NodeMsg>,
    message: NodeMsg,
    state: &mut NodeState,
) -> Result<(), ActorProcessingErr> {
    match message {
        NodeMsg::Start => {
            state.status = NodeStatus::Planning;
            enter_generate(state, &myself);
        }

        NodeMsg::PhaseDone { token, phase, outcome } => {
            if token != state.phase_token || state.active_phase != Some(phase) {
                debug!(node = %state.id, token, "dropping stale phase result");
                return Ok(());
            }
            state.active_phase = None;
            match outcome {
                PhaseOutcome::Generated(Ok(plan)) => {
                    state.planner_retries = 0;
                    state.plan = Some(plan);
                    state.status = NodeStatus::Verifying;
                    enter_verify(state, &myself);
                }
                PhaseOutcome::Generated(Err(error)) => {
                    state.planner_retries += 1;
                    if state.planner_retries >= state.config.max_plan_attempts {
                        fail_node(
                            state,
                            &myself,
                            format!("Planning failed: {error}"),
                            Value::Null,
                        );
                        return Ok(());
                    }
                    warn!(node = %state.id, %error, retry = state.planner_retries, "generator failed");
                    schedule_resume(
                        state,
                        &myself,
                        Phase::Generate,
                        state.config.planner_backoff.delay_for(state.planner_retries - 1),
                    );
                }
                PhaseOutcome::Verified(Critique::Approved { reason }) => {
                    debug!(node = %state.id, %reason, "plan approved");
                    state.planner_retries = 0;
                    state.verifier_retries = 0;
                    let tasks = state.plan.as_ref().map(|p| p.tasks.clone()).unwrap_or_default();
                    state.pending = tasks.into();
                    state.status = NodeStatus::Executing;
                    let _ = myself.send_message(NodeMsg::ExecuteNext);
                }
                PhaseOutcome::Verified(Critique::Flawed { critique }) => {
                    state.verifier_retries += 1;
                    if state.verifier_retries >= state.config.max_verify_rounds {
                        fail_node(
                            state,
                            &myself,
                            format!("Plan verification failed: {critique}"),
                            Value::Null,
                        );
                        return Ok(());
                    }
                    warn!(node = %state.id, round = state.verifier_retries, "plan flawed");
                    state.last_critique = critique;
                    schedule_resume(
                        state,
                        &myself,
                        Phase::Revise,
                        state.config.verifier_backoff.delay_for(state.verifier_retries - 1),
                    );
                }
                PhaseOutcome::Revised(plan) => {
                    state.plan = Some(plan);
                    state.status = NodeStatus::Verifying;
                    enter_verify(state, &myself);
                }
            }
        }

        NodeMsg::Resume { token, phase } => {
            if token != state.phase_token {
                debug!(node = %state.id, token, "dropping stale resume");
                return Ok(());
            }
            match phase {
                Phase::Generate => {
                    state.status = NodeStatus::Planning;
                    enter_generate(state, &myself);
                }
                Phase::Revise => enter_revise(state, &myself),
                Phase::Verify => enter_verify(state, &myself),
            }
        }

        NodeMsg::ExecuteNext => {
            if state.status != NodeStatus::Executing {
                return Ok(());
            }
            let Some(task) = state.pending.pop_front() else {
                finish_node(state, &myself);
                return Ok(());
            };
            state.current_task = Some(task.clone());
            match task.kind {
                TaskKind::Delegate => delegate_task(state, &myself, task).await,
                TaskKind::Tool => run_tool_task(state, &myself, task).await,
            }
        }

        NodeMsg::ChildSuccess { node_id, completed } => {
            if state.current_child.as_deref() != Some(node_id.as_str()) {
                debug!(node = %state.id, child = %node_id, "ignoring unexpected child success");
                return Ok(());
            }
            state.current_child = None;
            if let Some(task) = state.current_task.take() {
                let result = serde_json::to_value(&completed).unwrap_or(Value::Null);
                state.completed.push(CompletedTask::new(task.id, result));
            }
            let _ = myself.send_message(NodeMsg::ExecuteNext);
        }

        NodeMsg::ChildFailed { node_id, reason, context } => {
            if state.current_child.as_deref() != Some(node_id.as_str()) {
                debug!(node = %state.id, child = %node_id, "ignoring unexpected child failure");
                return Ok(());
            }
            state.current_child = None;
            replan_after_failure(state, &myself, &reason, context);
        }

        NodeMsg::ChildDown { node_id } => {
            // Only meaningful when the child vanished before reporting.
            if state.current_child.as_deref() != Some(node_id.as_str()) {
                return Ok(());
            }
            state.current_child = None;
            replan_after_failure(
                state,
                &myself,
                "Child node terminated unexpectedly",
                Value::Null,
            );
        }

        NodeMsg::GetStatus { reply } => {
            let _ = reply.send(state.snapshot());
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Phase workers
// ---------------------------------------------------------------------------

fn enter_generate(state: &mut NodeState, myself: &ActorRef<NodeMsg>) {
    state.active_phase = Some(Phase::Generate);
    state.phase_token += 1;
    let token = state.phase_token;

    let planner = state.bindings.planner.clone();
    let objective = state.objective.clone();
    let completed = state.completed.clone();
    let llm = state.llm_config.clone();
    let myself = myself.clone();
    tokio::spawn(async move {
        let result = planner.decompose(&objective, &completed, &llm).await;
        let _ = myself.send_message(NodeMsg::PhaseDone {
            token,
            phase: Phase::Generate,
            outcome: PhaseOutcome::Generated(result),
        });
    });
}

fn enter_verify(state: &mut NodeState, myself: &ActorRef<NodeMsg>) {
    state.active_phase = Some(Phase::Verify);
    state.phase_token += 1;
    let token = state.phase_token;

    let verifier = state.bindings.verifier.clone();
    let objective = state.objective.clone();
    let plan = state.plan.clone().unwrap_or_default();
    let llm = state.llm_config.clone();
    let myself = myself.clone();
    tokio::spawn(async move {
        let verdict = verifier.critique(&objective, &plan, &llm).await;
        let _ = myself.send_message(NodeMsg::PhaseDone {
            token,
            phase: Phase::Verify,
            outcome: PhaseOutcome::Verified(verdict),
        });
    });
}

fn enter_revise(state: &mut NodeState, myself: &ActorRef<NodeMsg>) {
    state.active_phase = Some(Phase::Revise);
    state.phase_token += 1;
    let token = state.phase_token;

    let reviser = state.bindings.reviser.clone();
    let objective = state.objective.clone();
    let plan = state.plan.clone().unwrap_or_default();
    let critique = state.last_critique.clone();
    let llm = state.llm_config.clone();
    let myself = myself.clone();
    tokio::spawn(async move {
        let revised = reviser.fix(plan, &critique, &objective, &llm).await;
        let _ = myself.send_message(NodeMsg::PhaseDone {
            token,
            phase: Phase::Revise,
            outcome: PhaseOutcome::Revised(revised),
        });
    });
}

/// Park the node in `replanning` and re-enter `phase` after `delay`.
fn schedule_resume(
    state: &mut NodeState,
    myself: &ActorRef<NodeMsg>,
    phase: Phase,
    delay: std::time::Duration,
) {
    state.status = NodeStatus::Replanning;
    state.active_phase = None;
    state.phase_token += 1;
    let token = state.phase_token;
    let myself = myself.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = myself.send_message(NodeMsg::Resume { token, phase });
    });
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

async fn delegate_task(state: &mut NodeState, myself: &ActorRef<NodeMsg>, task: Task) {
    if state.depth >= state.config.max_depth {
        task_failed(
            state,
            myself,
            "Max delegation depth reached",
            json!({"task_id": task.id, "depth": state.depth}),
        );
        return;
    }

    let spec = ChildSpec {
        objective: task.objective.clone(),
        depth: state.depth + 1,
        parent: myself.clone(),
        config: state.config.clone(),
        llm_config: state.llm_config.clone(),
        tool_context: state.tool_context.clone(),
        bindings: state.bindings.clone(),
    };
    match state.spawner.spawn_child(spec).await {
        Ok((child_id, _child)) => {
            info!(node = %state.id, child = %child_id, task = %task.id, "delegated");
            state.current_child = Some(child_id);
        }
        Err(error) => {
            task_failed(
                state,
                myself,
                "Delegation failed",
                json!({"task_id": task.id, "reason": error.to_string()}),
            );
        }
    }
}

async fn run_tool_task(state: &mut NodeState, myself: &ActorRef<NodeMsg>, task: Task) {
    let result = state.bindings.executor.execute(&task, &state.tool_context).await;
    match result {
        Ok(value) => {
            state.completed.push(CompletedTask::new(task.id, value));
            state.current_task = None;
            let _ = myself.send_message(NodeMsg::ExecuteNext);
        }
        Err(failure) => {
            let context = Value::Object(failure.context.clone());
            task_failed(state, myself, &failure.reason, context);
        }
    }
}

fn task_failed(state: &mut NodeState, myself: &ActorRef<NodeMsg>, reason: &str, context: Value) {
    warn!(node = %state.id, %reason, "task failed, replanning");
    replan_after_failure(state, myself, reason, context);
}

// ---------------------------------------------------------------------------
// Replanning and termination
// ---------------------------------------------------------------------------

/// Fold the failure into a fresh objective narrative and start over. The
/// narrative recites the original intent, the completed steps, and the
/// failed task with its reason — a clean handoff for the next planning call,
/// with no history mutated beyond the objective field.
fn replan_after_failure(
    state: &mut NodeState,
    myself: &ActorRef<NodeMsg>,
    reason: &str,
    _context: Value,
) {
    let failed_task = state.current_task.take();
    state.objective = replan_objective(&state.objective, &state.completed, failed_task.as_ref(), reason);
    state.plan = None;
    state.pending.clear();
    // Invalidate any in-flight phase.
    state.phase_token += 1;
    state.active_phase = None;
    state.status = NodeStatus::Planning;
    enter_generate(state, myself);
}

fn replan_objective(
    objective: &str,
    completed: &[CompletedTask],
    failed: Option<&Task>,
    reason: &str,
) -> String {
    let mut text = format!("The original objective was: {objective}\n\n");
    if completed.is_empty() {
        text.push_str("No steps have completed yet.\n");
    } else {
        text.push_str("These steps completed successfully:\n");
        for entry in completed {
            text.push_str(&format!("  - {}\n", entry.task_id));
        }
    }
    match failed {
        Some(task) => text.push_str(&format!(
            "The step '{}' (id {}) failed because: {}\n",
            task.objective, task.id, reason
        )),
        None => text.push_str(&format!("A step failed because: {reason}\n")),
    }
    text.push_str(
        "\nCreate a new plan that still achieves the original objective, \
         building on the completed steps and avoiding the failure.",
    );
    text
}

fn finish_node(state: &mut NodeState, myself: &ActorRef<NodeMsg>) {
    state.status = NodeStatus::Done;
    info!(node = %state.id, steps = state.completed.len(), "objective complete");
    report(state, NodeOutcome::Success(state.completed.clone()));
    myself.stop(None);
}

fn fail_node(state: &mut NodeState, myself: &ActorRef<NodeMsg>, reason: String, context: Value) {
    state.status = NodeStatus::Failed;
    warn!(node = %state.id, %reason, "objective failed");
    report(state, NodeOutcome::Failed { reason, context });
    myself.stop(None);
}

fn report(state: &mut NodeState, outcome: NodeOutcome) {
    match state.reporter.take() {
        Some(Reporter::Parent(parent)) => {
            let message = match outcome {
                NodeOutcome::Success(completed) => NodeMsg::ChildSuccess {
                    node_id: state.id.clone(),
                    completed,
                },
                NodeOutcome::Failed { reason, context } => NodeMsg::ChildFailed {
                    node_id: state.id.clone(),
                    reason,
                    context,
                },
            };
            let _ = parent.send_message(message);
        }
        Some(Reporter::Handle(tx)) => {
            let _ = tx.send(outcome);
        }
        None => {}
    }
}
