//! End-to-end tests for the decomposition engine: full node trees running
//! against the scripted LLM backend and mock tool registry.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};

use arbor_foundation::{
    AletheiaOptions, AletheiaPlanner, InMemoryStore, LlmGenerator, LlmReviser, LlmVerifier,
    TaskReport, ToolTaskExecutor, submit_report,
};
use arbor_kernel::error::{EngineError, EngineResult};
use arbor_kernel::llm::LlmConfig;
use arbor_kernel::planning::{Critique, ModuleBindings};
use arbor_kernel::sandbox::SandboxHandle;
use arbor_kernel::store::{CompletionSignal, Goal, GoalStatus, ObjectStore};
use arbor_kernel::tool::ToolContext;
use arbor_runtime::node::{ChildSpawner, ChildSpec, NodeActor, NodeArgs, PhaseOutcome, Reporter};
use arbor_runtime::{
    NodeConfig, NodeMsg, NodeOutcome, NodeStatus, NodeSupervisor, Phase, ReviewQueue, Reviewer,
    RootSpec,
};
use arbor_testing::{MockResponse, MockSandbox, MockToolRegistry, ScriptedLlmBackend};

/// Substring present in every generator prompt.
const GENERATE_KEY: &str = "Steps already completed";
/// Substring present in every node-level verifier prompt.
const VERIFY_KEY: &str = "Candidate plan:";

const APPROVE: &str = r#"{"status": "approved", "reason": "ordering is sound"}"#;

fn bindings(
    provider: &Arc<ScriptedLlmBackend>,
    registry: &Arc<MockToolRegistry>,
) -> ModuleBindings {
    ModuleBindings::new(
        Arc::new(LlmGenerator::new(provider.clone())),
        Arc::new(LlmVerifier::new(provider.clone())),
        Arc::new(LlmReviser::new(provider.clone())),
        Arc::new(ToolTaskExecutor::new(registry.clone())),
    )
}

fn expect_success(outcome: NodeOutcome) -> Vec<arbor_kernel::planning::CompletedTask> {
    match outcome {
        NodeOutcome::Success(completed) => completed,
        NodeOutcome::Failed { reason, .. } => panic!("node failed: {reason}"),
    }
}

async fn probe_status(actor: &ractor::ActorRef<NodeMsg>) -> NodeStatus {
    let (tx, rx) = tokio::sync::oneshot::channel();
    let _ = actor.send_message(NodeMsg::GetStatus { reply: tx });
    rx.await.expect("node answered the status probe").status
}

/// Poll until the node has processed its own start message.
async fn await_planning(actor: &ractor::ActorRef<NodeMsg>) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while probe_status(actor).await != NodeStatus::Planning {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("node entered planning");
}

// ---------------------------------------------------------------------------
// Scenario: happy path with a single tool task
// ---------------------------------------------------------------------------

#[tokio::test]
async fn single_tool_objective_completes() {
    arbor_testing::init_tracing();
    let provider = Arc::new(ScriptedLlmBackend::new());
    provider.add_response(
        GENERATE_KEY,
        &json!([{
            "id": "tool_1", "type": "tool", "objective": "echo objective",
            "tool": "task_report", "args": {"completed": "finish objective"}
        }])
        .to_string(),
    );
    provider.add_response(VERIFY_KEY, APPROVE);

    let registry = Arc::new(MockToolRegistry::new());
    registry.ok("task_report", json!({"task": "tool_1"}));

    let supervisor = NodeSupervisor::new();
    let handle = supervisor
        .spawn_root(RootSpec::new("finish objective", bindings(&provider, &registry)))
        .await
        .unwrap();

    let completed = expect_success(handle.wait().await.unwrap());
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].task_id, "tool_1");
    assert_eq!(completed[0].result, json!({"task": "tool_1"}));

    assert_eq!(registry.calls().len(), 1);
    assert_eq!(registry.calls()[0].0, "task_report");
}

// ---------------------------------------------------------------------------
// Scenario: replan after a tool failure
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn tool_failure_triggers_replan_with_narrative() {
    let provider = Arc::new(ScriptedLlmBackend::new());
    // The replan objective recites the failure, so the narrative script must
    // be registered before the generic generator script.
    provider.add_response_all(
        &[GENERATE_KEY, "failed because"],
        &json!([{
            "id": "recovered", "type": "tool", "objective": "finish cleanly",
            "tool": "finish", "args": {}
        }])
        .to_string(),
    );
    provider.add_response(
        GENERATE_KEY,
        &json!([{
            "id": "fails_once", "type": "tool", "objective": "deploy the service",
            "tool": "deploy", "args": {}
        }])
        .to_string(),
    );
    provider.add_response(VERIFY_KEY, APPROVE);

    let registry = Arc::new(MockToolRegistry::new());
    registry.fail("deploy", "deployment exploded");
    registry.ok("finish", json!({"ok": true}));

    let supervisor = NodeSupervisor::new();
    let handle = supervisor
        .spawn_root(RootSpec::new("ship the service", bindings(&provider, &registry)))
        .await
        .unwrap();

    let completed = expect_success(handle.wait().await.unwrap());
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].task_id, "recovered");

    // The second planning call carried the replan narrative.
    let narrative = provider
        .prompts()
        .into_iter()
        .find(|p| p.contains("failed because"))
        .expect("replan narrative prompt");
    assert!(narrative.contains("deploy the service"));
    assert!(narrative.contains("deployment exploded"));
}

// ---------------------------------------------------------------------------
// Scenario: delegation to a child node
// ---------------------------------------------------------------------------

#[tokio::test]
async fn delegate_task_spawns_child_and_folds_its_results() {
    let provider = Arc::new(ScriptedLlmBackend::new());
    provider.add_response_all(
        &[GENERATE_KEY, "child objective"],
        &json!([{
            "id": "child_tool", "type": "tool", "objective": "echo hello",
            "tool": "echo", "args": {}
        }])
        .to_string(),
    );
    provider.add_response(
        GENERATE_KEY,
        &json!([{
            "id": "delegate_1", "type": "delegate", "objective": "child objective"
        }])
        .to_string(),
    );
    provider.add_response(VERIFY_KEY, APPROVE);

    let registry = Arc::new(MockToolRegistry::new());
    registry.ok("echo", json!({"echoed": true}));

    let supervisor = NodeSupervisor::new();
    let handle = supervisor
        .spawn_root(RootSpec::new("root objective", bindings(&provider, &registry)))
        .await
        .unwrap();

    let completed = expect_success(handle.wait().await.unwrap());
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].task_id, "delegate_1");

    // The delegate's result is the child's completed-task list.
    let child_entries = completed[0].result.as_array().expect("child results");
    assert_eq!(child_entries.len(), 1);
    assert_eq!(child_entries[0]["task_id"], "child_tool");
    assert_eq!(child_entries[0]["result"], json!({"echoed": true}));
}

// ---------------------------------------------------------------------------
// Scenario: verifier rides out four transport failures
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn verifier_transient_failures_back_off_then_approve() {
    let provider = Arc::new(ScriptedLlmBackend::new());
    provider.add_response(
        GENERATE_KEY,
        &json!([{
            "id": "tool_1", "type": "tool", "objective": "report done",
            "tool": "task_report", "args": {}
        }])
        .to_string(),
    );
    provider.add_sequence(
        VERIFY_KEY,
        vec![
            MockResponse::TransportError("attempt 1".into()),
            MockResponse::TransportError("attempt 2".into()),
            MockResponse::TransportError("attempt 3".into()),
            MockResponse::TransportError("attempt 4".into()),
            MockResponse::Text(r#"{"status": "approved", "reason": "ok"}"#.into()),
        ],
    );

    let registry = Arc::new(MockToolRegistry::new());
    registry.ok("task_report", json!({"done": true}));

    let supervisor = NodeSupervisor::new();
    let started = tokio::time::Instant::now();
    let handle = supervisor
        .spawn_root(RootSpec::new("finish objective", bindings(&provider, &registry)))
        .await
        .unwrap();

    let completed = expect_success(handle.wait().await.unwrap());
    assert_eq!(completed[0].task_id, "tool_1");

    // Four backoff sleeps: 1 + 2 + 4 + 8 seconds.
    assert!(started.elapsed() >= Duration::from_secs(15));
}

// ---------------------------------------------------------------------------
// Scenario: flawed verdict drives the revise loop
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn flawed_plan_is_revised_then_executed() {
    let provider = Arc::new(ScriptedLlmBackend::new());
    provider.add_response(
        GENERATE_KEY,
        &json!([{
            "id": "rough", "type": "tool", "objective": "rough draft",
            "tool": "draft", "args": {}
        }])
        .to_string(),
    );
    provider.add_sequence(
        VERIFY_KEY,
        vec![
            MockResponse::Text(
                r#"{"status": "flawed", "critique": "the draft step skips review"}"#.into(),
            ),
            MockResponse::Text(APPROVE.into()),
        ],
    );
    // Strict JSON, as the reviser requires.
    provider.add_response(
        "Critique:",
        &json!([{
            "id": "polished", "type": "tool", "objective": "polished draft",
            "tool": "draft", "args": {}
        }])
        .to_string(),
    );

    let registry = Arc::new(MockToolRegistry::new());
    registry.ok("draft", json!({"words": 400}));

    let supervisor = NodeSupervisor::new();
    let handle = supervisor
        .spawn_root(RootSpec::new("write the memo", bindings(&provider, &registry)))
        .await
        .unwrap();

    let completed = expect_success(handle.wait().await.unwrap());
    assert_eq!(completed[0].task_id, "polished");
}

// ---------------------------------------------------------------------------
// Scenario: delegation limits
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn delegation_at_max_depth_fails_and_replans() {
    let provider = Arc::new(ScriptedLlmBackend::new());
    provider.add_response_all(
        &[GENERATE_KEY, "failed because"],
        &json!([{
            "id": "direct", "type": "tool", "objective": "do it directly",
            "tool": "direct", "args": {}
        }])
        .to_string(),
    );
    provider.add_response(
        GENERATE_KEY,
        &json!([{
            "id": "too_deep", "type": "delegate", "objective": "go one level deeper"
        }])
        .to_string(),
    );
    provider.add_response(VERIFY_KEY, APPROVE);

    let registry = Arc::new(MockToolRegistry::new());
    registry.ok("direct", json!({"ok": true}));

    let supervisor = NodeSupervisor::new();
    let handle = supervisor
        .spawn_root(
            RootSpec::new("bounded objective", bindings(&provider, &registry))
                .with_config(NodeConfig::default().with_max_depth(0)),
        )
        .await
        .unwrap();

    let completed = expect_success(handle.wait().await.unwrap());
    assert_eq!(completed[0].task_id, "direct");

    let narrative = provider
        .prompts()
        .into_iter()
        .find(|p| p.contains("Max delegation depth reached"))
        .expect("depth failure surfaced to the replanner");
    assert!(narrative.contains("go one level deeper"));
}

struct RefusingSpawner;

#[async_trait::async_trait]
impl ChildSpawner for RefusingSpawner {
    async fn spawn_child(
        &self,
        _spec: ChildSpec,
    ) -> EngineResult<(String, ractor::ActorRef<NodeMsg>)> {
        Err(EngineError::SpawnFailed("resource envelope exhausted".into()))
    }
}

#[tokio::test(start_paused = true)]
async fn spawn_failure_surfaces_as_delegation_failed() {
    let provider = Arc::new(ScriptedLlmBackend::new());
    provider.add_response_all(
        &[GENERATE_KEY, "Delegation failed"],
        &json!([{
            "id": "fallback", "type": "tool", "objective": "handle inline",
            "tool": "inline", "args": {}
        }])
        .to_string(),
    );
    provider.add_response(
        GENERATE_KEY,
        &json!([{
            "id": "delegated", "type": "delegate", "objective": "needs a child"
        }])
        .to_string(),
    );
    provider.add_response(VERIFY_KEY, APPROVE);

    let registry = Arc::new(MockToolRegistry::new());
    registry.ok("inline", json!({"ok": true}));

    let (tx, rx) = tokio::sync::oneshot::channel();
    let args = NodeArgs {
        id: "root-under-test".into(),
        objective: "objective with a broken supervisor".into(),
        depth: 0,
        config: NodeConfig::default(),
        llm_config: LlmConfig::default(),
        tool_context: ToolContext::default(),
        bindings: bindings(&provider, &registry),
        spawner: Arc::new(RefusingSpawner),
        reporter: Some(Reporter::Handle(tx)),
    };
    ractor::Actor::spawn(None, NodeActor, args).await.unwrap();

    let completed = expect_success(rx.await.unwrap());
    assert_eq!(completed[0].task_id, "fallback");
}

// ---------------------------------------------------------------------------
// Phase fencing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn forged_phase_results_leave_state_unchanged() {
    let provider = Arc::new(ScriptedLlmBackend::new());
    // Generator never returns, parking the node in `planning`.
    provider.add_sequence(
        GENERATE_KEY,
        vec![MockResponse::Hang(Duration::from_secs(3600))],
    );

    let registry = Arc::new(MockToolRegistry::new());
    let supervisor = NodeSupervisor::new();
    let handle = supervisor
        .spawn_root(RootSpec::new("slow objective", bindings(&provider, &registry)))
        .await
        .unwrap();
    await_planning(&handle.actor).await;

    // A stale/forged result: wrong token, wrong phase.
    let _ = handle.actor.send_message(NodeMsg::PhaseDone {
        token: 999,
        phase: Phase::Verify,
        outcome: PhaseOutcome::Verified(Critique::approved("forged")),
    });

    // The probe is queued behind the forged message, so by the time it is
    // answered the forged result has been processed — and dropped.
    assert_eq!(probe_status(&handle.actor).await, NodeStatus::Planning);
}

// ---------------------------------------------------------------------------
// Supervisor introspection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn supervisor_lists_live_children_and_forgets_dead_ones() {
    let provider = Arc::new(ScriptedLlmBackend::new());
    provider.add_sequence(
        GENERATE_KEY,
        vec![MockResponse::Hang(Duration::from_secs(3600))],
    );

    let registry = Arc::new(MockToolRegistry::new());
    let supervisor = NodeSupervisor::new();
    let handle = supervisor
        .spawn_root(
            RootSpec::new("introspected objective", bindings(&provider, &registry))
                .with_tool_context(ToolContext::for_project("proj-7")),
        )
        .await
        .unwrap();
    await_planning(&handle.actor).await;

    let children = supervisor.list_children().await;
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].id, handle.id);
    assert_eq!(children[0].status, NodeStatus::Planning);
    assert_eq!(children[0].depth, 0);
    assert_eq!(children[0].objective, "introspected objective");
    assert_eq!(children[0].project_id.as_deref(), Some("proj-7"));

    // Stop the node; the watchdog deregisters it.
    handle.actor.stop(None);
    tokio::time::timeout(Duration::from_secs(5), async {
        while supervisor.child_count() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("child deregistered after termination");
}

// ---------------------------------------------------------------------------
// Scenario: Aletheia fan-out
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn aletheia_fan_out_selects_the_refined_survivor() {
    arbor_testing::init_tracing();
    let provider = Arc::new(ScriptedLlmBackend::new());
    provider.add_response("Produce 3 distinct plans", r#"{"plans": ["A", "B", "C"]}"#);
    // A approves immediately.
    provider.add_response("Candidate plan:\nA", r#"{"approved": true, "feedback": "fine"}"#);
    // B is rejected twice, then approved.
    provider.add_sequence(
        "Candidate plan:\nB",
        vec![
            MockResponse::Text(r#"{"approved": false, "feedback": "too risky"}"#.into()),
            MockResponse::Text(r#"{"approved": false, "feedback": "still risky"}"#.into()),
            MockResponse::Text(r#"{"approved": true, "feedback": "acceptable now"}"#.into()),
        ],
    );
    // B's revisions keep the same plan text.
    provider.add_response("Current plan:\nB", "B");
    // C's verification hangs past the per-path deadline.
    provider.add_sequence(
        "Candidate plan:\nC",
        vec![MockResponse::Hang(Duration::from_secs(7200))],
    );
    provider.add_response("Verified plans:", r#"{"selected": 2}"#);

    let sandbox = Arc::new(MockSandbox::new().with_file("README.md", "service docs"));
    let planner = AletheiaPlanner::new(provider.clone(), sandbox.clone());

    let winner = planner
        .plan("deploy service", &SandboxHandle::new("base"))
        .await
        .unwrap();
    assert_eq!(winner, "B");

    // Every branched overlay was discarded (C's hang died with its task).
    assert!(sandbox.live_overlays() <= 1);
}

#[tokio::test]
async fn aletheia_respects_the_iteration_ceiling() {
    let opts = AletheiaOptions::default().with_max_iterations(50);
    // The ceiling is an internal clamp; fan-out with a permanently flawed
    // plan must stop after at most 6 verification rounds.
    let provider = Arc::new(ScriptedLlmBackend::new());
    provider.add_response("Produce 1 distinct plans", r#"{"plans": ["X"]}"#);
    provider.add_response("Candidate plan:\nX", r#"{"approved": false, "feedback": "never"}"#);
    provider.add_response("Current plan:\nX", "X");

    let sandbox = Arc::new(MockSandbox::new());
    let planner = AletheiaPlanner::new(provider.clone(), sandbox)
        .with_options(opts.with_num_plans(1));

    let err = planner
        .plan("stubborn objective", &SandboxHandle::new("base"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("All planning paths failed"));

    let verify_calls = provider
        .prompts()
        .iter()
        .filter(|p| p.contains("Candidate plan:\nX"))
        .count();
    assert_eq!(verify_calls, 6);
}

// ---------------------------------------------------------------------------
// Scenario: goal completion gating
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pending_subgoal_blocks_parent_completion() {
    let store = InMemoryStore::new();
    store.create_goal(Goal::new("G", "parent goal")).await.unwrap();
    store
        .create_goal(Goal::new("G-child", "child goal").with_parent("G"))
        .await
        .unwrap();

    let err = submit_report(&store, None, "G", TaskReport::success("done"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("G-child"), "{err}");
    assert_eq!(store.get_goal("G").await.unwrap().status, GoalStatus::Pending);

    // Closing the subgoal unblocks the parent, and the completion signal
    // reaches the review queue.
    store
        .set_status("G-child", GoalStatus::Completed)
        .await
        .unwrap();

    struct RecordingReviewer(parking_lot::Mutex<Vec<String>>);

    #[async_trait::async_trait]
    impl Reviewer for RecordingReviewer {
        async fn review(&self, goal_id: &str) -> EngineResult<()> {
            self.0.lock().push(goal_id.to_string());
            Ok(())
        }
    }

    let reviewer = Arc::new(RecordingReviewer(parking_lot::Mutex::new(Vec::new())));
    let queue = ReviewQueue::start(reviewer.clone());
    let signal = CompletionSignal::default();
    queue.attach(&signal);

    let updated = submit_report(&store, Some(&signal), "G", TaskReport::success("done"))
        .await
        .unwrap();
    assert_eq!(updated.status, GoalStatus::Completed);

    tokio::time::timeout(Duration::from_secs(5), async {
        while reviewer.0.lock().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("review queue consumed the completion signal");
    assert_eq!(reviewer.0.lock().as_slice(), ["G"]);
}

// ---------------------------------------------------------------------------
// Deep delegation chain
// ---------------------------------------------------------------------------

#[tokio::test]
async fn three_level_delegation_chain_completes() {
    let provider = Arc::new(ScriptedLlmBackend::new());
    provider.add_response_all(
        &[GENERATE_KEY, "leaf objective"],
        &json!([{
            "id": "leaf_tool", "type": "tool", "objective": "touch the file",
            "tool": "touch", "args": {"path": "done.txt"}
        }])
        .to_string(),
    );
    provider.add_response_all(
        &[GENERATE_KEY, "middle objective"],
        &json!([{
            "id": "mid_delegate", "type": "delegate", "objective": "leaf objective"
        }])
        .to_string(),
    );
    provider.add_response(
        GENERATE_KEY,
        &json!([{
            "id": "top_delegate", "type": "delegate", "objective": "middle objective"
        }])
        .to_string(),
    );
    provider.add_response(VERIFY_KEY, APPROVE);

    let registry = Arc::new(MockToolRegistry::new());
    registry.ok("touch", json!({"created": "done.txt"}));

    let supervisor = NodeSupervisor::new();
    let handle = supervisor
        .spawn_root(RootSpec::new("top objective", bindings(&provider, &registry)))
        .await
        .unwrap();

    let completed = expect_success(handle.wait().await.unwrap());
    assert_eq!(completed[0].task_id, "top_delegate");

    // Walk down: top -> middle -> leaf.
    let middle: &Value = &completed[0].result[0];
    assert_eq!(middle["task_id"], "mid_delegate");
    assert_eq!(middle["result"][0]["task_id"], "leaf_tool");
}
