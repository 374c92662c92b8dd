//! Node supervisor
//!
//! Dynamic, one-for-one supervision of decomposition nodes. Terminated nodes
//! are never restarted — a parent decides via replanning whether to respawn
//! the work. The supervisor keeps a live registry of children for
//! introspection and notifies a parent when its child vanishes without
//! reporting.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use ractor::{Actor, ActorRef};
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use arbor_kernel::error::{EngineError, EngineResult};
use arbor_kernel::llm::LlmConfig;
use arbor_kernel::planning::ModuleBindings;
use arbor_kernel::tool::ToolContext;

use crate::node::{
    ChildSpawner, ChildSpec, NodeActor, NodeArgs, NodeConfig, NodeMsg, NodeOutcome, NodeSnapshot,
    Reporter,
};

/// How long a `list_children` status probe waits per node.
const STATUS_PROBE_TIMEOUT: Duration = Duration::from_millis(200);

struct ChildEntry {
    actor: ActorRef<NodeMsg>,
}

/// Parameters for a root decomposition frame.
pub struct RootSpec {
    pub objective: String,
    pub config: NodeConfig,
    pub llm_config: LlmConfig,
    pub tool_context: ToolContext,
    pub bindings: ModuleBindings,
}

impl RootSpec {
    pub fn new(objective: impl Into<String>, bindings: ModuleBindings) -> Self {
        Self {
            objective: objective.into(),
            config: NodeConfig::default(),
            llm_config: LlmConfig::default(),
            tool_context: ToolContext::default(),
            bindings,
        }
    }

    pub fn with_config(mut self, config: NodeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_llm_config(mut self, llm_config: LlmConfig) -> Self {
        self.llm_config = llm_config;
        self
    }

    pub fn with_tool_context(mut self, tool_context: ToolContext) -> Self {
        self.tool_context = tool_context;
        self
    }
}

/// Caller-side handle to a root node.
pub struct NodeHandle {
    pub id: String,
    pub actor: ActorRef<NodeMsg>,
    outcome: oneshot::Receiver<NodeOutcome>,
}

impl NodeHandle {
    /// Wait for the root node to terminate and return its outcome.
    pub async fn wait(self) -> EngineResult<NodeOutcome> {
        self.outcome
            .await
            .map_err(|_| EngineError::Other("node terminated without reporting".into()))
    }
}

pub struct NodeSupervisor {
    children: Arc<DashMap<String, ChildEntry>>,
    weak_self: Weak<NodeSupervisor>,
}

impl NodeSupervisor {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            children: Arc::new(DashMap::new()),
            weak_self: weak_self.clone(),
        })
    }

    /// Spawn a root node and return a handle carrying its final outcome.
    pub async fn spawn_root(&self, spec: RootSpec) -> EngineResult<NodeHandle> {
        let (tx, rx) = oneshot::channel();
        let (id, actor) = self
            .spawn_node(
                spec.objective,
                0,
                spec.config,
                spec.llm_config,
                spec.tool_context,
                spec.bindings,
                Some(Reporter::Handle(tx)),
                None,
            )
            .await?;
        Ok(NodeHandle {
            id,
            actor,
            outcome: rx,
        })
    }

    /// Live children, probed for their current status. Nodes that terminate
    /// mid-probe are skipped.
    pub async fn list_children(&self) -> Vec<NodeSnapshot> {
        let probes: Vec<(String, ActorRef<NodeMsg>)> = self
            .children
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().actor.clone()))
            .collect();

        let mut snapshots = Vec::with_capacity(probes.len());
        for (id, actor) in probes {
            let (tx, rx) = oneshot::channel();
            if actor.send_message(NodeMsg::GetStatus { reply: tx }).is_err() {
                continue;
            }
            match tokio::time::timeout(STATUS_PROBE_TIMEOUT, rx).await {
                Ok(Ok(snapshot)) => snapshots.push(snapshot),
                _ => debug!(node = %id, "status probe failed"),
            }
        }
        snapshots
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    #[allow(clippy::too_many_arguments)]
    async fn spawn_node(
        &self,
        objective: String,
        depth: u32,
        config: NodeConfig,
        llm_config: LlmConfig,
        tool_context: ToolContext,
        bindings: ModuleBindings,
        reporter: Option<Reporter>,
        notify_down: Option<ActorRef<NodeMsg>>,
    ) -> EngineResult<(String, ActorRef<NodeMsg>)> {
        let spawner: Arc<dyn ChildSpawner> = self
            .weak_self
            .upgrade()
            .ok_or_else(|| EngineError::SpawnFailed("supervisor dropped".into()))?;

        let id = Uuid::now_v7().to_string();
        let args = NodeArgs {
            id: id.clone(),
            objective,
            depth,
            config,
            llm_config,
            tool_context,
            bindings,
            spawner,
            reporter,
        };

        let (actor, join) = Actor::spawn(Some(format!("node-{id}")), NodeActor, args)
            .await
            .map_err(|e| EngineError::SpawnFailed(e.to_string()))?;

        self.children.insert(
            id.clone(),
            ChildEntry {
                actor: actor.clone(),
            },
        );

        // Watchdog: deregister on termination and surface an unreported
        // death to the parent as a monitor-down signal.
        let children = self.children.clone();
        let node_id = id.clone();
        tokio::spawn(async move {
            if let Err(join_error) = join.await {
                warn!(node = %node_id, %join_error, "node task aborted");
            }
            children.remove(&node_id);
            if let Some(parent) = notify_down {
                let _ = parent.send_message(NodeMsg::ChildDown { node_id });
            }
        });

        Ok((id, actor))
    }
}

#[async_trait]
impl ChildSpawner for NodeSupervisor {
    async fn spawn_child(&self, spec: ChildSpec) -> EngineResult<(String, ActorRef<NodeMsg>)> {
        self.spawn_node(
            spec.objective,
            spec.depth,
            spec.config,
            spec.llm_config,
            spec.tool_context,
            spec.bindings,
            Some(Reporter::Parent(spec.parent.clone())),
            Some(spec.parent),
        )
        .await
    }
}
