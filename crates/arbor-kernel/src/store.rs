//! Object store interface
//!
//! Goals and projects are persistent entities owned by an external store;
//! the engine consumes them read-mostly and mutates only status and
//! metadata. Mutations are atomic at the interface level — the engine runs
//! no transactions of its own.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use crate::error::EngineResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoalStatus {
    Pending,
    Completed,
}

/// Persistent record of work, gated by subgoal completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    pub id: String,
    pub title: String,
    pub status: GoalStatus,

    /// Goal IDs this goal depends on.
    #[serde(default)]
    pub depends_on: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_goal_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl Goal {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            status: GoalStatus::Pending,
            depends_on: Vec::new(),
            parent_goal_id: None,
            agent_id: None,
            project_id: None,
            metadata: Map::new(),
        }
    }

    pub fn with_parent(mut self, parent_goal_id: impl Into<String>) -> Self {
        self.parent_goal_id = Some(parent_goal_id.into());
        self
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }
}

/// Store operations the engine relies on. `set_status` must be idempotent.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_goal(&self, id: &str) -> EngineResult<Goal>;

    async fn list_goals_for_project(&self, project_id: &str) -> EngineResult<Vec<Goal>>;

    /// Child goals of `parent_goal_id`, in creation order.
    async fn list_child_goals(&self, parent_goal_id: &str) -> EngineResult<Vec<Goal>>;

    async fn create_goal(&self, goal: Goal) -> EngineResult<Goal>;

    /// Merge `patch` into the goal's metadata map.
    async fn update_metadata(&self, id: &str, patch: Map<String, Value>) -> EngineResult<()>;

    async fn set_status(&self, id: &str, status: GoalStatus) -> EngineResult<()>;
}

// ---------------------------------------------------------------------------
// Completion signal
// ---------------------------------------------------------------------------

/// Outbound `goal_completed` notification channel. Fires when a goal is
/// marked completed through a task report; the review queue consumes it.
#[derive(Clone)]
pub struct CompletionSignal {
    sender: broadcast::Sender<String>,
}

impl CompletionSignal {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.sender.subscribe()
    }

    /// Best-effort: a signal with no subscribers is dropped silently.
    pub fn notify(&self, goal_id: &str) {
        let _ = self.sender.send(goal_id.to_string());
    }
}

impl Default for CompletionSignal {
    fn default() -> Self {
        Self::new(64)
    }
}
