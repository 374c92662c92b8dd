//! Tool registry interface
//!
//! Tools are owned by the host; the engine dispatches through this trait and
//! never inspects tool behavior beyond success or failure.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::EngineResult;

/// Description of one registered tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the tool's arguments.
    pub parameters: Value,
}

/// Opaque execution context threaded from the node to every tool call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl ToolContext {
    pub fn for_project(project_id: impl Into<String>) -> Self {
        Self {
            project_id: Some(project_id.into()),
            ..Self::default()
        }
    }
}

/// External tool registry. Timeout policy belongs to the registry (a shell
/// tool enforces its own deadline); the engine only sees the outcome.
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    async fn list_tools(&self, allowlist: Option<&[String]>) -> EngineResult<Vec<ToolSpec>>;

    async fn execute(
        &self,
        name: &str,
        args: &Map<String, Value>,
        context: &ToolContext,
    ) -> EngineResult<Value>;
}
