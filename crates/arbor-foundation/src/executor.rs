//! Tool task executor
//!
//! Normalizes a leaf task's tool name and dispatches it through the external
//! tool registry. Failures come back with enough structured context for the
//! owning node to build a useful replan narrative.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::debug;

use arbor_kernel::plan::{Task, TaskKind};
use arbor_kernel::planning::{TaskExecutor, ToolFailure};
use arbor_kernel::tool::{ToolContext, ToolRegistry};

/// Legacy namespace prefixes stripped from tool names.
const LEGACY_PREFIXES: [&str; 3] = ["default_api:", "tools:", "orchid:"];

/// Map a raw tool name onto its registry name: trim, lowercase, strip legacy
/// prefixes, fold old aliases onto current names.
pub fn normalize_tool_name(raw: &str) -> String {
    let mut name = raw.trim().to_lowercase();
    for prefix in LEGACY_PREFIXES {
        if let Some(rest) = name.strip_prefix(prefix) {
            name = rest.trim().to_string();
        }
    }
    match name.as_str() {
        "list_files" => "list".to_string(),
        "read_file" => "read".to_string(),
        "edit_file" => "edit".to_string(),
        "grep_files" => "grep".to_string(),
        "run_shell" => "shell".to_string(),
        _ => name,
    }
}

/// Dispatches `tool` tasks to a [`ToolRegistry`].
pub struct ToolTaskExecutor {
    registry: Arc<dyn ToolRegistry>,
}

impl ToolTaskExecutor {
    pub fn new(registry: Arc<dyn ToolRegistry>) -> Self {
        Self { registry }
    }

    fn failure_context(task: &Task, tool: &str, original: &str, reason: &str) -> Map<String, Value> {
        let mut context = Map::new();
        context.insert("tool".into(), json!(tool));
        context.insert("original_tool".into(), json!(original));
        context.insert("reason".into(), json!(reason));
        context.insert("args".into(), Value::Object(task.args.clone()));
        context
    }
}

#[async_trait]
impl TaskExecutor for ToolTaskExecutor {
    async fn execute(&self, task: &Task, context: &ToolContext) -> Result<Value, ToolFailure> {
        if task.kind != TaskKind::Tool {
            let mut ctx = Map::new();
            ctx.insert("task".into(), serde_json::to_value(task).unwrap_or(Value::Null));
            return Err(ToolFailure::new("Invalid tool task", ctx));
        }

        let original = task.tool.as_deref().unwrap_or_default();
        if original.trim().is_empty() {
            let ctx = Self::failure_context(task, "", original, "missing tool name");
            return Err(ToolFailure::new("Invalid tool task", ctx));
        }

        let tool = normalize_tool_name(original);
        debug!(%tool, task_id = %task.id, "dispatching tool task");

        self.registry
            .execute(&tool, &task.args, context)
            .await
            .map_err(|error| {
                let reason = error.to_string();
                let ctx = Self::failure_context(task, &tool, original, &reason);
                ToolFailure::new(reason, ctx)
            })
    }
}
