//! Plan model
//!
//! A [`Plan`] is an ordered sequence of [`Task`]s produced by a planner.
//! Each task is either a `delegate` sub-objective (expanded later by a child
//! node) or a concrete `tool` invocation with arguments.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub mod parser;

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// Kind of work a task represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// Abstract sub-objective to be expanded by a child node.
    Delegate,
    /// Concrete, fully-specified tool invocation.
    Tool,
}

/// The unit of work in a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Stable short identifier, auto-assigned during parsing if missing.
    #[serde(default)]
    pub id: String,

    #[serde(rename = "type")]
    pub kind: TaskKind,

    /// One-sentence description of what this task accomplishes.
    pub objective: String,

    /// Tool registry name (`tool` kind only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,

    /// Tool arguments (`tool` kind only).
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub args: Map<String, Value>,
}

impl Task {
    /// Create a delegate task.
    pub fn delegate(id: impl Into<String>, objective: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: TaskKind::Delegate,
            objective: objective.into(),
            tool: None,
            args: Map::new(),
        }
    }

    /// Create a tool task.
    pub fn tool(
        id: impl Into<String>,
        objective: impl Into<String>,
        tool: impl Into<String>,
        args: Map<String, Value>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: TaskKind::Tool,
            objective: objective.into(),
            tool: Some(tool.into()),
            args,
        }
    }

    pub fn is_delegate(&self) -> bool {
        self.kind == TaskKind::Delegate
    }
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// An ordered, non-empty sequence of tasks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Plan {
    pub tasks: Vec<Task>,
}

impl Plan {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self { tasks }
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Serialize back to the wire format planners emit.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(&self.tasks).unwrap_or_else(|_| "[]".to_string())
    }
}

// ---------------------------------------------------------------------------
// Shell command guardrail
// ---------------------------------------------------------------------------

/// Markers that flag a shell command as an unexpanded placeholder.
const PLACEHOLDER_MARKERS: [&str; 3] = ["placeholder", "todo", "insert_"];

/// A `shell` task must carry a real command: non-empty, not a comment, and
/// free of placeholder markers. Models routinely emit `# TODO: fill in`
/// commands; this check is the single enforcement point that keeps them out
/// of execution.
pub fn shell_command_ok(args: &Map<String, Value>) -> bool {
    let Some(command) = args.get("command").and_then(Value::as_str) else {
        return false;
    };
    let trimmed = command.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return false;
    }
    let lowered = trimmed.to_lowercase();
    !PLACEHOLDER_MARKERS.iter().any(|m| lowered.contains(m))
}
