//! Plan parser
//!
//! Decodes raw model output into a validated [`Plan`]. The tolerant path
//! accepts raw JSON, fenced ```json blocks, or the first array span embedded
//! in prose; the strict path only accepts a raw JSON array. Elements that
//! fail validation are dropped rather than failing the whole plan — with one
//! exception: a plan that normalizes to nothing is a parse failure.

use serde_json::Value;
use tracing::debug;

use super::{Plan, Task, TaskKind, shell_command_ok};
use crate::error::{EngineError, EngineResult};
use crate::json;

/// Tolerant parse: raw JSON first, then fenced / embedded array.
pub fn parse(raw: &str) -> EngineResult<Plan> {
    let value = json::extract_array(raw)
        .ok_or_else(|| EngineError::PlanParse(format!("no JSON array in output: {}", head(raw))))?;
    normalize(value)
}

/// Strict parse: the output must be a bare JSON array, nothing else.
pub fn parse_strict(raw: &str) -> EngineResult<Plan> {
    let value: Value = serde_json::from_str(raw.trim())
        .map_err(|e| EngineError::PlanParse(format!("strict decode failed: {e}")))?;
    if !value.is_array() {
        return Err(EngineError::PlanParse("expected a JSON array".into()));
    }
    normalize(value)
}

fn normalize(value: Value) -> EngineResult<Plan> {
    let Value::Array(elements) = value else {
        return Err(EngineError::PlanParse("expected a JSON array".into()));
    };
    let mut tasks = Vec::with_capacity(elements.len());
    for (index, element) in elements.into_iter().enumerate() {
        match normalize_task(element, index) {
            Some(task) => tasks.push(task),
            None => debug!(index, "dropped invalid task during plan normalization"),
        }
    }
    if tasks.is_empty() {
        return Err(EngineError::EmptyPlan);
    }
    Ok(Plan::new(tasks))
}

fn normalize_task(element: Value, index: usize) -> Option<Task> {
    let obj = element.as_object()?;

    let kind = match obj.get("type").and_then(Value::as_str) {
        Some("delegate") => TaskKind::Delegate,
        Some("tool") => TaskKind::Tool,
        _ => return None,
    };

    let objective = obj
        .get("objective")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|o| !o.is_empty())?
        .to_string();

    let id = obj
        .get("id")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("task_{}", index + 1));

    match kind {
        TaskKind::Delegate => Some(Task::delegate(id, objective)),
        TaskKind::Tool => {
            let tool = obj
                .get("tool")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .unwrap_or("wait")
                .to_string();
            let args = obj
                .get("args")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            if tool == "shell" && !shell_command_ok(&args) {
                return None;
            }
            Some(Task::tool(id, objective, tool, args))
        }
    }
}

fn head(raw: &str) -> String {
    raw.chars().take(120).collect()
}
