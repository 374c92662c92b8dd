//! Mock tool registry
//!
//! Scripted per-tool result queues plus a call log. A tool's final scripted
//! result repeats once its queue drains; unknown tools fail with
//! `ToolNotFound`.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value, json};

use arbor_kernel::error::{EngineError, EngineResult};
use arbor_kernel::tool::{ToolContext, ToolRegistry, ToolSpec};

#[derive(Default)]
struct ToolScript {
    results: VecDeque<EngineResult<Value>>,
    last: Option<EngineResult<Value>>,
}

#[derive(Default)]
pub struct MockToolRegistry {
    scripts: Mutex<HashMap<String, ToolScript>>,
    calls: Mutex<Vec<(String, Map<String, Value>)>>,
}

impl MockToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a success for `tool`.
    pub fn ok(&self, tool: &str, result: Value) {
        self.push(tool, Ok(result));
    }

    /// Script a failure for `tool`.
    pub fn fail(&self, tool: &str, reason: &str) {
        self.push(tool, Err(EngineError::tool_failed(tool, reason)));
    }

    fn push(&self, tool: &str, result: EngineResult<Value>) {
        self.scripts
            .lock()
            .entry(tool.to_string())
            .or_default()
            .results
            .push_back(result);
    }

    /// Every `(tool, args)` invocation seen, in order.
    pub fn calls(&self) -> Vec<(String, Map<String, Value>)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ToolRegistry for MockToolRegistry {
    async fn list_tools(&self, allowlist: Option<&[String]>) -> EngineResult<Vec<ToolSpec>> {
        let scripts = self.scripts.lock();
        Ok(scripts
            .keys()
            .filter(|name| {
                allowlist.is_none_or(|allow| allow.iter().any(|a| a.as_str() == name.as_str()))
            })
            .map(|name| ToolSpec {
                name: name.clone(),
                description: format!("mock tool {name}"),
                parameters: json!({"type": "object"}),
            })
            .collect())
    }

    async fn execute(
        &self,
        name: &str,
        args: &Map<String, Value>,
        _context: &ToolContext,
    ) -> EngineResult<Value> {
        self.calls.lock().push((name.to_string(), args.clone()));

        let mut scripts = self.scripts.lock();
        let Some(script) = scripts.get_mut(name) else {
            return Err(EngineError::ToolNotFound(name.to_string()));
        };
        if let Some(result) = script.results.pop_front() {
            script.last = Some(result.clone());
            return result;
        }
        script
            .last
            .clone()
            .unwrap_or_else(|| Err(EngineError::ToolNotFound(name.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fail_once_then_succeed() {
        let registry = MockToolRegistry::new();
        registry.fail("deploy", "exploded");
        registry.ok("deploy", json!({"ok": true}));

        let args = Map::new();
        let ctx = ToolContext::default();
        assert!(registry.execute("deploy", &args, &ctx).await.is_err());
        assert!(registry.execute("deploy", &args, &ctx).await.is_ok());
        // Last result repeats.
        assert!(registry.execute("deploy", &args, &ctx).await.is_ok());
        assert_eq!(registry.calls().len(), 3);
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let registry = MockToolRegistry::new();
        let result = registry
            .execute("ghost", &Map::new(), &ToolContext::default())
            .await;
        assert!(matches!(result, Err(EngineError::ToolNotFound(_))));
    }
}
