//! In-memory object store
//!
//! Reference [`ObjectStore`] implementation for tests and single-process
//! runs. Every operation is atomic under one lock, matching the interface's
//! last-writer-wins contract.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use uuid::Uuid;

use arbor_kernel::error::{EngineError, EngineResult};
use arbor_kernel::store::{Goal, GoalStatus, ObjectStore};

#[derive(Default)]
struct Inner {
    goals: HashMap<String, Goal>,
    /// Creation order, so child listings are deterministic.
    order: Vec<String>,
}

#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn get_goal(&self, id: &str) -> EngineResult<Goal> {
        self.inner
            .read()
            .goals
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::GoalNotFound(id.to_string()))
    }

    async fn list_goals_for_project(&self, project_id: &str) -> EngineResult<Vec<Goal>> {
        let inner = self.inner.read();
        Ok(inner
            .order
            .iter()
            .filter_map(|id| inner.goals.get(id))
            .filter(|g| g.project_id.as_deref() == Some(project_id))
            .cloned()
            .collect())
    }

    async fn list_child_goals(&self, parent_goal_id: &str) -> EngineResult<Vec<Goal>> {
        let inner = self.inner.read();
        Ok(inner
            .order
            .iter()
            .filter_map(|id| inner.goals.get(id))
            .filter(|g| g.parent_goal_id.as_deref() == Some(parent_goal_id))
            .cloned()
            .collect())
    }

    async fn create_goal(&self, mut goal: Goal) -> EngineResult<Goal> {
        if goal.id.trim().is_empty() {
            goal.id = Uuid::new_v4().to_string();
        }
        let mut inner = self.inner.write();
        if !inner.goals.contains_key(&goal.id) {
            inner.order.push(goal.id.clone());
        }
        inner.goals.insert(goal.id.clone(), goal.clone());
        Ok(goal)
    }

    async fn update_metadata(&self, id: &str, patch: Map<String, Value>) -> EngineResult<()> {
        let mut inner = self.inner.write();
        let goal = inner
            .goals
            .get_mut(id)
            .ok_or_else(|| EngineError::GoalNotFound(id.to_string()))?;
        for (key, value) in patch {
            goal.metadata.insert(key, value);
        }
        Ok(())
    }

    async fn set_status(&self, id: &str, status: GoalStatus) -> EngineResult<()> {
        let mut inner = self.inner.write();
        let goal = inner
            .goals
            .get_mut(id)
            .ok_or_else(|| EngineError::GoalNotFound(id.to_string()))?;
        goal.status = status;
        Ok(())
    }
}
