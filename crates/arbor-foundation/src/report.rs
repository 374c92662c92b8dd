//! Task reporting
//!
//! A task report is the structured outcome submission recorded against a
//! goal. Completion is gated on subgoal closure: a goal may be marked
//! completed only when every child goal is already completed. Premature
//! parent completion is the most common failure mode in hierarchical agent
//! systems, and this is the enforcement point.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::info;

use arbor_kernel::error::{EngineError, EngineResult};
use arbor_kernel::store::{CompletionSignal, Goal, GoalStatus, ObjectStore};

pub const SUMMARY_MAX_CHARS: usize = 400;
pub const REPORT_MAX_CHARS: usize = 20_000;
pub const ERROR_MAX_CHARS: usize = 2_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Success,
    Failure,
    Blocked,
    InProgress,
}

impl TaskOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Blocked => "blocked",
            Self::InProgress => "in_progress",
        }
    }

    fn requires_error(&self) -> bool {
        matches!(self, Self::Failure | Self::Blocked)
    }
}

/// Outcome submission payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReport {
    pub outcome: TaskOutcome,
    pub summary: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default = "default_mark_completed")]
    pub mark_completed: bool,
}

fn default_mark_completed() -> bool {
    true
}

impl TaskReport {
    pub fn success(summary: impl Into<String>) -> Self {
        Self {
            outcome: TaskOutcome::Success,
            summary: summary.into(),
            report: None,
            error: None,
            mark_completed: true,
        }
    }

    pub fn failure(summary: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            outcome: TaskOutcome::Failure,
            summary: summary.into(),
            report: None,
            error: Some(error.into()),
            mark_completed: false,
        }
    }

    pub fn with_report(mut self, report: impl Into<String>) -> Self {
        self.report = Some(report.into());
        self
    }

    pub fn keep_pending(mut self) -> Self {
        self.mark_completed = false;
        self
    }

    fn validate(&self) -> EngineResult<()> {
        if self.outcome.requires_error() && self.error.as_deref().unwrap_or("").trim().is_empty() {
            return Err(EngineError::InvalidReport(format!(
                "outcome '{}' requires an error description",
                self.outcome.as_str()
            )));
        }
        Ok(())
    }
}

/// Record a report against `goal_id`.
///
/// On `success` with `mark_completed`, fails if any child goal is still
/// pending — the goal is left untouched and the error names the blocking
/// subgoal. Successful completion flips the goal to `completed` (idempotent)
/// and fires the completion signal; every other outcome leaves it `pending`.
pub async fn submit_report(
    store: &dyn ObjectStore,
    signal: Option<&CompletionSignal>,
    goal_id: &str,
    report: TaskReport,
) -> EngineResult<Goal> {
    report.validate()?;
    store.get_goal(goal_id).await?;

    let completing = report.outcome == TaskOutcome::Success && report.mark_completed;
    if completing {
        for child in store.list_child_goals(goal_id).await? {
            if child.status != GoalStatus::Completed {
                return Err(EngineError::InvalidReport(format!(
                    "cannot complete goal {}: subgoal {} ({}) is still pending",
                    goal_id, child.id, child.title
                )));
            }
        }
    }

    let mut patch = Map::new();
    patch.insert("task_outcome".into(), json!(report.outcome.as_str()));
    patch.insert(
        "task_summary".into(),
        json!(truncate(&report.summary, SUMMARY_MAX_CHARS)),
    );
    if let Some(body) = &report.report {
        patch.insert("task_report".into(), json!(truncate(body, REPORT_MAX_CHARS)));
    }
    if let Some(error) = &report.error {
        patch.insert("last_error".into(), json!(truncate(error, ERROR_MAX_CHARS)));
    }
    if completing {
        patch.insert("completed_at".into(), json!(Utc::now().to_rfc3339()));
    }
    store.update_metadata(goal_id, patch).await?;

    let status = if completing {
        GoalStatus::Completed
    } else {
        GoalStatus::Pending
    };
    store.set_status(goal_id, status).await?;

    if completing {
        info!(%goal_id, "goal completed");
        if let Some(signal) = signal {
            signal.notify(goal_id);
        }
    }

    store.get_goal(goal_id).await
}

fn truncate(s: &str, limit: usize) -> String {
    s.chars().take(limit).collect()
}
