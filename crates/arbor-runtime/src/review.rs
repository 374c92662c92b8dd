//! Review queue
//!
//! Serializes post-completion reviewer invocations: enqueue is
//! fire-and-forget, at most one review is in flight at a time, and a failed
//! or panicking review is logged without halting the queue.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use arbor_kernel::error::EngineResult;
use arbor_kernel::store::CompletionSignal;

/// Post-completion reviewer.
#[async_trait]
pub trait Reviewer: Send + Sync {
    async fn review(&self, goal_id: &str) -> EngineResult<()>;
}

/// Single-consumer queue in front of a [`Reviewer`].
#[derive(Clone)]
pub struct ReviewQueue {
    tx: mpsc::UnboundedSender<String>,
}

impl ReviewQueue {
    /// Start the consumer loop.
    pub fn start(reviewer: Arc<dyn Reviewer>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            while let Some(goal_id) = rx.recv().await {
                debug!(%goal_id, "review starting");
                // Run each review in its own task so a panic inside the
                // reviewer is contained and the queue keeps draining.
                let reviewer = reviewer.clone();
                let id = goal_id.clone();
                let run = tokio::spawn(async move { reviewer.review(&id).await });
                match run.await {
                    Ok(Ok(())) => debug!(%goal_id, "review complete"),
                    Ok(Err(error)) => warn!(%goal_id, %error, "review failed"),
                    Err(join_error) => warn!(%goal_id, %join_error, "review crashed"),
                }
            }
        });
        Self { tx }
    }

    /// Fire-and-forget enqueue.
    pub fn enqueue(&self, goal_id: impl Into<String>) {
        let _ = self.tx.send(goal_id.into());
    }

    /// Forward `goal_completed` notifications into the queue.
    pub fn attach(&self, signal: &CompletionSignal) {
        let mut events = signal.subscribe();
        let queue = self.clone();
        tokio::spawn(async move {
            while let Ok(goal_id) = events.recv().await {
                queue.enqueue(goal_id);
            }
        });
    }
}
