//! Sandbox manager interface
//!
//! The multi-path planner fact-checks candidate plans against a read-only
//! view of a workspace. Overlays are branched from a base handle, inspected,
//! and discarded; the engine never writes through this interface.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EngineResult;

/// Opaque reference to a sandbox or one of its overlays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxHandle(pub String);

impl SandboxHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

#[async_trait]
pub trait SandboxManager: Send + Sync {
    /// Branch a disposable overlay off `base`.
    async fn branch(&self, base: &SandboxHandle) -> EngineResult<SandboxHandle>;

    /// Throw an overlay away. Never fails the caller's workflow.
    async fn discard(&self, overlay: SandboxHandle) -> EngineResult<()>;

    async fn read_file(&self, handle: &SandboxHandle, path: &str) -> EngineResult<String>;

    /// Workspace listing, truncated to `limit` entries.
    async fn list_files(&self, handle: &SandboxHandle, limit: usize) -> EngineResult<Vec<String>>;

    async fn grep_files(
        &self,
        handle: &SandboxHandle,
        pattern: &str,
    ) -> EngineResult<Vec<String>>;
}
