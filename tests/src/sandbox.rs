//! Mock sandbox manager
//!
//! In-memory workspace view for exercising the multi-path planner's
//! fact-checking loop. Tracks branch/discard balance so tests can assert
//! overlays are not leaked.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use arbor_kernel::error::{EngineError, EngineResult};
use arbor_kernel::sandbox::{SandboxHandle, SandboxManager};

#[derive(Default)]
pub struct MockSandbox {
    files: Mutex<Vec<(String, String)>>,
    branched: AtomicUsize,
    discarded: AtomicUsize,
}

impl MockSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, path: &str, contents: &str) -> Self {
        self.files
            .lock()
            .push((path.to_string(), contents.to_string()));
        self
    }

    pub fn live_overlays(&self) -> usize {
        self.branched.load(Ordering::SeqCst) - self.discarded.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SandboxManager for MockSandbox {
    async fn branch(&self, base: &SandboxHandle) -> EngineResult<SandboxHandle> {
        let n = self.branched.fetch_add(1, Ordering::SeqCst);
        Ok(SandboxHandle::new(format!("{}-overlay-{n}", base.0)))
    }

    async fn discard(&self, _overlay: SandboxHandle) -> EngineResult<()> {
        self.discarded.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn read_file(&self, _handle: &SandboxHandle, path: &str) -> EngineResult<String> {
        self.files
            .lock()
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, contents)| contents.clone())
            .ok_or_else(|| EngineError::Sandbox(format!("no such file: {path}")))
    }

    async fn list_files(&self, _handle: &SandboxHandle, limit: usize) -> EngineResult<Vec<String>> {
        Ok(self
            .files
            .lock()
            .iter()
            .take(limit)
            .map(|(path, _)| path.clone())
            .collect())
    }

    async fn grep_files(&self, _handle: &SandboxHandle, pattern: &str) -> EngineResult<Vec<String>> {
        Ok(self
            .files
            .lock()
            .iter()
            .filter(|(_, contents)| contents.contains(pattern))
            .map(|(path, _)| path.clone())
            .collect())
    }
}
