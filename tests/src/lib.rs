//! Arbor Testing
//!
//! Provides utilities for testing planning components and node trees
//! without live API calls or real sandboxes.

use std::sync::Once;

pub mod sandbox;
pub mod tools;

pub use backend::{MockResponse, ScriptedLlmBackend};
pub use sandbox::MockSandbox;
pub use tools::MockToolRegistry;

static INIT: Once = Once::new();

/// Install the test log subscriber once per process. Honors `RUST_LOG`.
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
