//! Arbor Runtime
//!
//! Hosts the decomposition tree: each objective runs inside a single-writer
//! actor (a node) that drives the generate → verify → revise → execute loop,
//! delegates sub-objectives to child nodes through a dynamic supervisor, and
//! reports success or failure upward. A serialized review queue consumes
//! goal-completion signals.

pub mod node;
pub mod review;
pub mod supervisor;

pub use node::{NodeConfig, NodeMsg, NodeOutcome, NodeSnapshot, NodeStatus, Phase};
pub use review::{ReviewQueue, Reviewer};
pub use supervisor::{NodeHandle, NodeSupervisor, RootSpec};
