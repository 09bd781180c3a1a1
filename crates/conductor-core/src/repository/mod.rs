//! Repository trait definitions (ports).
//!
//! These traits define the storage interface that `conductor-infra`
//! implements. The core crate never depends on a specific storage
//! technology.

pub mod execution;
pub mod workflow;

pub use execution::{ExecutionFilter, ExecutionRepository};
pub use workflow::{WorkflowFilter, WorkflowRepository};
