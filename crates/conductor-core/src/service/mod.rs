//! Business logic services (use cases).
//!
//! Services orchestrate repository calls and kernel components. They depend
//! on traits (ports), never on concrete infrastructure implementations.

pub mod workflow;

pub use workflow::{ExecuteRequest, ServiceError, WorkflowService};
