//! Workflow kernel: definition files, validation, parameter resolution,
//! planning, guard evaluation, and wave-based execution.
//!
//! - `definition` -- YAML/JSON parsing, filesystem load/save/discovery
//! - `validator` -- accumulating structural validation and cycle detection
//! - `resolver` -- provided/default/context parameter resolution
//! - `dag` -- static wave preview (petgraph)
//! - `context` -- per-execution outputs and template resolution
//! - `expression` -- sandboxed JEXL guard evaluator
//! - `invoker` -- action invocation port and retry wrapper
//! - `executor` -- dynamic wave executor

pub mod context;
pub mod dag;
pub mod definition;
pub mod executor;
pub mod expression;
pub mod invoker;
pub mod resolver;
pub mod validator;
