//! Shared domain types for Conductor.
//!
//! This crate contains the domain model of the orchestration kernel:
//! parameters, actions, workflows, executions, sagas, dead-letter entries,
//! configuration, lifecycle events, and their error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror,
//! regex.

pub mod action;
pub mod config;
pub mod dlq;
pub mod error;
pub mod event;
pub mod execution;
pub mod parameter;
pub mod saga;
pub mod workflow;
