//! Workflow orchestration kernel and repository trait definitions for
//! Conductor.
//!
//! This crate defines the "ports" (repository and invocation traits) that
//! the infrastructure layer implements. It depends only on
//! `conductor-types`, never on `conductor-infra` or any database/IO crate.

pub mod dlq;
pub mod event;
pub mod repository;
pub mod saga;
pub mod service;
pub mod workflow;
