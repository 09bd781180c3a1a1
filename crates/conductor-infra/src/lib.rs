//! Infrastructure layer for Conductor.
//!
//! Implements the ports defined in `conductor-core`: SQLite and in-memory
//! repositories, the HTTP action invoker, and the TOML configuration loader.

pub mod config;
pub mod invoker;
pub mod memory;
pub mod sqlite;
