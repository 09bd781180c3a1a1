//! Configuration types for Conductor.
//!
//! `ConductorConfig` represents the top-level `config.toml` in the data
//! directory. Every field has a default so an empty or partial file is valid.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::action::DEFAULT_ACTION_TIMEOUT_SECS;
use crate::dlq::DEFAULT_MAX_RETRIES;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConductorConfig {
    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub dlq: DlqConfig,

    #[serde(default)]
    pub http: HttpConfig,

    /// Service registry: service name -> base URL.
    #[serde(default)]
    pub services: HashMap<String, String>,

    /// Base URL of the prompt service used by `prompt_execution` actions.
    #[serde(default)]
    pub prompt_service_url: Option<String>,
}

/// Executor tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Upper bound on concurrently running invocations across a wave.
    #[serde(default = "default_max_parallel_actions")]
    pub max_parallel_actions: usize,

    /// Timeout applied to actions loaded without an explicit one.
    #[serde(default = "default_timeout_seconds")]
    pub default_timeout_seconds: u64,
}

fn default_max_parallel_actions() -> usize {
    16
}

fn default_timeout_seconds() -> u64 {
    DEFAULT_ACTION_TIMEOUT_SECS
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_parallel_actions: default_max_parallel_actions(),
            default_timeout_seconds: default_timeout_seconds(),
        }
    }
}

/// Dead-letter ledger policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Age after which `cleanup` purges entries.
    #[serde(default = "default_retention_hours")]
    pub retention_hours: i64,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_retention_hours() -> i64 {
    168
}

impl Default for DlqConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retention_hours: default_retention_hours(),
        }
    }
}

/// Outbound HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_request_timeout_seconds() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("conductor/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: default_request_timeout_seconds(),
            user_agent: default_user_agent(),
        }
    }
}
