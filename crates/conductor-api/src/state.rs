//! Application state wiring the workflow service to concrete adapters.
//!
//! `WorkflowService` is generic over its repositories and invoker; AppState
//! pins it to SQLite storage and the retrying HTTP invoker.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use conductor_core::event::EventBus;
use conductor_core::service::WorkflowService;
use conductor_core::workflow::executor::WorkflowExecutor;
use conductor_core::workflow::invoker::RetryingInvoker;
use conductor_infra::invoker::HttpActionInvoker;
use conductor_infra::sqlite::{DatabasePool, SqliteExecutionRepository, SqliteWorkflowRepository};
use conductor_types::config::ConductorConfig;

const EVENT_BUS_CAPACITY: usize = 1024;

pub type ConcreteInvoker = RetryingInvoker<HttpActionInvoker>;

pub type ConcreteWorkflowService =
    WorkflowService<SqliteWorkflowRepository, SqliteExecutionRepository, ConcreteInvoker>;

#[derive(Clone)]
pub struct AppState {
    pub workflows: Arc<ConcreteWorkflowService>,
    pub config: ConductorConfig,
    pub db_pool: DatabasePool,
}

impl AppState {
    /// Open the database under `data_dir` and wire the service.
    pub async fn init(data_dir: &Path, config: ConductorConfig) -> anyhow::Result<Self> {
        let db_pool = DatabasePool::open(data_dir)
            .await
            .with_context(|| format!("failed to open database in {}", data_dir.display()))?;

        let http = HttpActionInvoker::new(&config).context("failed to build HTTP invoker")?;
        let events = EventBus::new(EVENT_BUS_CAPACITY);
        let executor = WorkflowExecutor::new(
            RetryingInvoker::new(http),
            config.executor.max_parallel_actions,
        )
        .with_event_bus(events.clone());

        let workflows = WorkflowService::new(
            SqliteWorkflowRepository::new(db_pool.clone()),
            SqliteExecutionRepository::new(db_pool.clone()),
            executor,
            events,
        );

        tracing::debug!(data_dir = %data_dir.display(), "application state ready");
        Ok(Self {
            workflows: Arc::new(workflows),
            config,
            db_pool,
        })
    }
}
