//! amc-classifier library interface
//!
//! Album classification engine: a fixed four-stage pipeline per album, a
//! bounded worker pool, a durable execution cache, a response cache with
//! single-flight coalescing, and a retrying remote client.

pub mod error;
pub mod models;
pub mod orchestrator;
pub mod pipeline;
pub mod services;
pub mod types;
pub mod utils;

pub use crate::error::{FailureKind, RemoteError, StageError};
pub use crate::orchestrator::Orchestrator;
pub use crate::pipeline::{StagePipeline, StageSettings};

use amc_common::config::TomlConfig;
use services::{ExecutionCache, RemoteClient, ResponseCache, RetryPolicy, Transport};
use sqlx::SqlitePool;
use std::sync::Arc;
use types::AttributeReader;

/// Fully wired engine
pub struct Engine {
    pub db: SqlitePool,
    pub executions: Arc<ExecutionCache>,
    pub responses: Arc<ResponseCache>,
    pub client: Arc<RemoteClient>,
    pub orchestrator: Orchestrator,
}

impl Engine {
    /// Open the cache database and build every component from `config`
    pub async fn from_config(
        config: &TomlConfig,
        transport: Arc<dyn Transport>,
        reader: Arc<dyn AttributeReader>,
    ) -> amc_common::Result<Self> {
        config.validate()?;
        let db = amc_common::db::init_database(&config.caching.database_path).await?;

        let executions = Arc::new(ExecutionCache::new(db.clone()));
        let responses = Arc::new(ResponseCache::new(db.clone(), config.caching.response_expiry_days));
        let client = Arc::new(
            RemoteClient::new(transport, RetryPolicy::from_config(&config.api), config.concurrency.api_concurrency)
                .with_repair_model(config.api.extraction_model.clone()),
        );
        let pipeline = Arc::new(StagePipeline::new(
            Arc::clone(&client),
            Arc::clone(&responses),
            reader,
            StageSettings::from_config(config),
        ));
        let orchestrator = Orchestrator::new(pipeline, Arc::clone(&executions), config.concurrency.max_workers)
            .with_execution_expiry(config.caching.execution_expiry_days);

        tracing::info!(
            database = %config.caching.database_path.display(),
            max_workers = config.concurrency.max_workers,
            api_concurrency = config.concurrency.api_concurrency,
            "Engine ready"
        );

        Ok(Self {
            db,
            executions,
            responses,
            client,
            orchestrator,
        })
    }
}
