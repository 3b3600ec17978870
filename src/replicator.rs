use crate::dlq::DeadLetterQueue;
use crate::kafka::EventConsumer;
use crate::metrics::PrometheusMetrics;
use crate::mysql::MySqlTarget;
use crate::pool::{PoolConfig, WorkerPool};
use crate::postgres::PostgresTarget;
use crate::processor::Processor;
use crate::schema::{CatalogSource, SchemaCatalog, TemporalOutput, ValueConverter};
use crate::sql::{builder_for, Dialect};
use crate::writer::{BatchWriter, RetryPolicy, Transactor};
use crate::{Config, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Wires the consumer, worker pool and target database together.
pub struct Replicator {
    config: Config,
    metrics: Arc<PrometheusMetrics>,
}

impl Replicator {
    pub fn new(config: Config) -> Result<Self> {
        Ok(Self {
            config,
            metrics: Arc::new(PrometheusMetrics::new()?),
        })
    }

    pub fn metrics(&self) -> &Arc<PrometheusMetrics> {
        &self.metrics
    }

    /// Runs until `cancel` fires, then drains the pool and releases the target.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let pipeline = &self.config.pipeline;
        let dialect = self.config.target.dialect;
        info!(dialect = %dialect, host = %self.config.target.host, "Replicator starting");

        let (transactor, catalog_source) = self.connect_target().await?;

        let processor = Arc::new(Processor::new(
            Arc::new(SchemaCatalog::new(catalog_source)),
            ValueConverter::new(
                pipeline.source_tz()?,
                pipeline.target_tz()?,
                TemporalOutput::for_dialect(dialect),
            ),
            builder_for(dialect),
            pipeline.excluded_tables.clone(),
        ));
        let writer = Arc::new(BatchWriter::new(
            Arc::clone(&transactor),
            RetryPolicy::new(pipeline.max_retries, pipeline.retry_backoff()),
            self.metrics.clone(),
        ));
        let dlq = Arc::new(DeadLetterQueue::open(&pipeline.dlq_path).await);

        let consumer = match EventConsumer::new(&self.config.kafka) {
            Ok(consumer) => consumer,
            Err(e) => {
                transactor.close().await;
                return Err(e);
            }
        };
        if let Err(e) = consumer.subscribe() {
            transactor.close().await;
            return Err(e);
        }

        let pool = WorkerPool::start(
            PoolConfig::from(pipeline),
            processor,
            writer,
            Arc::clone(&dlq),
            cancel.clone(),
        );

        let consumed = consumer.run(&pool, cancel.clone()).await;
        if let Err(e) = &consumed {
            warn!(error = %e, "Consumer exited with error");
            cancel.cancel();
        }

        info!("Shutting down");
        pool.stop().await;
        dlq.close().await;
        transactor.close().await;

        match self.metrics.encode() {
            Ok(text) => debug!(metrics = %text, "Final metrics"),
            Err(e) => warn!(error = %e, "Failed to encode metrics"),
        }
        info!(dead_lettered = dlq.count().await, "Replicator stopped");
        consumed
    }

    async fn connect_target(&self) -> Result<(Arc<dyn Transactor>, Arc<dyn CatalogSource>)> {
        match self.config.target.dialect {
            Dialect::MySql => {
                let target = Arc::new(MySqlTarget::connect(&self.config.target).await?);
                let transactor: Arc<dyn Transactor> = target.clone();
                let catalog: Arc<dyn CatalogSource> = target;
                Ok((transactor, catalog))
            }
            Dialect::Postgres => {
                let target = Arc::new(PostgresTarget::connect(&self.config.target).await?);
                let transactor: Arc<dyn Transactor> = target.clone();
                let catalog: Arc<dyn CatalogSource> = target;
                Ok((transactor, catalog))
            }
        }
    }
}
