use super::decoder::decode_message;
use super::topics::discover_topics;
use crate::config::KafkaConfig;
use crate::event::ChangeEvent;
use crate::pool::WorkerPool;
use crate::{Error, Result};
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::ClientConfig;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What to do with a message's offset after it was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposition {
    /// Mark the offset as processed.
    Store,
    /// Leave the offset unmarked so the message is redelivered.
    Skip,
    /// The pool is shutting down; stop consuming.
    Stop,
}

/// Kafka group consumer feeding decoded change events into a [`WorkerPool`].
///
/// Offsets are stored only after the pool accepted the event (or the
/// message was unusable), and committed by the client's auto-commit.
pub struct EventConsumer {
    consumer: StreamConsumer,
    topic_prefix: String,
}

impl EventConsumer {
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", config.brokers.join(","))
            .set("group.id", &config.group_id)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("session.timeout.ms", config.session_timeout_ms.to_string())
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(Error::Kafka)?;

        Ok(Self {
            consumer,
            topic_prefix: config.topic_prefix.clone(),
        })
    }

    /// Subscribes to every topic under the configured prefix.
    pub fn subscribe(&self) -> Result<Vec<String>> {
        let topics = discover_topics(&self.consumer, &self.topic_prefix)?;
        if topics.is_empty() {
            return Err(Error::Config(format!(
                "no topics found with prefix {}",
                self.topic_prefix
            )));
        }

        let names: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.consumer.subscribe(&names).map_err(Error::Kafka)?;
        info!(topics = ?topics, "Subscribed to CDC topics");
        Ok(topics)
    }

    /// Consumes until `cancel` fires or the pool stops accepting events.
    pub async fn run(&self, pool: &WorkerPool, cancel: CancellationToken) -> Result<()> {
        let mut handled: u64 = 0;

        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => break,
                received = self.consumer.recv() => match received {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(error = %e, "Kafka receive error");
                        continue;
                    }
                },
            };

            let decoded = decode_message(
                message.topic(),
                message.partition(),
                message.offset(),
                message.payload(),
            );
            match dispatch(pool, decoded).await {
                Disposition::Store => self.store(&message),
                Disposition::Skip => {}
                Disposition::Stop => break,
            }

            handled += 1;
            if handled % 10_000 == 0 {
                info!(handled, "Consumer progress");
            }
        }

        self.commit();
        info!(handled, "Consumer stopped");
        Ok(())
    }

    fn store(&self, message: &BorrowedMessage<'_>) {
        if let Err(e) = self.consumer.store_offset_from_message(message) {
            warn!(
                topic = message.topic(),
                partition = message.partition(),
                offset = message.offset(),
                error = %e,
                "Failed to store offset"
            );
        }
    }

    fn commit(&self) {
        match self.consumer.commit_consumer_state(CommitMode::Sync) {
            Ok(()) => debug!("Committed stored offsets"),
            Err(e) => debug!(error = %e, "No offsets committed on shutdown"),
        }
    }
}

/// Hands a decoded message to the pool and decides its offset's fate.
pub(crate) async fn dispatch(
    pool: &WorkerPool,
    decoded: Result<Option<ChangeEvent>>,
) -> Disposition {
    let event = match decoded {
        Ok(Some(event)) => event,
        Ok(None) => {
            debug!("Skipping tombstone");
            return Disposition::Store;
        }
        Err(e) => {
            warn!(error = %e, "Skipping undecodable message");
            return Disposition::Store;
        }
    };

    let (table, offset) = (event.source_table.clone(), event.offset);
    match pool.submit(event).await {
        Ok(()) => Disposition::Store,
        Err(Error::Shutdown) => Disposition::Stop,
        Err(e) => {
            error!(table = %table, offset, error = %e, "Failed to submit event");
            Disposition::Skip
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dlq::DeadLetterQueue;
    use crate::metrics::NoopMetrics;
    use crate::pool::PoolConfig;
    use crate::processor::Processor;
    use crate::schema::{SchemaCatalog, TemporalOutput, ValueConverter};
    use crate::sql::{builder_for, Dialect};
    use crate::test_utils::{change_event, RecordingTransactor, StaticCatalog};
    use crate::writer::{BatchWriter, RetryPolicy};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn pool(cancel: CancellationToken) -> (WorkerPool, Arc<RecordingTransactor>) {
        let source = StaticCatalog::new().with_table("orders", &[("id", "bigint", Some(1))]);
        let processor = Arc::new(Processor::new(
            Arc::new(SchemaCatalog::new(Arc::new(source))),
            ValueConverter::new(chrono_tz::UTC, chrono_tz::UTC, TemporalOutput::Native),
            builder_for(Dialect::Postgres),
            Vec::new(),
        ));
        let transactor = Arc::new(RecordingTransactor::new());
        let writer = Arc::new(BatchWriter::new(
            transactor.clone(),
            RetryPolicy::new(0, Duration::from_millis(1)),
            Arc::new(NoopMetrics),
        ));
        let config = PoolConfig {
            worker_count: 2,
            batch_size: 10,
            queue_capacity: 10,
            flush_interval: Duration::from_secs(3600),
        };
        let pool = WorkerPool::start(
            config,
            processor,
            writer,
            Arc::new(DeadLetterQueue::in_memory()),
            cancel,
        );
        (pool, transactor)
    }

    #[tokio::test]
    async fn test_accepted_event_is_stored() {
        let (pool, transactor) = pool(CancellationToken::new());
        let event = change_event("orders", "c", 0, 5, json!({"id": 5}));

        assert_eq!(dispatch(&pool, Ok(Some(event))).await, Disposition::Store);
        pool.stop().await;
        assert_eq!(transactor.committed().len(), 1);
    }

    #[tokio::test]
    async fn test_unusable_messages_are_stored() {
        let (pool, transactor) = pool(CancellationToken::new());

        assert_eq!(dispatch(&pool, Ok(None)).await, Disposition::Store);
        let invalid = Err(Error::InvalidMessage {
            message: "expected a JSON object".to_string(),
        });
        assert_eq!(dispatch(&pool, invalid).await, Disposition::Store);

        pool.stop().await;
        assert!(transactor.committed().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_stops_without_storing() {
        let cancel = CancellationToken::new();
        let (pool, _) = pool(cancel.clone());
        cancel.cancel();

        let event = change_event("orders", "c", 0, 1, json!({"id": 1}));
        assert_eq!(dispatch(&pool, Ok(Some(event))).await, Disposition::Stop);
        pool.stop().await;
    }
}
