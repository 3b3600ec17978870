#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::metrics::FailureKind;
    use crate::schema::{SchemaCatalog, TemporalOutput, ValueConverter};
    use crate::sql::{builder_for, Dialect};
    use crate::test_utils::{change_event, RecordingMetrics, RecordingTransactor, ScriptedOutcome, StaticCatalog};
    use crate::value::SqlValue;
    use crate::writer::RetryPolicy;
    use serde_json::json;

    struct Harness {
        pool: WorkerPool,
        transactor: Arc<RecordingTransactor>,
        dlq: Arc<DeadLetterQueue>,
        metrics: Arc<RecordingMetrics>,
        cancel: CancellationToken,
    }

    fn pool_config(workers: usize, batch_size: usize, flush_interval: Duration) -> PoolConfig {
        PoolConfig {
            worker_count: workers,
            batch_size,
            queue_capacity: batch_size * 2,
            flush_interval,
        }
    }

    fn harness(config: PoolConfig, transactor: RecordingTransactor, max_retries: u32) -> Harness {
        let source = StaticCatalog::new()
            .with_table("orders", &[("id", "bigint", Some(1)), ("total", "decimal", None)])
            .with_table("user_roles", &[("user_id", "int", Some(1)), ("role_id", "int", Some(2))]);
        let processor = Arc::new(Processor::new(
            Arc::new(SchemaCatalog::new(Arc::new(source))),
            ValueConverter::new(chrono_tz::UTC, chrono_tz::UTC, TemporalOutput::Text),
            builder_for(Dialect::MySql),
            vec!["audit_log".to_string()],
        ));

        let transactor = Arc::new(transactor);
        let metrics = Arc::new(RecordingMetrics::default());
        let writer = Arc::new(BatchWriter::new(
            transactor.clone(),
            RetryPolicy::new(max_retries, Duration::from_millis(1)),
            metrics.clone(),
        ));
        let dlq = Arc::new(DeadLetterQueue::in_memory());
        let cancel = CancellationToken::new();

        let pool = WorkerPool::start(config, processor, writer, dlq.clone(), cancel.clone());
        Harness {
            pool,
            transactor,
            dlq,
            metrics,
            cancel,
        }
    }

    fn order(partition: i32, id: i64) -> ChangeEvent {
        change_event("orders", "c", partition, id, json!({"id": id, "total": "1.00"}))
    }

    const NEVER: Duration = Duration::from_secs(3600);

    #[test]
    fn test_routing_is_deterministic() {
        let key = RoutingKey::new("pos_mysql.pos.orders", 0);
        assert_eq!(route_hash(&key), 0x5cc6_8259);
        assert_eq!(worker_for(&key, 4), 1);
        assert_eq!(worker_for(&RoutingKey::new("pos_mysql.pos.orders", 1), 4), 2);

        for _ in 0..10 {
            assert_eq!(worker_for(&key, 4), worker_for(&key, 4));
        }
        assert_eq!(worker_for(&key, 1), 0);
    }

    #[test]
    fn test_pool_config_from_pipeline() {
        let pipeline = PipelineConfig::default();
        let config = PoolConfig::from(&pipeline);
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.queue_capacity, 200);
        assert_eq!(config.flush_interval, Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_flush_on_batch_size() {
        let h = harness(pool_config(1, 2, NEVER), RecordingTransactor::new(), 0);

        for id in 0..4 {
            h.pool.submit(order(0, id)).await.unwrap();
        }
        h.pool.stop().await;

        let sizes: Vec<usize> = h.transactor.batches().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2]);
    }

    #[tokio::test]
    async fn test_flush_on_timer() {
        let h = harness(pool_config(1, 100, Duration::from_millis(20)), RecordingTransactor::new(), 0);

        for id in 0..3 {
            h.pool.submit(order(0, id)).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(h.transactor.committed().len(), 3);
        h.pool.stop().await;
    }

    #[tokio::test]
    async fn test_stop_flushes_partial_batch() {
        let h = harness(pool_config(2, 100, NEVER), RecordingTransactor::new(), 0);

        for id in 0..5 {
            h.pool.submit(order((id % 3) as i32, id)).await.unwrap();
        }
        h.pool.stop().await;

        assert_eq!(h.transactor.committed().len(), 5);
        assert_eq!(h.dlq.count().await, 0);
    }

    #[tokio::test]
    async fn test_partition_order_preserved() {
        let h = harness(pool_config(3, 3, NEVER), RecordingTransactor::new(), 0);

        for id in 0..10 {
            h.pool.submit(order(7, id)).await.unwrap();
        }
        h.pool.stop().await;

        let ids: Vec<SqlValue> = h
            .transactor
            .committed()
            .iter()
            .map(|stmt| stmt.args[0].clone())
            .collect();
        let expected: Vec<SqlValue> = (0..10).map(SqlValue::Int).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_unbuildable_event_is_dead_lettered_alone() {
        let h = harness(pool_config(1, 10, NEVER), RecordingTransactor::new(), 0);

        h.pool.submit(order(0, 1)).await.unwrap();
        h.pool
            .submit(change_event("missing", "c", 0, 2, json!({"id": 2})))
            .await
            .unwrap();
        h.pool
            .submit(change_event("orders", "u", 0, 3, json!({"id": 3})))
            .await
            .unwrap();
        h.pool.stop().await;

        assert_eq!(h.transactor.committed().len(), 1);
        let entries = h.dlq.entries().await;
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.retries == 0));
        assert!(entries[0].error.contains("unknown table"));
        assert!(entries[1].error.contains("no columns to update"));
        assert_eq!(h.metrics.failure_count(FailureKind::BuildError), 2);
    }

    #[tokio::test]
    async fn test_failed_batch_dead_letters_contributors() {
        let h = harness(
            pool_config(1, 10, NEVER),
            RecordingTransactor::new().failing_table("orders"),
            3,
        );

        h.pool.submit(order(0, 1)).await.unwrap();
        h.pool.submit(order(0, 2)).await.unwrap();
        h.pool
            .submit(change_event("orders", "x", 0, 3, json!({"id": 3})))
            .await
            .unwrap();
        h.pool.stop().await;

        assert!(h.transactor.committed().is_empty());
        assert_eq!(h.transactor.attempts(), 1);

        let entries = h.dlq.entries().await;
        assert_eq!(entries.len(), 3);
        assert!(entries[0].error.contains("unknown operation"));
        assert_eq!(
            entries.iter().skip(1).map(|e| e.event.offset).collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[tokio::test]
    async fn test_exhausted_retries_recorded_in_dlq() {
        let h = harness(
            pool_config(1, 10, NEVER),
            RecordingTransactor::new()
                .script(ScriptedOutcome::LockConflict)
                .script(ScriptedOutcome::LockConflict),
            1,
        );

        h.pool.submit(order(0, 1)).await.unwrap();
        h.pool.stop().await;

        let entries = h.dlq.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].retries, 1);
        assert!(entries[0].error.contains("deadlock persisted after 1 retries"));
    }

    #[tokio::test]
    async fn test_excluded_table_dropped() {
        let h = harness(pool_config(1, 10, NEVER), RecordingTransactor::new(), 0);

        h.pool
            .submit(change_event("audit_log", "c", 0, 1, json!({"id": 1})))
            .await
            .unwrap();
        h.pool.stop().await;

        assert!(h.transactor.committed().is_empty());
        assert_eq!(h.dlq.count().await, 0);
    }

    #[tokio::test]
    async fn test_cancellation_drains_and_rejects_new_work() {
        let h = harness(pool_config(2, 100, NEVER), RecordingTransactor::new(), 0);

        for id in 0..6 {
            h.pool.submit(order((id % 2) as i32, id)).await.unwrap();
        }
        h.cancel.cancel();

        let err = h.pool.submit(order(0, 99)).await.unwrap_err();
        assert!(matches!(err, Error::Shutdown));

        h.pool.stop().await;
        assert_eq!(h.transactor.committed().len(), 6);
    }

    #[tokio::test]
    async fn test_nothing_lost_under_backpressure() {
        let h = harness(
            pool_config(3, 4, Duration::from_millis(5)),
            RecordingTransactor::new()
                .failing_table("user_roles")
                .with_delay(Duration::from_millis(2)),
            0,
        );

        let mut submitted = 0;
        for id in 0..40 {
            let event = if id % 5 == 0 {
                change_event("user_roles", "d", 1, id, json!({"user_id": id, "role_id": 1}))
            } else {
                order((id % 4) as i32, id)
            };
            h.pool.submit(event).await.unwrap();
            submitted += 1;
        }
        h.pool.stop().await;

        let committed = h.transactor.committed().len();
        let dead = h.dlq.count().await;
        assert_eq!(committed + dead, submitted);
        assert!(dead >= 8);
    }
}
