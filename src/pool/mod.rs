//! Partition-aware worker pool.
//!
//! Events are routed to a fixed worker by a hash of their `(topic,
//! partition)` so one partition is always applied by one worker, in
//! arrival order. Each worker buffers events into batches flushed on size
//! or on a periodic timer, and writes each batch in one transaction.
//!
//! Events that cannot be turned into SQL are dead-lettered individually.
//! When a batch transaction fails, every event that contributed a
//! statement is dead-lettered. After [`WorkerPool::stop`] returns, each
//! accepted event has been committed or dead-lettered.

use crate::config::PipelineConfig;
use crate::dlq::DeadLetterQueue;
use crate::event::{ChangeEvent, RoutingKey};
use crate::metrics::FailureKind;
use crate::processor::Processor;
use crate::writer::BatchWriter;
use crate::{Error, Result};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

#[cfg(test)]
mod tests;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub worker_count: usize,
    pub batch_size: usize,
    pub queue_capacity: usize,
    pub flush_interval: Duration,
}

impl From<&PipelineConfig> for PoolConfig {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            worker_count: config.worker_count.max(1),
            batch_size: config.batch_size.max(1),
            queue_capacity: config.queue_capacity(),
            flush_interval: config.flush_interval(),
        }
    }
}

/// FNV-1a over `"topic:partition"`.
fn route_hash(routing: &RoutingKey) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in routing.to_string().bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// Worker index for a routing key; stable for a fixed worker count.
pub fn worker_for(routing: &RoutingKey, worker_count: usize) -> usize {
    route_hash(routing) as usize % worker_count.max(1)
}

pub struct WorkerPool {
    senders: Vec<mpsc::Sender<ChangeEvent>>,
    handles: Vec<JoinHandle<()>>,
    processor: Arc<Processor>,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// Spawns one task per worker.
    ///
    /// Workers run until their queue is closed by [`stop`](Self::stop) or
    /// `cancel` fires; either way they drain and flush what they hold.
    pub fn start(
        config: PoolConfig,
        processor: Arc<Processor>,
        writer: Arc<BatchWriter>,
        dlq: Arc<DeadLetterQueue>,
        cancel: CancellationToken,
    ) -> Self {
        let worker_count = config.worker_count.max(1);
        let mut senders = Vec::with_capacity(worker_count);
        let mut handles = Vec::with_capacity(worker_count);

        for id in 0..worker_count {
            let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
            let worker = Worker {
                id,
                queue: rx,
                batch_size: config.batch_size.max(1),
                flush_interval: config.flush_interval,
                state: WorkerState::Collecting,
                processor: Arc::clone(&processor),
                writer: Arc::clone(&writer),
                dlq: Arc::clone(&dlq),
                cancel: cancel.clone(),
            };
            senders.push(tx);
            handles.push(tokio::spawn(worker.run()));
        }

        info!(
            workers = worker_count,
            batch_size = config.batch_size,
            queue_capacity = config.queue_capacity,
            "Worker pool started"
        );

        Self {
            senders,
            handles,
            processor,
            cancel,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.senders.len()
    }

    /// Hands `event` to its partition's worker, waiting while that queue is full.
    ///
    /// Events for excluded tables are dropped here. Returns
    /// [`Error::Shutdown`] once cancellation has fired, so the caller does
    /// not acknowledge an event that was never accepted.
    pub async fn submit(&self, event: ChangeEvent) -> Result<()> {
        if self.processor.is_excluded(&event.source_table) {
            debug!(table = %event.source_table, "Skipping excluded table");
            return Ok(());
        }

        let index = worker_for(&event.routing, self.senders.len());
        let sender = &self.senders[index];
        trace!(worker = index, routing = %event.routing, offset = event.offset, "Submitting event");

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Shutdown),
            sent = sender.send(event) => sent.map_err(|_| Error::Shutdown),
        }
    }

    /// Closes every queue and waits for each worker to flush and exit.
    pub async fn stop(self) {
        drop(self.senders);
        for result in join_all(self.handles).await {
            if let Err(e) = result {
                error!(error = %e, "Worker task failed");
            }
        }
        info!("Worker pool stopped");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerState {
    Collecting,
    Flushing,
    Draining,
}

struct Worker {
    id: usize,
    queue: mpsc::Receiver<ChangeEvent>,
    batch_size: usize,
    flush_interval: Duration,
    state: WorkerState,
    processor: Arc<Processor>,
    writer: Arc<BatchWriter>,
    dlq: Arc<DeadLetterQueue>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(mut self) {
        let mut ticker = interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        let mut batch = Vec::with_capacity(self.batch_size);

        while self.state == WorkerState::Collecting {
            tokio::select! {
                received = self.queue.recv() => match received {
                    Some(event) => {
                        batch.push(event);
                        if batch.len() >= self.batch_size {
                            self.flush(&mut batch).await;
                        }
                    }
                    None => self.transition(WorkerState::Draining),
                },
                _ = ticker.tick() => {
                    if !batch.is_empty() {
                        self.flush(&mut batch).await;
                    }
                }
                _ = self.cancel.cancelled() => {
                    self.transition(WorkerState::Draining);
                    self.queue.close();
                }
            }
        }

        while let Some(event) = self.queue.recv().await {
            batch.push(event);
            if batch.len() >= self.batch_size {
                self.flush(&mut batch).await;
            }
        }
        if !batch.is_empty() {
            self.flush(&mut batch).await;
        }
        debug!(worker = self.id, "Worker exited");
    }

    fn transition(&mut self, next: WorkerState) {
        trace!(worker = self.id, from = ?self.state, to = ?next, "Worker state change");
        self.state = next;
    }

    async fn flush(&mut self, batch: &mut Vec<ChangeEvent>) {
        let resume = self.state;
        self.transition(WorkerState::Flushing);
        let events = std::mem::replace(batch, Vec::with_capacity(self.batch_size));
        self.process_batch(events).await;
        self.transition(resume);
    }

    async fn process_batch(&self, events: Vec<ChangeEvent>) {
        let mut statements = Vec::with_capacity(events.len());
        let mut contributing = Vec::with_capacity(events.len());

        for event in &events {
            match self.processor.build_sql(event).await {
                Ok(stmt) => {
                    statements.push(stmt);
                    contributing.push(event);
                }
                Err(err) => {
                    warn!(
                        worker = self.id,
                        table = %event.source_table,
                        op = %event.op,
                        partition = event.routing.partition,
                        offset = event.offset,
                        error = %err,
                        "Skipping event in batch"
                    );
                    self.writer.metrics().record_failure(
                        &event.source_table,
                        event.operation().as_str(),
                        FailureKind::BuildError,
                    );
                    self.dlq.send(event, &err, 0).await;
                }
            }
        }

        if statements.is_empty() {
            return;
        }

        match self.writer.execute_batch(&statements).await {
            Ok(()) => debug!(worker = self.id, count = statements.len(), "Batch processed"),
            Err(err) => {
                error!(
                    worker = self.id,
                    batch_size = statements.len(),
                    error = %err,
                    "Batch processing failed"
                );
                let retries = err.retries();
                for event in contributing {
                    self.dlq.send(event, &err, retries).await;
                }
            }
        }
    }
}
