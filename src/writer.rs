//! Transactional batch execution with lock-conflict retry.
//!
//! A [`Transactor`] runs one batch in one transaction against a concrete
//! target and knows how that target reports lock conflicts. The
//! [`BatchWriter`] owns the retry loop and metrics, so both dialects share
//! the same contract: all-or-nothing per batch, lock conflicts retried with
//! exponential backoff, everything else fails immediately.

use crate::metrics::{FailureKind, MetricsSink};
use crate::sql::{Dialect, Statement};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[async_trait]
pub trait Transactor: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Executes every statement in one transaction, rolling back on the first failure.
    ///
    /// A failing statement is reported as [`Error::Statement`].
    async fn execute_once(&self, statements: &[Statement]) -> Result<()>;

    /// True when `err` is a deadlock or lock-wait conflict worth retrying.
    fn is_lock_conflict(&self, err: &Error) -> bool;

    async fn ping(&self) -> Result<()>;

    async fn close(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_base: Duration) -> Self {
        Self {
            max_retries,
            backoff_base,
        }
    }

    /// Delay before retry `attempt` (1-based): `base * 2^(attempt - 1)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.backoff_base.saturating_mul(1u32 << exponent)
    }
}

pub struct BatchWriter {
    transactor: Arc<dyn Transactor>,
    policy: RetryPolicy,
    metrics: Arc<dyn MetricsSink>,
}

impl BatchWriter {
    pub fn new(
        transactor: Arc<dyn Transactor>,
        policy: RetryPolicy,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            transactor,
            policy,
            metrics,
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.transactor.dialect()
    }

    pub fn transactor(&self) -> &Arc<dyn Transactor> {
        &self.transactor
    }

    pub fn metrics(&self) -> &Arc<dyn MetricsSink> {
        &self.metrics
    }

    /// Applies `statements` atomically, retrying lock conflicts.
    ///
    /// Returns [`Error::RetriesExhausted`] when a conflict persists through
    /// every retry.
    pub async fn execute_batch(&self, statements: &[Statement]) -> Result<()> {
        if statements.is_empty() {
            return Ok(());
        }

        let mut attempt = 0;
        loop {
            if attempt > 0 {
                let backoff = self.policy.backoff(attempt);
                warn!(attempt, backoff_ms = backoff.as_millis() as u64, "Retrying batch after lock conflict");
                tokio::time::sleep(backoff).await;
            }

            let started = Instant::now();
            let err = match self.transactor.execute_once(statements).await {
                Ok(()) => {
                    self.record_commit(statements, started.elapsed());
                    if attempt > 0 {
                        info!(attempts = attempt + 1, "Batch succeeded after retry");
                    }
                    return Ok(());
                }
                Err(err) => err,
            };

            if !self.transactor.is_lock_conflict(&err) {
                self.record_failures(statements, FailureKind::ExecutionError);
                return Err(err);
            }

            self.metrics
                .record_failure("batch", "transaction", FailureKind::Deadlock);

            if attempt >= self.policy.max_retries {
                self.record_failures(statements, FailureKind::DeadlockExhausted);
                return Err(Error::RetriesExhausted {
                    retries: self.policy.max_retries,
                    source: Box::new(err),
                });
            }
            attempt += 1;
        }
    }

    fn record_commit(&self, statements: &[Statement], elapsed: Duration) {
        let share = elapsed / statements.len() as u32;
        for stmt in statements {
            self.metrics.record_success(&stmt.table, stmt.op, share);
        }
        debug!(count = statements.len(), elapsed_ms = elapsed.as_millis() as u64, "Batch committed");
    }

    fn record_failures(&self, statements: &[Statement], kind: FailureKind) {
        for stmt in statements {
            self.metrics.record_failure(&stmt.table, stmt.op.as_str(), kind);
        }
    }
}
