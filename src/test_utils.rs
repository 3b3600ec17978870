//! In-memory stand-ins for the target database and metrics, shared by unit tests.

use crate::event::{ChangeEvent, Operation, RoutingKey};
use crate::metrics::{FailureKind, MetricsSink};
use crate::schema::{CatalogColumn, CatalogSource, TableSchema};
use crate::sql::{Dialect, Statement};
use crate::writer::Transactor;
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

const LOCK_CONFLICT: &str = "lock conflict";

fn catalog_rows(columns: &[(&str, &str, Option<i64>)]) -> Vec<CatalogColumn> {
    columns
        .iter()
        .map(|(name, data_type, key_position)| CatalogColumn {
            name: name.to_string(),
            data_type: data_type.to_string(),
            nullable: key_position.is_none(),
            key_position: *key_position,
        })
        .collect()
}

/// Builds a schema from `(column, type, key position)` triples.
pub fn table_schema(name: &str, columns: &[(&str, &str, Option<i64>)]) -> TableSchema {
    TableSchema::from_catalog(name, catalog_rows(columns))
}

pub fn statement(table: &str, op: Operation) -> Statement {
    Statement {
        sql: format!("-- {} {}", op, table),
        args: Vec::new(),
        table: table.to_string(),
        op,
    }
}

pub fn change_event(table: &str, op: &str, partition: i32, offset: i64, payload: Value) -> ChangeEvent {
    ChangeEvent {
        op: op.to_string(),
        ts_ms: 1_735_689_600_000,
        source_db: "pos".to_string(),
        source_table: table.to_string(),
        deleted: op == "d",
        payload: payload.as_object().cloned().unwrap_or_default(),
        routing: RoutingKey::new(format!("pos_mysql.pos.{}", table), partition),
        offset,
    }
}

#[derive(Default)]
pub struct StaticCatalog {
    tables: HashMap<String, Vec<CatalogColumn>>,
    loads: Mutex<HashMap<String, usize>>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, name: &str, columns: &[(&str, &str, Option<i64>)]) -> Self {
        self.tables.insert(name.to_string(), catalog_rows(columns));
        self
    }

    pub fn load_count(&self, table: &str) -> usize {
        self.loads.lock().unwrap().get(table).copied().unwrap_or(0)
    }
}

#[async_trait]
impl CatalogSource for StaticCatalog {
    async fn load_columns(&self, table: &str) -> Result<Vec<CatalogColumn>> {
        *self.loads.lock().unwrap().entry(table.to_string()).or_default() += 1;
        Ok(self.tables.get(table).cloned().unwrap_or_default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedOutcome {
    LockConflict,
    Fail,
}

/// Transactor that commits into memory and fails on demand.
#[derive(Default)]
pub struct RecordingTransactor {
    script: Mutex<VecDeque<ScriptedOutcome>>,
    failing_tables: Vec<String>,
    delay: Option<Duration>,
    attempts: Mutex<usize>,
    batches: Mutex<Vec<Vec<Statement>>>,
}

impl RecordingTransactor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the outcome of the next attempt; unscripted attempts succeed.
    pub fn script(self, outcome: ScriptedOutcome) -> Self {
        self.script.lock().unwrap().push_back(outcome);
        self
    }

    /// Any batch touching `table` fails permanently.
    pub fn failing_table(mut self, table: &str) -> Self {
        self.failing_tables.push(table.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }

    pub fn batches(&self) -> Vec<Vec<Statement>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn committed(&self) -> Vec<Statement> {
        self.batches().into_iter().flatten().collect()
    }
}

#[async_trait]
impl Transactor for RecordingTransactor {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    async fn execute_once(&self, statements: &[Statement]) -> Result<()> {
        *self.attempts.lock().unwrap() += 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.script.lock().unwrap().pop_front();
        let first = &statements[0];
        match scripted {
            Some(ScriptedOutcome::LockConflict) => {
                return Err(Error::statement(
                    first.op.as_str(),
                    first.table.clone(),
                    0,
                    Error::Connection(LOCK_CONFLICT.to_string()),
                ));
            }
            Some(ScriptedOutcome::Fail) => {
                return Err(Error::statement(
                    first.op.as_str(),
                    first.table.clone(),
                    0,
                    Error::Connection("constraint violation".to_string()),
                ));
            }
            None => {}
        }

        if let Some((index, stmt)) = statements
            .iter()
            .enumerate()
            .find(|(_, s)| self.failing_tables.contains(&s.table))
        {
            return Err(Error::statement(
                stmt.op.as_str(),
                stmt.table.clone(),
                index,
                Error::Connection("constraint violation".to_string()),
            ));
        }

        self.batches.lock().unwrap().push(statements.to_vec());
        Ok(())
    }

    fn is_lock_conflict(&self, err: &Error) -> bool {
        matches!(err.root_cause(), Error::Connection(msg) if msg == LOCK_CONFLICT)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) {}
}

#[derive(Default)]
pub struct RecordingMetrics {
    successes: Mutex<Vec<(String, Operation)>>,
    failures: Mutex<Vec<(String, String, FailureKind)>>,
}

impl RecordingMetrics {
    pub fn successes(&self) -> Vec<(String, Operation)> {
        self.successes.lock().unwrap().clone()
    }

    pub fn failures(&self) -> Vec<(String, String, FailureKind)> {
        self.failures.lock().unwrap().clone()
    }

    pub fn failure_count(&self, kind: FailureKind) -> usize {
        self.failures().iter().filter(|(_, _, k)| *k == kind).count()
    }
}

impl MetricsSink for RecordingMetrics {
    fn record_success(&self, table: &str, op: Operation, _latency: Duration) {
        self.successes.lock().unwrap().push((table.to_string(), op));
    }

    fn record_failure(&self, table: &str, op: &str, kind: FailureKind) {
        self.failures
            .lock()
            .unwrap()
            .push((table.to_string(), op.to_string(), kind));
    }
}
