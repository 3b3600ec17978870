#![allow(dead_code)]

use async_trait::async_trait;
use cdc_sink::config::{Config, KafkaConfig, PipelineConfig, TargetConfig};
use cdc_sink::event::{ChangeEvent, RoutingKey};
use cdc_sink::schema::{CatalogColumn, CatalogSource};
use cdc_sink::sql::{Dialect, Statement};
use cdc_sink::writer::Transactor;
use cdc_sink::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::env;
use std::sync::Mutex;

/// Target settings from environment variables, `TEST_PG_*` or `TEST_MYSQL_*`.
pub fn get_test_config(dialect: Dialect) -> Config {
    let (prefix, default_port, default_user) = match dialect {
        Dialect::Postgres => ("TEST_PG", 5432, "postgres"),
        Dialect::MySql => ("TEST_MYSQL", 3306, "root"),
    };
    let var = |name: &str, default: &str| {
        env::var(format!("{}_{}", prefix, name)).unwrap_or_else(|_| default.to_string())
    };

    let target = TargetConfig {
        dialect,
        host: var("HOST", "localhost"),
        port: Some(var("PORT", &default_port.to_string()).parse().unwrap_or(default_port)),
        database: var("DATABASE", "cdc_test"),
        username: var("USERNAME", default_user),
        password: var("PASSWORD", "postgres"),
        schema: "public".to_string(),
        max_connections: 4,
        connect_timeout_secs: 5,
    };

    let kafka = KafkaConfig {
        brokers: env::var("TEST_KAFKA_BROKERS")
            .unwrap_or_else(|_| "localhost:9092".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .collect(),
        group_id: format!("cdc_test_{}", std::process::id()),
        topic_prefix: "pos_mysql.pos.".to_string(),
        auto_offset_reset: "earliest".to_string(),
        session_timeout_ms: 10_000,
    };

    let pipeline = PipelineConfig {
        worker_count: 2,
        batch_size: 10,
        flush_interval_ms: 20,
        max_retries: 2,
        retry_backoff_ms: 10,
        ..PipelineConfig::default()
    };

    Config {
        target,
        kafka,
        pipeline,
    }
}

pub fn event(table: &str, op: &str, partition: i32, offset: i64, payload: Value) -> ChangeEvent {
    let Value::Object(mut payload) = payload else {
        panic!("payload must be a JSON object");
    };
    payload.insert("__op".to_string(), Value::String(op.to_string()));
    ChangeEvent {
        op: op.to_string(),
        ts_ms: 1_735_689_600_000,
        source_db: "pos".to_string(),
        source_table: table.to_string(),
        deleted: op == "d",
        payload,
        routing: RoutingKey::new(format!("pos_mysql.pos.{}", table), partition),
        offset,
    }
}

/// Catalog backed by a fixed table list.
#[derive(Default)]
pub struct FixedCatalog {
    tables: HashMap<String, Vec<CatalogColumn>>,
}

impl FixedCatalog {
    pub fn with_table(mut self, name: &str, columns: &[(&str, &str, Option<i64>)]) -> Self {
        let rows = columns
            .iter()
            .map(|(column, data_type, key_position)| CatalogColumn {
                name: column.to_string(),
                data_type: data_type.to_string(),
                nullable: key_position.is_none(),
                key_position: *key_position,
            })
            .collect();
        self.tables.insert(name.to_string(), rows);
        self
    }
}

#[async_trait]
impl CatalogSource for FixedCatalog {
    async fn load_columns(&self, table: &str) -> Result<Vec<CatalogColumn>> {
        Ok(self.tables.get(table).cloned().unwrap_or_default())
    }
}

/// Transactor that commits into memory and fails any batch touching `poisoned`.
pub struct MemoryTransactor {
    dialect: Dialect,
    poisoned: Option<String>,
    committed: Mutex<Vec<Statement>>,
}

impl MemoryTransactor {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            poisoned: None,
            committed: Mutex::new(Vec::new()),
        }
    }

    pub fn poisoned(mut self, table: &str) -> Self {
        self.poisoned = Some(table.to_string());
        self
    }

    pub fn committed(&self) -> Vec<Statement> {
        self.committed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transactor for MemoryTransactor {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn execute_once(&self, statements: &[Statement]) -> Result<()> {
        if let Some(index) = statements
            .iter()
            .position(|s| Some(&s.table) == self.poisoned.as_ref())
        {
            let stmt = &statements[index];
            return Err(Error::statement(
                stmt.op.as_str(),
                &stmt.table,
                index,
                Error::Connection("constraint violation".to_string()),
            ));
        }
        self.committed.lock().unwrap().extend_from_slice(statements);
        Ok(())
    }

    fn is_lock_conflict(&self, _err: &Error) -> bool {
        false
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) {}
}
