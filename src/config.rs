use crate::sql::Dialect;
use crate::{Error, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub target: TargetConfig,
    pub kafka: KafkaConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TargetConfig {
    #[serde(default)]
    pub dialect: Dialect,
    pub host: String,
    /// Defaults to the dialect's standard port when unset.
    #[serde(default)]
    pub port: Option<u16>,
    pub database: String,
    pub username: String,
    pub password: String,
    /// PostgreSQL schema holding the replicated tables.
    #[serde(default = "default_target_schema")]
    pub schema: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KafkaConfig {
    pub brokers: Vec<String>,
    #[serde(default = "default_group_id")]
    pub group_id: String,
    pub topic_prefix: String,
    #[serde(default = "default_auto_offset_reset")]
    pub auto_offset_reset: String,
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// Per-worker queue capacity; twice the batch size when unset.
    #[serde(default)]
    pub queue_capacity: Option<usize>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_timezone")]
    pub source_timezone: String,
    #[serde(default = "default_timezone")]
    pub target_timezone: String,
    #[serde(default)]
    pub excluded_tables: Vec<String>,
    #[serde(default = "default_dlq_path")]
    pub dlq_path: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
            queue_capacity: None,
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            source_timezone: default_timezone(),
            target_timezone: default_timezone(),
            excluded_tables: Vec::new(),
            dlq_path: default_dlq_path(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("CDC")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("kafka.brokers")
                    .with_list_parse_key("pipeline.excluded_tables")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.worker_count == 0 {
            return Err(Error::Config("pipeline.worker_count must be at least 1".to_string()));
        }
        if self.pipeline.batch_size == 0 {
            return Err(Error::Config("pipeline.batch_size must be at least 1".to_string()));
        }
        if self.target.password.is_empty() {
            return Err(Error::Config("target.password is required".to_string()));
        }
        if self.kafka.brokers.is_empty() {
            return Err(Error::Config("kafka.brokers must not be empty".to_string()));
        }
        self.pipeline.source_tz()?;
        self.pipeline.target_tz()?;
        Ok(())
    }

}

impl TargetConfig {
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(match self.dialect {
            Dialect::MySql => 3306,
            Dialect::Postgres => 5432,
        })
    }

    pub fn mysql_url(&self) -> String {
        format!(
            "mysql://{}:{}@{}:{}/{}",
            self.username,
            self.password,
            self.host,
            self.port(),
            self.database
        )
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl PipelineConfig {
    pub fn source_tz(&self) -> Result<Tz> {
        parse_timezone(&self.source_timezone)
    }

    pub fn target_tz(&self) -> Result<Tz> {
        parse_timezone(&self.target_timezone)
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity.unwrap_or(self.batch_size * 2).max(1)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|e| Error::Config(format!("invalid timezone {}: {}", name, e)))
}

fn default_target_schema() -> String {
    "public".to_string()
}

fn default_max_connections() -> u32 {
    25
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_group_id() -> String {
    "cdc-consumer-group".to_string()
}

fn default_auto_offset_reset() -> String {
    "earliest".to_string()
}

fn default_session_timeout_ms() -> u32 {
    30_000
}

fn default_worker_count() -> usize {
    4
}

fn default_batch_size() -> usize {
    100
}

fn default_flush_interval_ms() -> u64 {
    100
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_dlq_path() -> PathBuf {
    PathBuf::from("var/dlq/dlq.jsonl")
}
