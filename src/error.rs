//! Error types and result handling for cdc-sink.
//!
//! This module defines the main error type [`Error`] and a convenience
//! [`Result`] type alias used throughout the crate.
//!
//! # Example
//!
//! ```rust
//! use cdc_sink::{Error, Result};
//!
//! fn lookup_table(name: &str) -> Result<()> {
//!     Err(Error::UnknownTable { table: name.to_string() })
//! }
//!
//! match lookup_table("orders") {
//!     Ok(()) => println!("found"),
//!     Err(Error::UnknownTable { table }) => eprintln!("no such table: {}", table),
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! ```

use thiserror::Error;

/// The main error type for cdc-sink operations.
///
/// Variants fall into five groups: lookup errors (unknown table),
/// payload-shape errors (missing keys, nothing to update, unknown
/// operation), transactional errors raised by the target database,
/// best-effort persistence errors, and startup errors.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error, typically from an invalid file or environment variable.
    #[error("Configuration error: {0}")]
    Config(String),

    /// PostgreSQL client or protocol error.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// Failure to obtain a pooled PostgreSQL connection.
    #[error("PostgreSQL pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// MySQL client or protocol error.
    #[error("MySQL error: {0}")]
    MySql(#[from] sqlx::Error),

    /// Kafka client or consumer error.
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// JSON serialization error when encoding or decoding records.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error, typically from dead-letter file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Metrics registry error.
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Generic connection error not covered by specific types.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The target catalog has no columns for this table.
    #[error("unknown table: {table}")]
    UnknownTable {
        /// Table that was looked up
        table: String,
    },

    /// The table declares no primary key, so rows cannot be addressed.
    #[error("no primary key for table {table}")]
    NoPrimaryKey {
        /// Table without a primary key
        table: String,
    },

    /// The payload lacks one or more primary-key values.
    #[error("missing primary key values for table {table}: expected {expected}, found {found}")]
    MissingPrimaryKey {
        /// Table being written
        table: String,
        /// Number of primary-key columns the schema declares
        expected: usize,
        /// Number of primary-key values present in the payload
        found: usize,
    },

    /// An update payload carried only primary-key columns.
    #[error("no columns to update for table {table} (only primary key columns in payload)")]
    NothingToUpdate {
        /// Table being written
        table: String,
    },

    /// The event carried an operation code the pipeline does not handle.
    #[error("unknown operation: {op:?}")]
    UnknownOperation {
        /// Raw operation code from the event envelope
        op: String,
    },

    /// Invalid or malformed change event.
    #[error("Invalid message format: {message}")]
    InvalidMessage {
        /// Description of what was invalid
        message: String,
    },

    /// A statement inside a batch failed; the transaction was rolled back.
    #[error("failed to execute {op} on {table} (statement {index}): {source}")]
    Statement {
        /// Operation tag of the failing statement
        op: String,
        /// Target table of the failing statement
        table: String,
        /// Position of the statement in its batch
        index: usize,
        /// Driver error
        source: Box<Error>,
    },

    /// A lock conflict persisted through every retry.
    #[error("deadlock persisted after {retries} retries: {source}")]
    RetriesExhausted {
        /// Number of retries performed
        retries: u32,
        /// Error of the last attempt
        source: Box<Error>,
    },

    /// Graceful shutdown was requested (e.g., via Ctrl+C).
    ///
    /// This is not really an error but uses the error mechanism
    /// to reject work submitted after shutdown began.
    #[error("Shutdown requested")]
    Shutdown,
}

impl Error {
    /// Wraps a driver error raised by the statement at `index` of a batch.
    pub fn statement(op: impl Into<String>, table: impl Into<String>, index: usize, source: Error) -> Self {
        Error::Statement {
            op: op.into(),
            table: table.into(),
            index,
            source: Box::new(source),
        }
    }

    /// Returns the innermost error, skipping batch and retry wrappers.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Statement { source, .. } | Error::RetriesExhausted { source, .. } => {
                source.root_cause()
            }
            other => other,
        }
    }

    /// Number of writer retries that preceded this error.
    pub fn retries(&self) -> u32 {
        match self {
            Error::RetriesExhausted { retries, .. } => *retries,
            _ => 0,
        }
    }
}

/// A convenient Result type alias for cdc-sink operations.
///
/// This is equivalent to `std::result::Result<T, cdc_sink::Error>`.
pub type Result<T> = std::result::Result<T, Error>;
