pub mod config;
pub mod dlq;
pub mod error;
pub mod event;
pub mod metrics;
pub mod processor;
pub mod replicator;
pub mod schema;
pub mod sql;
pub mod value;
pub mod writer;

pub mod kafka;
pub mod mysql;
pub mod pool;
pub mod postgres;

#[cfg(test)]
mod test_utils;

pub use config::Config;
pub use error::{Error, Result};
pub use replicator::Replicator;
