//! Kafka ingress: topic discovery, message decoding and the group consumer.

pub mod consumer;
pub mod decoder;
pub mod topics;

pub use consumer::EventConsumer;
pub use decoder::decode_message;
pub use topics::{discover_topics, table_from_topic};
