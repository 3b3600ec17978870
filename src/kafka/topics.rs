use crate::{Error, Result};
use rdkafka::consumer::Consumer;
use std::time::Duration;
use tracing::{debug, info, instrument};

const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

/// Table name encoded in a `<server>.<database>.<table>` topic.
pub fn table_from_topic(topic: &str) -> Option<&str> {
    topic.split('.').nth(2).filter(|table| !table.is_empty())
}

/// Topic names starting with `prefix`, sorted.
pub fn filter_topics<'a>(names: impl IntoIterator<Item = &'a str>, prefix: &str) -> Vec<String> {
    let mut topics: Vec<String> = names
        .into_iter()
        .filter(|name| name.starts_with(prefix))
        .map(str::to_string)
        .collect();
    topics.sort();
    topics.dedup();
    topics
}

/// Lists the change-event topics the broker currently knows about.
#[instrument(skip(consumer))]
pub fn discover_topics<C: Consumer>(consumer: &C, prefix: &str) -> Result<Vec<String>> {
    let metadata = consumer
        .fetch_metadata(None, METADATA_TIMEOUT)
        .map_err(Error::Kafka)?;

    let topics = filter_topics(metadata.topics().iter().map(|t| t.name()), prefix);
    for topic in &topics {
        debug!(topic = %topic, "Discovered CDC topic");
    }
    info!(count = topics.len(), "Discovered CDC topics");
    Ok(topics)
}
