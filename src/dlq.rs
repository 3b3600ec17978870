//! Dead-letter capture for events that could not be applied.
//!
//! Every failed event is kept in memory and, best effort, appended as one
//! JSON object per line to a side file. A failing file write is logged and
//! never stops the pipeline.
//!
//! # Example
//!
//! ```rust,no_run
//! use cdc_sink::dlq::DeadLetterQueue;
//!
//! #[tokio::main]
//! async fn main() {
//!     let dlq = DeadLetterQueue::open("var/dlq/dlq.jsonl").await;
//!     println!("{} entries so far", dlq.count().await);
//!     dlq.close().await;
//! }
//! ```

use crate::event::ChangeEvent;
use crate::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// One dead-lettered event, serialised as a single JSON line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DlqEntry {
    /// The original event, payload included
    pub event: ChangeEvent,
    /// Display form of the error that sent it here
    pub error: String,
    pub timestamp: DateTime<Utc>,
    /// Writer retries performed before giving up
    pub retries: u32,
}

struct DlqState {
    entries: Vec<DlqEntry>,
    file: Option<File>,
    closed: bool,
}

/// Append-only store of failed events.
///
/// Safe to share between workers; appends are serialised by an internal lock.
pub struct DeadLetterQueue {
    state: Mutex<DlqState>,
}

impl DeadLetterQueue {
    /// Opens (or creates) the side file at `path` for appending.
    ///
    /// If the directory or file cannot be created the queue still works,
    /// holding entries in memory only.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use cdc_sink::dlq::DeadLetterQueue;
    /// # async fn example() {
    /// let dlq = DeadLetterQueue::open("/var/lib/cdc-sink/dlq.jsonl").await;
    /// # }
    /// ```
    pub async fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let file = match open_append(path).await {
            Ok(file) => {
                info!(path = %path.display(), "Dead-letter file opened");
                Some(file)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to open dead-letter file, using memory only");
                None
            }
        };

        Self::with_file(file)
    }

    /// A queue without a side file.
    pub fn in_memory() -> Self {
        Self::with_file(None)
    }

    fn with_file(file: Option<File>) -> Self {
        Self {
            state: Mutex::new(DlqState {
                entries: Vec::new(),
                file,
                closed: false,
            }),
        }
    }

    /// Records `event` as failed with `err`.
    ///
    /// The in-memory record always succeeds; the file append is best effort.
    pub async fn send(&self, event: &ChangeEvent, err: &Error, retries: u32) {
        let entry = DlqEntry {
            event: event.clone(),
            error: err.to_string(),
            timestamp: Utc::now(),
            retries,
        };

        let mut state = self.state.lock().await;
        if let Some(file) = state.file.as_mut() {
            if let Err(e) = append_line(file, &entry).await {
                warn!(error = %e, "Failed to persist dead-letter entry");
            }
        }
        state.entries.push(entry);

        error!(
            table = %event.source_table,
            op = %event.op,
            topic = %event.routing.topic,
            partition = event.routing.partition,
            offset = event.offset,
            retries,
            error = %err,
            "Event sent to DLQ"
        );
    }

    pub async fn count(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn entries(&self) -> Vec<DlqEntry> {
        self.state.lock().await.entries.clone()
    }

    /// Flushes and closes the side file. Later calls do nothing.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }
        state.closed = true;

        if let Some(mut file) = state.file.take() {
            if let Err(e) = file.flush().await {
                warn!(error = %e, "Failed to flush dead-letter file");
            }
            if let Err(e) = file.sync_all().await {
                warn!(error = %e, "Failed to sync dead-letter file");
            }
        }
        info!(entries = state.entries.len(), "Dead-letter queue closed");
    }
}

async fn open_append(path: &Path) -> std::io::Result<File> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir).await?;
    }
    OpenOptions::new().create(true).append(true).open(path).await
}

async fn append_line(file: &mut File, entry: &DlqEntry) -> crate::Result<()> {
    let mut line = serde_json::to_vec(entry)?;
    line.push(b'\n');
    file.write_all(&line).await?;
    file.flush().await?;
    Ok(())
}
