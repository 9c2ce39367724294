//! Log entry and batch types.

use std::sync::Arc;

/// A single log record: a routing category and an opaque message body.
///
/// Messages are byte strings; embedded newlines, NULs, and framing
/// delimiters are all legal payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Routing category for this record.
    pub category: String,

    /// Opaque message body.
    pub message: Vec<u8>,
}

impl LogEntry {
    /// Create an entry from a category and message body.
    pub fn new(category: impl Into<String>, message: impl Into<Vec<u8>>) -> Self {
        Self {
            category: category.into(),
            message: message.into(),
        }
    }

    /// Message body as UTF-8, if it is valid UTF-8.
    pub fn message_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.message).ok()
    }
}

/// An ordered batch of entries, mutated in place by stores.
///
/// Entries are reference-counted so fan-out stores can split and replicate a
/// batch without copying message bodies.
pub type LogBatch = Vec<Arc<LogEntry>>;

/// Total payload bytes across a batch.
pub fn batch_bytes(batch: &LogBatch) -> usize {
    batch.iter().map(|e| e.message.len()).sum()
}

/// Build a batch for one category from raw message bodies.
pub fn batch_from_messages<I, M>(category: &str, messages: I) -> LogBatch
where
    I: IntoIterator<Item = M>,
    M: Into<Vec<u8>>,
{
    messages
        .into_iter()
        .map(|m| Arc::new(LogEntry::new(category, m)))
        .collect()
}

#[cfg(test)]
#[path = "entry_test.rs"]
mod entry_test;
