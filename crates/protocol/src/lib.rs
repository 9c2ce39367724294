//! Chute - Protocol
//!
//! Core message types shared by every component: the `(category, message)`
//! log entry, the mutable batch contract, and the handler interface the
//! ingestion layer and sources deliver into.
//!
//! # Batch Contract
//!
//! A batch is handed to a store as a mutable vector. On success the store has
//! taken responsibility for every entry. On failure the store removes the
//! prefix it handled, leaving exactly the unhandled suffix for the caller to
//! retry.

mod entry;

pub use entry::{batch_bytes, batch_from_messages, LogBatch, LogEntry};

use async_trait::async_trait;

/// Result of delivering a batch to the top-level handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    /// Every entry was accepted.
    Ok,
    /// Some entries were not accepted; the client should retry later.
    TryLater,
}

/// Top-level ingestion interface.
///
/// The RPC listener and the tail sources both deliver batches through this
/// trait; the daemon's category router is the production implementation.
#[async_trait]
pub trait LogHandler: Send + Sync {
    /// Deliver a batch for routing. Returns [`ResultCode::TryLater`] when any
    /// entry could not be accepted.
    async fn log(&self, batch: LogBatch) -> ResultCode;
}
