//! The store interface, shared store state, and the type-string factory.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use chute_config::StoreConfig;
use chute_metrics::CounterRegistry;
use chute_protocol::LogBatch;
use parking_lot::Mutex;

use crate::bucket::BucketStore;
use crate::buffer::BufferStore;
use crate::category::{CategoryStore, FramedMultiFileStore, MultiFileStore};
use crate::file::FileStore;
use crate::framed_file::FramedFileStore;
use crate::multi::MultiStore;
use crate::network::{ConnPool, NetworkStore, ServiceDiscovery, StaticDiscovery};
use crate::null::NullStore;

/// Shared collaborators handed to every store at construction.
///
/// The connection pool and discovery client are process-wide; the registry
/// collects the per-category counters the host process exposes.
#[derive(Clone)]
pub struct StoreContext {
    pub counters: Arc<CounterRegistry>,
    pub conn_pool: Arc<ConnPool>,
    pub discovery: Arc<dyn ServiceDiscovery>,
}

impl StoreContext {
    /// Context with a fresh pool and the given collaborators.
    pub fn new(counters: Arc<CounterRegistry>, discovery: Arc<dyn ServiceDiscovery>) -> Self {
        Self {
            counters,
            conn_pool: Arc::new(ConnPool::new()),
            discovery,
        }
    }
}

impl Default for StoreContext {
    fn default() -> Self {
        Self::new(
            Arc::new(CounterRegistry::new()),
            Arc::new(StaticDiscovery::default()),
        )
    }
}

/// A node in the store tree.
///
/// Lifecycle: constructed by [`create_store`], configured once, then opened
/// and closed any number of times (stores reopen themselves after errors).
/// Error reporting at the batch boundary is by boolean plus the status
/// string; nothing propagates across store boundaries as `Result`.
#[async_trait]
pub trait Store: Send + Sync {
    /// Category this store was created for.
    fn category(&self) -> &str;

    /// Short type name (`file`, `buffer`, …).
    fn store_type(&self) -> &'static str;

    /// Last error description; empty when healthy.
    fn status(&self) -> String;

    /// Parse this store's keys and instantiate children. Performs no I/O;
    /// fatal misconfiguration is recorded in the status string.
    fn configure(&mut self, config: &StoreConfig);

    /// Open the underlying resource. Returns false and sets status on
    /// failure.
    async fn open(&mut self) -> bool;

    /// True when the store can accept writes without reopening.
    fn is_open(&self) -> bool;

    async fn close(&mut self);

    async fn flush(&mut self);

    /// Consume a batch. On success the batch is drained. On failure the
    /// handled prefix is removed and the unhandled suffix remains.
    async fn handle_messages(&mut self, batch: &mut LogBatch) -> bool;

    /// Wall-clock maintenance: rotation, reconnection, buffer draining.
    /// Bounded work; never blocks the batch path.
    async fn periodic_check(&mut self) {}

    /// Construct a sibling configured identically for another category.
    /// Copies configuration, never runtime state.
    fn copy(&self, category: &str) -> Box<dyn Store>;

    // Spool-drain protocol. Only read-capable stores (file, null) override
    // these; the defaults log the misuse and fail.

    /// Append the contents of the oldest spool file to `out`. Returns true
    /// when the read succeeded (possibly with nothing to read).
    async fn read_oldest(&mut self, _now: DateTime<Local>, _out: &mut LogBatch) -> bool {
        tracing::error!(
            category = %self.category(),
            store_type = self.store_type(),
            "attempting to read from a write-only store"
        );
        false
    }

    /// Overwrite the oldest spool file with `batch`.
    async fn replace_oldest(&mut self, _batch: &mut LogBatch, _now: DateTime<Local>) -> bool {
        tracing::error!(
            category = %self.category(),
            store_type = self.store_type(),
            "attempting to replace in a write-only store"
        );
        false
    }

    /// Remove the oldest spool file.
    async fn delete_oldest(&mut self, _now: DateTime<Local>) {
        tracing::error!(
            category = %self.category(),
            store_type = self.store_type(),
            "attempting to delete from a write-only store"
        );
    }

    /// True when no spooled data remains.
    async fn empty(&mut self, _now: DateTime<Local>) -> bool {
        tracing::error!(
            category = %self.category(),
            store_type = self.store_type(),
            "attempting to poll a write-only store"
        );
        true
    }
}

/// State every store carries: identity, shared collaborators, and the
/// mutex-guarded status string.
pub(crate) struct StoreCore {
    pub category: String,
    pub multi_category: bool,
    pub ctx: StoreContext,
    status: Mutex<String>,
}

impl StoreCore {
    pub fn new(ctx: StoreContext, category: &str, multi_category: bool) -> Self {
        Self {
            category: category.to_string(),
            multi_category,
            ctx,
            status: Mutex::new(String::new()),
        }
    }

    /// Record the latest error description. An empty string marks the store
    /// healthy again.
    pub fn set_status(&self, status: impl Into<String>) {
        *self.status.lock() = status.into();
    }

    pub fn status(&self) -> String {
        self.status.lock().clone()
    }
}

/// Construct a store by its config type string.
///
/// `readable` asks for a store that supports the spool-drain protocol (used
/// for buffer secondaries); for file stores it selects the buffer-file
/// variant. Returns `None` for unknown types.
pub fn create_store(
    ctx: &StoreContext,
    store_type: &str,
    category: &str,
    readable: bool,
    multi_category: bool,
) -> Option<Box<dyn Store>> {
    let store: Box<dyn Store> = match store_type {
        "file" => Box::new(FileStore::new(ctx.clone(), category, multi_category, readable)),
        "framedfile" | "thriftfile" => {
            Box::new(FramedFileStore::new(ctx.clone(), category, multi_category))
        }
        "buffer" => Box::new(BufferStore::new(ctx.clone(), category, multi_category)),
        "network" => Box::new(NetworkStore::new(ctx.clone(), category, multi_category)),
        "bucket" => Box::new(BucketStore::new(ctx.clone(), category, multi_category)),
        "multi" => Box::new(MultiStore::new(ctx.clone(), category, multi_category)),
        "category" => Box::new(CategoryStore::new(ctx.clone(), category, multi_category)),
        "multifile" => Box::new(MultiFileStore::new(ctx.clone(), category, multi_category)),
        "framedmultifile" | "thriftmultifile" => {
            Box::new(FramedMultiFileStore::new(ctx.clone(), category, multi_category))
        }
        "null" => Box::new(NullStore::new(ctx.clone(), category, multi_category)),
        other => {
            tracing::error!(category, store_type = other, "unknown store type");
            return None;
        }
    };
    tracing::debug!(category, store_type, "created store");
    Some(store)
}

#[cfg(test)]
#[path = "store_test.rs"]
mod store_test;
