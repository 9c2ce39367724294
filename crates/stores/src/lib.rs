//! Chute - Stores
//!
//! The store composition engine. A store consumes batches of log entries and
//! either writes them locally, forwards them, splits them across children,
//! spools them for later, or discards them. Stores nest: a `buffer` wraps a
//! primary and a secondary, a `bucket` fans out by hash, a `multi`
//! replicates, a `category` lazily clones a template per observed category.
//!
//! # Available Stores
//!
//! | Type | Purpose |
//! |------|---------|
//! | `file` | rotating local files, optional per-message framing |
//! | `framedfile` | rotation with framing delegated to the framed backend |
//! | `buffer` | durability state machine over primary + secondary |
//! | `network` | forward to an upstream relay |
//! | `bucket` | hash-shard across N+1 children |
//! | `multi` | replicate across children |
//! | `category` | per-category clone of a template store |
//! | `multifile` | per-category file store |
//! | `framedmultifile` | per-category framed file store |
//! | `null` | counted discard |
//!
//! The legacy type names `thriftfile` and `thriftmultifile` are accepted as
//! aliases for the framed variants.
//!
//! # Batch Contract
//!
//! `handle_messages` consumes the batch on success (the vector is drained).
//! On failure the handled prefix is removed and exactly the unhandled suffix
//! remains for the caller to retry or spool.

mod bucket;
mod buffer;
mod category;
mod file;
mod file_backend;
mod file_base;
mod framed_file;
mod multi;
mod network;
mod null;
mod store;

pub use bucket::{BucketStore, BucketType};
pub use buffer::{BufferState, BufferStore};
pub use category::{CategoryStore, FramedMultiFileStore, MultiFileStore};
pub use file::FileStore;
pub use file_backend::{create_backend, FileBackend, FramedFile, PlainFile};
pub use file_base::{parse_roll_period, RollPeriod};
pub use framed_file::FramedFileStore;
pub use multi::{MultiStore, ReportSuccess};
pub use network::{ConnPool, HostPort, NetworkStore, RelayConn, ServiceDiscovery, StaticDiscovery};
pub use null::NullStore;
pub use store::{create_store, Store, StoreContext};
