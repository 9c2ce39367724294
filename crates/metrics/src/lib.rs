//! Chute - Metrics
//!
//! Process-wide per-category counters. Stores and sources increment named
//! counters (`retries`, `lost`, `ignored`, `tail good`, `tail bad`, …); the
//! host process snapshots them for whatever metrics surface it exposes.

mod registry;

pub use registry::{CounterRegistry, CounterSnapshot};
