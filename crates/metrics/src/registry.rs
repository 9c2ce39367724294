//! Concurrent counter registry keyed by `(category, counter)`.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

/// Process-wide counter registry.
///
/// Increments are lock-free once a counter exists; creation takes a shard
/// lock. Counters are never removed.
#[derive(Debug, Default)]
pub struct CounterRegistry {
    counters: DashMap<(String, String), AtomicU64>,
}

impl CounterRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `n` to the counter named `counter` for `category`.
    pub fn increment(&self, category: &str, counter: &str, n: u64) {
        if let Some(existing) = self.counters.get(&(category.to_string(), counter.to_string())) {
            existing.fetch_add(n, Ordering::Relaxed);
            return;
        }
        self.counters
            .entry((category.to_string(), counter.to_string()))
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(n, Ordering::Relaxed);
    }

    /// Current value of a counter; zero if it was never incremented.
    pub fn get(&self, category: &str, counter: &str) -> u64 {
        self.counters
            .get(&(category.to_string(), counter.to_string()))
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Snapshot of every counter, sorted by category then counter name.
    pub fn snapshot(&self) -> Vec<CounterSnapshot> {
        let mut all: Vec<CounterSnapshot> = self
            .counters
            .iter()
            .map(|entry| {
                let (category, counter) = entry.key();
                CounterSnapshot {
                    category: category.clone(),
                    counter: counter.clone(),
                    value: entry.value().load(Ordering::Relaxed),
                }
            })
            .collect();
        all.sort_by(|a, b| (&a.category, &a.counter).cmp(&(&b.category, &b.counter)));
        all
    }
}

/// Point-in-time value of one counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub category: String,
    pub counter: String,
    pub value: u64,
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod registry_test;
