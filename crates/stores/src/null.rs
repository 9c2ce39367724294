//! Counted discard.

use async_trait::async_trait;
use chrono::{DateTime, Local};
use chute_config::StoreConfig;
use chute_protocol::LogBatch;

use crate::store::{Store, StoreContext, StoreCore};

/// Store that drops everything it receives, counting what it dropped under
/// the `ignored` counter. Trivially readable so it can stand in anywhere a
/// spool is expected.
pub struct NullStore {
    core: StoreCore,
}

impl NullStore {
    pub fn new(ctx: StoreContext, category: &str, multi_category: bool) -> Self {
        Self {
            core: StoreCore::new(ctx, category, multi_category),
        }
    }
}

#[async_trait]
impl Store for NullStore {
    fn category(&self) -> &str {
        &self.core.category
    }

    fn store_type(&self) -> &'static str {
        "null"
    }

    fn status(&self) -> String {
        self.core.status()
    }

    fn configure(&mut self, _config: &StoreConfig) {}

    async fn open(&mut self) -> bool {
        true
    }

    fn is_open(&self) -> bool {
        true
    }

    async fn close(&mut self) {}

    async fn flush(&mut self) {}

    async fn handle_messages(&mut self, batch: &mut LogBatch) -> bool {
        self.core
            .ctx
            .counters
            .increment(&self.core.category, "ignored", batch.len() as u64);
        batch.clear();
        true
    }

    fn copy(&self, category: &str) -> Box<dyn Store> {
        Box::new(NullStore::new(
            self.core.ctx.clone(),
            category,
            self.core.multi_category,
        ))
    }

    async fn read_oldest(&mut self, _now: DateTime<Local>, _out: &mut LogBatch) -> bool {
        true
    }

    async fn replace_oldest(&mut self, _batch: &mut LogBatch, _now: DateTime<Local>) -> bool {
        true
    }

    async fn delete_oldest(&mut self, _now: DateTime<Local>) {}

    async fn empty(&mut self, _now: DateTime<Local>) -> bool {
        true
    }
}

#[cfg(test)]
#[path = "null_test.rs"]
mod null_test;
