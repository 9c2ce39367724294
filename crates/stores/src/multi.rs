//! Replication across child stores.

use async_trait::async_trait;
use chute_config::StoreConfig;
use chute_protocol::LogBatch;

use crate::store::{create_store, Store, StoreContext, StoreCore};

/// Whether a fan-out call succeeds when all children succeed, or any child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportSuccess {
    All,
    Any,
}

/// Store that hands every batch to every child.
///
/// Each child receives its own copy of the batch regardless of what earlier
/// children did; there is no inter-child ordering.
pub struct MultiStore {
    core: StoreCore,
    stores: Vec<Box<dyn Store>>,
    report_success: ReportSuccess,
}

impl MultiStore {
    pub fn new(ctx: StoreContext, category: &str, multi_category: bool) -> Self {
        Self {
            core: StoreCore::new(ctx, category, multi_category),
            stores: Vec::new(),
            report_success: ReportSuccess::All,
        }
    }

    fn combine(&self, all: bool, any: bool) -> bool {
        match self.report_success {
            ReportSuccess::All => all,
            ReportSuccess::Any => any,
        }
    }
}

#[async_trait]
impl Store for MultiStore {
    fn category(&self) -> &str {
        &self.core.category
    }

    fn store_type(&self) -> &'static str {
        "multi"
    }

    fn status(&self) -> String {
        self.core.status()
    }

    fn configure(&mut self, config: &StoreConfig) {
        match config.get_string("report_success") {
            Some("all") | None => self.report_success = ReportSuccess::All,
            Some("any") => self.report_success = ReportSuccess::Any,
            Some(other) => {
                tracing::error!(
                    category = %self.core.category,
                    report_success = other,
                    "invalid value for report_success"
                );
                self.core.set_status("Invalid report_success value.");
                return;
            }
        }

        // Children are store0, store1, …; numbering may start at 0 or 1.
        let mut i = 0usize;
        loop {
            let name = format!("store{}", i);
            match config.get_store(&name) {
                None => {
                    if i == 0 {
                        i += 1;
                        continue;
                    }
                    break;
                }
                Some(child_config) => {
                    let Some(child_type) = child_config.get_string("type") else {
                        tracing::error!(
                            category = %self.core.category,
                            store = %name,
                            "multi store child is missing type"
                        );
                        self.core.set_status("Child store is missing type.");
                        return;
                    };
                    if let Some(mut child) = create_store(
                        &self.core.ctx,
                        child_type,
                        &self.core.category,
                        false,
                        self.core.multi_category,
                    ) {
                        child.configure(child_config);
                        self.stores.push(child);
                    }
                }
            }
            i += 1;
        }

        if self.stores.is_empty() {
            tracing::error!(category = %self.core.category, "no children found, invalid multi store");
            self.core.set_status("No stores found, invalid store.");
        }
    }

    async fn open(&mut self) -> bool {
        let mut all = true;
        let mut any = false;
        for store in self.stores.iter_mut() {
            let opened = store.open().await;
            all &= opened;
            any |= opened;
        }
        self.combine(all, any)
    }

    fn is_open(&self) -> bool {
        let mut all = true;
        let mut any = false;
        for store in &self.stores {
            let open = store.is_open();
            all &= open;
            any |= open;
        }
        self.combine(all, any)
    }

    async fn close(&mut self) {
        for store in self.stores.iter_mut() {
            store.close().await;
        }
    }

    async fn flush(&mut self) {
        for store in self.stores.iter_mut() {
            store.flush().await;
        }
    }

    async fn handle_messages(&mut self, batch: &mut LogBatch) -> bool {
        let mut all = true;
        let mut any = false;
        for store in self.stores.iter_mut() {
            let mut child_batch = batch.clone();
            let handled = store.handle_messages(&mut child_batch).await;
            all &= handled;
            any |= handled;
        }

        // Children can partially succeed independently, so there is no
        // meaningful handled prefix to remove; a reported failure leaves the
        // whole batch for the caller.
        let success = self.combine(all, any);
        if success {
            batch.clear();
        }
        success
    }

    async fn periodic_check(&mut self) {
        for store in self.stores.iter_mut() {
            store.periodic_check().await;
        }
    }

    fn copy(&self, category: &str) -> Box<dyn Store> {
        let mut store = MultiStore::new(self.core.ctx.clone(), category, self.core.multi_category);
        store.report_success = self.report_success;
        store.stores = self.stores.iter().map(|s| s.copy(category)).collect();
        Box::new(store)
    }
}

#[cfg(test)]
#[path = "multi_test.rs"]
mod multi_test;
