//! Category routing: batches in, store trees out.
//!
//! Each `[[store]]` section of the config becomes one store tree. A tree
//! whose category matches an incoming entry exactly receives it; trees for
//! the `default` category are cloned per unseen category, so every category
//! ends up with its own tree driven serially from the handler.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chute_config::{DaemonConfig, StoreConfig};
use chute_metrics::CounterRegistry;
use chute_protocol::{LogBatch, LogHandler, ResultCode};
use chute_stores::{create_store, Store, StoreContext};
use tokio::sync::Mutex;

/// The daemon's batch entry point and owner of every store tree.
pub struct Router {
    ctx: StoreContext,
    inner: Mutex<RouterInner>,
}

struct RouterInner {
    /// Trees bound to one exact category.
    exact: HashMap<String, Vec<Box<dyn Store>>>,
    /// Model trees for the `default` category.
    defaults: Vec<Box<dyn Store>>,
    /// Per-category clones of the default trees.
    default_copies: HashMap<String, Vec<Box<dyn Store>>>,
}

impl Router {
    /// Build and open every configured store tree.
    ///
    /// A tree that fails to open is kept: stores reopen themselves on the
    /// next batch or periodic check.
    pub async fn from_config(ctx: StoreContext, config: &DaemonConfig) -> Self {
        let mut exact: HashMap<String, Vec<Box<dyn Store>>> = HashMap::new();
        let mut defaults = Vec::new();

        for section in &config.stores {
            let Some(store) = Self::build_tree(&ctx, section).await else {
                continue;
            };
            if store.category() == "default" {
                defaults.push(store);
            } else {
                exact.entry(store.category().to_string()).or_default().push(store);
            }
        }

        if exact.is_empty() && defaults.is_empty() {
            tracing::warn!("no store trees configured, everything will be rejected");
        }

        Self {
            ctx,
            inner: Mutex::new(RouterInner {
                exact,
                defaults,
                default_copies: HashMap::new(),
            }),
        }
    }

    async fn build_tree(ctx: &StoreContext, section: &StoreConfig) -> Option<Box<dyn Store>> {
        let Some(category) = section.get_string("category") else {
            tracing::error!("store section has no category, skipping");
            return None;
        };
        let Some(store_type) = section.get_string("type") else {
            tracing::error!(category, "store section has no type, skipping");
            return None;
        };

        let multi_category = category == "default";
        let mut store = create_store(ctx, store_type, category, false, multi_category)?;
        store.configure(section);

        let status = store.status();
        if !status.is_empty() {
            tracing::error!(category, status = %status, "store tree configured with errors");
        }
        if !store.open().await {
            tracing::warn!(category, "store tree failed to open, will retry on demand");
        }
        Some(store)
    }

    /// Shared counter registry.
    pub fn counters(&self) -> Arc<CounterRegistry> {
        Arc::clone(&self.ctx.counters)
    }

    /// Drive one maintenance tick through every tree.
    pub async fn periodic_check_all(&self) {
        let mut inner = self.inner.lock().await;
        for store in inner.all_trees_mut() {
            store.periodic_check().await;
        }
    }

    /// Flush every tree.
    pub async fn flush_all(&self) {
        let mut inner = self.inner.lock().await;
        for store in inner.all_trees_mut() {
            store.flush().await;
        }
    }

    /// Flush and close every tree; part of shutdown.
    pub async fn close_all(&self) {
        let mut inner = self.inner.lock().await;
        for store in inner.all_trees_mut() {
            store.flush().await;
            store.close().await;
        }
    }

    /// Store status strings per category, for health reporting. Empty
    /// strings mean healthy.
    pub async fn statuses(&self) -> Vec<(String, String)> {
        let mut inner = self.inner.lock().await;
        inner
            .all_trees_mut()
            .map(|store| (store.category().to_string(), store.status()))
            .collect()
    }
}

impl RouterInner {
    fn all_trees_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn Store>> {
        self.exact
            .values_mut()
            .flatten()
            .chain(self.defaults.iter_mut())
            .chain(self.default_copies.values_mut().flatten())
    }

    /// Trees serving `category`, cloning the default trees on first sight
    /// of a new category.
    async fn trees_for(&mut self, category: &str) -> Option<&mut Vec<Box<dyn Store>>> {
        if !self.exact.contains_key(category) && !self.default_copies.contains_key(category) {
            let mut copies = Vec::with_capacity(self.defaults.len());
            for model in &self.defaults {
                let mut copy = model.copy(category);
                copy.open().await;
                copies.push(copy);
            }
            self.default_copies.insert(category.to_string(), copies);
        }

        if let Some(trees) = self.exact.get_mut(category) {
            return Some(trees);
        }
        self.default_copies.get_mut(category)
    }
}

#[async_trait]
impl LogHandler for Router {
    async fn log(&self, batch: LogBatch) -> ResultCode {
        if batch.is_empty() {
            return ResultCode::Ok;
        }

        // Split by category, preserving arrival order within each.
        let mut order: Vec<String> = Vec::new();
        let mut grouped: HashMap<String, LogBatch> = HashMap::new();
        for entry in batch {
            let group = grouped.entry(entry.category.clone()).or_default();
            if group.is_empty() {
                order.push(entry.category.clone());
            }
            group.push(entry);
        }

        let mut inner = self.inner.lock().await;
        let mut result = ResultCode::Ok;

        for category in order {
            let sub_batch = match grouped.remove(&category) {
                Some(sub_batch) => sub_batch,
                None => continue,
            };
            let count = sub_batch.len() as u64;

            let trees = match inner.trees_for(&category).await {
                Some(trees) if !trees.is_empty() => trees,
                _ => {
                    tracing::debug!(category = %category, "no store tree for category, rejecting");
                    result = ResultCode::TryLater;
                    continue;
                }
            };

            let mut delivered = true;
            for store in trees.iter_mut() {
                let mut tree_batch = sub_batch.clone();
                if !store.handle_messages(&mut tree_batch).await {
                    tracing::warn!(
                        category = %category,
                        remaining = tree_batch.len(),
                        status = %store.status(),
                        "store tree failed a batch"
                    );
                    delivered = false;
                }
            }

            if delivered {
                self.ctx.counters.increment(&category, "received good", count);
            } else {
                result = ResultCode::TryLater;
            }
        }

        result
    }
}

#[cfg(test)]
#[path = "router_test.rs"]
mod router_test;
