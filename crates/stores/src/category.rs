//! Per-category instantiation of a template store.
//!
//! A category store holds a model store and clones it for every category it
//! sees; each clone handles exactly one category and is never reused for
//! another. `multifile` and `framedmultifile` are shorthands that fix the
//! model type and treat their own config as the model config.

use std::collections::HashMap;

use async_trait::async_trait;
use chute_config::StoreConfig;
use chute_protocol::LogBatch;

use crate::store::{create_store, Store, StoreContext, StoreCore};

/// Store that lazily creates one child per observed category.
pub struct CategoryStore {
    core: StoreCore,
    name: &'static str,
    model: Option<Box<dyn Store>>,
    stores: HashMap<String, Box<dyn Store>>,
}

impl CategoryStore {
    pub fn new(ctx: StoreContext, category: &str, multi_category: bool) -> Self {
        Self::with_name(ctx, category, multi_category, "category")
    }

    fn with_name(
        ctx: StoreContext,
        category: &str,
        multi_category: bool,
        name: &'static str,
    ) -> Self {
        Self {
            core: StoreCore::new(ctx, category, multi_category),
            name,
            model: None,
            stores: HashMap::new(),
        }
    }

    /// Build the model store every per-category child is cloned from.
    fn configure_model(&mut self, config: &StoreConfig, store_type: &str) {
        match create_store(&self.core.ctx, store_type, &self.core.category, false, false) {
            Some(mut model) => {
                model.configure(config);
                tracing::info!(
                    category = %self.core.category,
                    store = self.name,
                    model_type = store_type,
                    "configured model store"
                );
                self.model = Some(model);
            }
            None => {
                self.core.set_status("Could not create model store.");
            }
        }
    }
}

#[async_trait]
impl Store for CategoryStore {
    fn category(&self) -> &str {
        &self.core.category
    }

    fn store_type(&self) -> &'static str {
        self.name
    }

    fn status(&self) -> String {
        self.core.status()
    }

    fn configure(&mut self, config: &StoreConfig) {
        let Some(model_config) = config.get_store("model") else {
            self.core.set_status("No model store found, invalid store.");
            tracing::error!(category = %self.core.category, "no model store found, invalid category store");
            return;
        };
        let Some(store_type) = model_config.get_string("type") else {
            self.core.set_status("Model store is missing type.");
            tracing::error!(category = %self.core.category, "model store is missing type");
            return;
        };
        self.configure_model(model_config, store_type);
    }

    async fn open(&mut self) -> bool {
        let mut result = true;
        for store in self.stores.values_mut() {
            result &= store.open().await;
        }
        result
    }

    fn is_open(&self) -> bool {
        self.stores.values().all(|store| store.is_open())
    }

    async fn close(&mut self) {
        for store in self.stores.values_mut() {
            store.close().await;
        }
    }

    async fn flush(&mut self) {
        for store in self.stores.values_mut() {
            store.flush().await;
        }
    }

    async fn handle_messages(&mut self, batch: &mut LogBatch) -> bool {
        let mut failed = LogBatch::new();

        for entry in batch.drain(..) {
            let category = entry.category.clone();

            if !self.stores.contains_key(&category) {
                // First message for this category; clone the model.
                match self.model.as_ref() {
                    Some(model) => {
                        let mut store = model.copy(&category);
                        store.open().await;
                        self.stores.insert(category.clone(), store);
                    }
                    None => {
                        failed.push(entry);
                        continue;
                    }
                }
            }

            let Some(store) = self.stores.get_mut(&category) else {
                failed.push(entry);
                continue;
            };
            if !store.is_open() {
                tracing::error!(
                    category = %self.core.category,
                    entry_category = %category,
                    "failed to open store for category"
                );
                failed.push(entry);
                continue;
            }

            let mut single = vec![entry.clone()];
            if !store.handle_messages(&mut single).await {
                tracing::error!(
                    category = %self.core.category,
                    entry_category = %category,
                    "failed to handle message for category"
                );
                failed.push(entry);
            }
        }

        if failed.is_empty() {
            true
        } else {
            *batch = failed;
            false
        }
    }

    async fn periodic_check(&mut self) {
        for store in self.stores.values_mut() {
            store.periodic_check().await;
        }
    }

    fn copy(&self, category: &str) -> Box<dyn Store> {
        let mut store =
            CategoryStore::with_name(self.core.ctx.clone(), category, self.core.multi_category, self.name);
        store.model = self.model.as_ref().map(|m| m.copy(category));
        Box::new(store)
    }
}

/// Category store whose model is always a file store, configured directly
/// from this store's own config.
pub struct MultiFileStore {
    inner: CategoryStore,
}

impl MultiFileStore {
    pub fn new(ctx: StoreContext, category: &str, multi_category: bool) -> Self {
        Self {
            inner: CategoryStore::with_name(ctx, category, multi_category, "multifile"),
        }
    }
}

#[async_trait]
impl Store for MultiFileStore {
    fn category(&self) -> &str {
        self.inner.category()
    }

    fn store_type(&self) -> &'static str {
        "multifile"
    }

    fn status(&self) -> String {
        self.inner.status()
    }

    fn configure(&mut self, config: &StoreConfig) {
        self.inner.configure_model(config, "file");
    }

    async fn open(&mut self) -> bool {
        self.inner.open().await
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    async fn close(&mut self) {
        self.inner.close().await;
    }

    async fn flush(&mut self) {
        self.inner.flush().await;
    }

    async fn handle_messages(&mut self, batch: &mut LogBatch) -> bool {
        self.inner.handle_messages(batch).await
    }

    async fn periodic_check(&mut self) {
        self.inner.periodic_check().await;
    }

    fn copy(&self, category: &str) -> Box<dyn Store> {
        let mut store = MultiFileStore::new(
            self.inner.core.ctx.clone(),
            category,
            self.inner.core.multi_category,
        );
        store.inner.model = self.inner.model.as_ref().map(|m| m.copy(category));
        Box::new(store)
    }
}

/// Category store whose model is always a framed file store.
pub struct FramedMultiFileStore {
    inner: CategoryStore,
}

impl FramedMultiFileStore {
    pub fn new(ctx: StoreContext, category: &str, multi_category: bool) -> Self {
        Self {
            inner: CategoryStore::with_name(ctx, category, multi_category, "framedmultifile"),
        }
    }
}

#[async_trait]
impl Store for FramedMultiFileStore {
    fn category(&self) -> &str {
        self.inner.category()
    }

    fn store_type(&self) -> &'static str {
        "framedmultifile"
    }

    fn status(&self) -> String {
        self.inner.status()
    }

    fn configure(&mut self, config: &StoreConfig) {
        self.inner.configure_model(config, "framedfile");
    }

    async fn open(&mut self) -> bool {
        self.inner.open().await
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    async fn close(&mut self) {
        self.inner.close().await;
    }

    async fn flush(&mut self) {
        self.inner.flush().await;
    }

    async fn handle_messages(&mut self, batch: &mut LogBatch) -> bool {
        self.inner.handle_messages(batch).await
    }

    async fn periodic_check(&mut self) {
        self.inner.periodic_check().await;
    }

    fn copy(&self, category: &str) -> Box<dyn Store> {
        let mut store = FramedMultiFileStore::new(
            self.inner.core.ctx.clone(),
            category,
            self.inner.core.multi_category,
        );
        store.inner.model = self.inner.model.as_ref().map(|m| m.copy(category));
        Box::new(store)
    }
}

#[cfg(test)]
#[path = "category_test.rs"]
mod category_test;
