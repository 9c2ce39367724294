//! Hash-sharding across child stores.
//!
//! Messages hash into buckets 1 through `num_buckets`; bucket 0 is the
//! failure bucket for anything that cannot be bucketized (no key, no
//! delimiter, zero id, unparsable number). The store owns `num_buckets + 1`
//! children, defined either explicitly (`bucket0` … `bucketN`) or expanded
//! from a single `bucket` template plus a `bucket_subdir` naming rule.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use chute_config::StoreConfig;
use chute_protocol::{LogBatch, LogEntry};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::store::{create_store, Store, StoreContext, StoreCore};

const DEFAULT_DELIMITER: u8 = b':';

/// How messages map to buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketType {
    /// Key is in ASCII after the third 0x01 delimiter byte.
    ContextLog,
    /// Uniformly random bucket.
    Random,
    /// Hash of the prefix before the delimiter.
    KeyHash,
    /// Prefix parsed as an integer, modulo the bucket count.
    KeyModulo,
    /// Prefix mapped through a fixed key range.
    KeyRange,
}

/// Store that shards each batch across `num_buckets + 1` children.
pub struct BucketStore {
    core: StoreCore,
    bucket_type: BucketType,
    delimiter: u8,
    remove_key: bool,
    opened: bool,
    bucket_range: u64,
    num_buckets: u64,
    buckets: Vec<Box<dyn Store>>,
    rng: SmallRng,
}

impl BucketStore {
    pub fn new(ctx: StoreContext, category: &str, multi_category: bool) -> Self {
        Self {
            core: StoreCore::new(ctx, category, multi_category),
            bucket_type: BucketType::ContextLog,
            delimiter: DEFAULT_DELIMITER,
            remove_key: false,
            opened: false,
            bucket_range: 0,
            num_buckets: 1,
            buckets: Vec::new(),
            rng: SmallRng::from_entropy(),
        }
    }

    fn config_error(&mut self, message: &str) {
        self.core.set_status(message);
        tracing::error!(category = %self.core.category, "bad config - {}", message);
        self.num_buckets = 0;
        self.buckets.clear();
    }

    /// Expand a single `bucket` template into `num_buckets + 1` children,
    /// deriving a per-bucket `file_path` from `bucket_subdir`.
    fn create_buckets_from_template(&mut self, config: &StoreConfig, template: &StoreConfig) {
        if config.get_store("bucket0").is_some() || config.get_store("bucket1").is_some() {
            self.config_error("bucket store has too many buckets defined");
            return;
        }

        let store_type = template.get_string("type").unwrap_or_default().to_string();
        if store_type != "file" && store_type != "thriftfile" && store_type != "framedfile" {
            self.config_error(
                "store contained in a bucket store must have a type of \
                 either file or framedfile if not defined explicitly",
            );
            return;
        }

        let Some(bucket_subdir) = config.get_string("bucket_subdir").map(str::to_string) else {
            self.config_error("bucketizer containing file stores must have a bucket_subdir");
            return;
        };
        let Some(path) = template.get_string("file_path").map(str::to_string) else {
            self.config_error("file store contained by bucketizer must have a file_path");
            return;
        };

        let bucket_offset = config.get_unsigned("bucket_offset").unwrap_or(0);
        let failure_bucket = config
            .get_string("failure_bucket")
            .unwrap_or_default()
            .to_string();

        for i in 0..=self.num_buckets {
            let Some(mut bucket) = create_store(
                &self.core.ctx,
                &store_type,
                &self.core.category,
                false,
                self.core.multi_category,
            ) else {
                self.config_error(&format!("can't create store of type: {}", store_type));
                return;
            };

            // Each bucket writes under its own numbered subdirectory.
            let mut bucket_config = template.clone();
            if i == 0 && !failure_bucket.is_empty() {
                bucket_config.set_string("file_path", format!("{}/{}", path, failure_bucket));
            } else {
                let bucket_id = i + bucket_offset;
                bucket_config.set_string(
                    "file_path",
                    format!("{}/{}{:03}", path, bucket_subdir, bucket_id),
                );
            }

            bucket.configure(&bucket_config);
            self.buckets.push(bucket);
        }
    }

    /// Configure one explicitly defined store per bucket number.
    fn create_buckets(&mut self, config: &StoreConfig) {
        if config.get_string("bucket_subdir").is_some() {
            self.config_error("cannot have bucket_subdir when defining multiple buckets");
            return;
        }
        if config.get_string("bucket_offset").is_some() {
            self.config_error("cannot have bucket_offset when defining multiple buckets");
            return;
        }
        if config.get_string("failure_bucket").is_some() {
            self.config_error("cannot have failure_bucket when defining multiple buckets");
            return;
        }

        for i in 0..=self.num_buckets {
            let bucket_name = format!("bucket{}", i);
            let Some(bucket_config) = config.get_store(&bucket_name) else {
                self.config_error(&format!("could not find bucket definition for {}", bucket_name));
                return;
            };
            let Some(store_type) = bucket_config.get_string("type") else {
                self.config_error("store contained in a bucket store must have a type");
                return;
            };

            let Some(mut bucket) = create_store(
                &self.core.ctx,
                store_type,
                &self.core.category,
                false,
                self.core.multi_category,
            ) else {
                self.config_error(&format!("can't create store of type: {}", store_type));
                return;
            };
            bucket.configure(bucket_config);
            self.buckets.push(bucket);
        }

        let extra = format!("bucket{}", self.num_buckets + 1);
        if config.get_store(&extra).is_some() {
            self.config_error("bucket store has too many buckets defined");
        }
    }

    /// Bucket index for a message. Zero means unbucketizable.
    fn bucketize(&mut self, message: &[u8]) -> usize {
        match self.bucket_type {
            BucketType::ContextLog => {
                // The key is in ASCII after the third delimiter.
                let delim = 1u8;
                let mut pos = 0usize;
                for _ in 0..3 {
                    match message[pos..].iter().position(|&b| b == delim) {
                        Some(offset) if pos + offset + 1 < message.len() => {
                            pos += offset + 1;
                        }
                        _ => return 0,
                    }
                }
                if message[pos] == delim {
                    return 0;
                }

                let id = parse_leading_u64(&message[pos..]);
                if id == 0 || self.num_buckets == 0 {
                    return 0;
                }
                (hash_of(&id) % self.num_buckets) as usize + 1
            }
            BucketType::Random => {
                if self.num_buckets == 0 {
                    return 0;
                }
                self.rng.gen_range(0..self.num_buckets) as usize + 1
            }
            _ => {
                // Everything before the first delimiter is the key.
                let Some(pos) = message.iter().position(|&b| b == self.delimiter) else {
                    return 0;
                };
                let key = &message[..pos];
                if key.is_empty() || self.num_buckets == 0 {
                    return 0;
                }

                match self.bucket_type {
                    BucketType::KeyModulo => (parse_leading_u64(key) % self.num_buckets) as usize + 1,
                    BucketType::KeyRange => {
                        if self.bucket_range == 0 {
                            0
                        } else {
                            // Which bucket the key would land in if the
                            // modulo ran over bucket_range instead.
                            let key_mod = parse_leading_u64(key) % self.bucket_range;
                            ((key_mod as f64 / self.bucket_range as f64)
                                * self.num_buckets as f64) as usize
                                + 1
                        }
                    }
                    _ => (hash_of(&key) % self.num_buckets) as usize + 1,
                }
            }
        }
    }

    fn message_without_key(&self, message: &[u8]) -> Vec<u8> {
        match message.iter().position(|&b| b == self.delimiter) {
            Some(pos) => message[pos + 1..].to_vec(),
            None => message.to_vec(),
        }
    }
}

fn hash_of<T: Hash>(value: &T) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Leading ASCII digits of `bytes` as a number; zero when there are none.
fn parse_leading_u64(bytes: &[u8]) -> u64 {
    let mut value: u64 = 0;
    let mut seen = false;
    for &b in bytes {
        if b.is_ascii_digit() {
            seen = true;
            value = value.wrapping_mul(10).wrapping_add(u64::from(b - b'0'));
        } else {
            break;
        }
    }
    if seen {
        value
    } else {
        0
    }
}

#[async_trait]
impl Store for BucketStore {
    fn category(&self) -> &str {
        &self.core.category
    }

    fn store_type(&self) -> &'static str {
        "bucket"
    }

    fn status(&self) -> String {
        let mut status = self.core.status();
        let mut iter = self.buckets.iter();
        while status.is_empty() {
            match iter.next() {
                Some(bucket) => status = bucket.status(),
                None => break,
            }
        }
        status
    }

    fn configure(&mut self, config: &StoreConfig) {
        let bucketizer = config.get_string("bucket_type").unwrap_or_default();
        let mut need_delimiter = false;
        match bucketizer {
            "context_log" => self.bucket_type = BucketType::ContextLog,
            "random" => self.bucket_type = BucketType::Random,
            "key_hash" => {
                self.bucket_type = BucketType::KeyHash;
                need_delimiter = true;
            }
            "key_modulo" => {
                self.bucket_type = BucketType::KeyModulo;
                need_delimiter = true;
            }
            "key_range" => {
                self.bucket_type = BucketType::KeyRange;
                need_delimiter = true;
                self.bucket_range = config.get_unsigned("bucket_range").unwrap_or(0);
                if self.bucket_range == 0 {
                    tracing::warn!(category = %self.core.category, "bucket_range is 0");
                }
            }
            _ => {}
        }

        if need_delimiter {
            match config.get_unsigned("delimiter") {
                Some(value) if (1..=255).contains(&value) => self.delimiter = value as u8,
                Some(_) => {
                    tracing::warn!(
                        category = %self.core.category,
                        "delimiter does not fit in a byte, using default"
                    );
                    self.delimiter = DEFAULT_DELIMITER;
                }
                None => {
                    // Also accept a literal character.
                    match config.get_string("delimiter") {
                        Some(s) if s.len() == 1 => self.delimiter = s.as_bytes()[0],
                        _ => self.delimiter = DEFAULT_DELIMITER,
                    }
                }
            }
        }

        if config.get_flag("remove_key") == Some(true) {
            self.remove_key = true;
            if self.bucket_type == BucketType::ContextLog {
                self.config_error("bucketizer store of type context_log does not support remove_key");
                return;
            }
        }

        let Some(num_buckets) = config.get_unsigned("num_buckets") else {
            self.config_error("bucket store must have num_buckets");
            return;
        };
        self.num_buckets = num_buckets;

        // Buckets are defined explicitly or expanded from a template.
        match config.get_store("bucket") {
            Some(template) => self.create_buckets_from_template(config, template),
            None => self.create_buckets(config),
        }
    }

    async fn open(&mut self) -> bool {
        // One extra bucket for messages that can't be hashed.
        if self.num_buckets == 0 || self.buckets.len() as u64 != self.num_buckets + 1 {
            tracing::error!(
                category = %self.core.category,
                have = self.buckets.len(),
                want = self.num_buckets + 1,
                "can't open bucket store with wrong bucket count"
            );
            return false;
        }

        for i in 0..self.buckets.len() {
            if !self.buckets[i].open().await {
                self.close().await;
                self.opened = false;
                return false;
            }
        }
        self.opened = true;
        true
    }

    fn is_open(&self) -> bool {
        self.opened
    }

    async fn close(&mut self) {
        // Closing an already-closed child is harmless, so this runs even
        // when only some children opened.
        for bucket in self.buckets.iter_mut() {
            bucket.close().await;
        }
        self.opened = false;
    }

    async fn flush(&mut self) {
        for bucket in self.buckets.iter_mut() {
            bucket.flush().await;
        }
    }

    async fn handle_messages(&mut self, batch: &mut LogBatch) -> bool {
        if self.num_buckets == 0 {
            tracing::error!(category = %self.core.category, "failed to write - no buckets configured");
            self.core.set_status("Failed write to bucket store");
            return false;
        }

        // Partition the batch by bucket.
        let mut bucketed: Vec<LogBatch> = vec![LogBatch::new(); self.num_buckets as usize + 1];
        for entry in batch.drain(..) {
            let bucket = self.bucketize(&entry.message);
            bucketed[bucket].push(entry);
        }

        // One sub-batch per child; failures accumulate back into the input
        // batch.
        let mut failed = LogBatch::new();
        let mut success = true;
        for (i, sub_batch) in bucketed.into_iter().enumerate() {
            if sub_batch.is_empty() {
                continue;
            }

            if self.remove_key {
                let mut rewritten: LogBatch = sub_batch
                    .iter()
                    .map(|entry| {
                        Arc::new(LogEntry {
                            category: entry.category.clone(),
                            message: self.message_without_key(&entry.message),
                        })
                    })
                    .collect();
                if !self.buckets[i].handle_messages(&mut rewritten).await {
                    // Requeue the originals; the rewritten copies can't be
                    // mapped back once partially handled.
                    failed.extend(sub_batch);
                    success = false;
                }
            } else {
                let mut sub_batch = sub_batch;
                if !self.buckets[i].handle_messages(&mut sub_batch).await {
                    failed.extend(sub_batch);
                    success = false;
                }
            }
        }

        if !success {
            *batch = failed;
        }
        success
    }

    async fn periodic_check(&mut self) {
        for bucket in self.buckets.iter_mut() {
            bucket.periodic_check().await;
        }
    }

    fn copy(&self, category: &str) -> Box<dyn Store> {
        let mut store = BucketStore::new(self.core.ctx.clone(), category, self.core.multi_category);
        store.num_buckets = self.num_buckets;
        store.bucket_type = self.bucket_type;
        store.delimiter = self.delimiter;
        store.remove_key = self.remove_key;
        store.bucket_range = self.bucket_range;
        store.buckets = self.buckets.iter().map(|b| b.copy(category)).collect();
        Box::new(store)
    }
}

#[cfg(test)]
#[path = "bucket_test.rs"]
mod bucket_test;
