//! Durability state machine over a primary and a secondary store.
//!
//! While the primary is healthy the store streams straight through it. When
//! the primary fails, batches spool to the secondary (a read-capable file
//! store); once the primary recovers, spooled batches drain back through it
//! in order before streaming resumes.
//!
//! ```text
//!              open() ok
//!   (init) ───────────────► SENDING_BUFFER ──drained──► STREAMING
//!     │                           │                        │
//!     │ open() fail               │ primary fail           │ primary fail, or
//!     ▼                           ▼                        │ batch > max_queue_length
//! DISCONNECTED ◄────────────── (any) ◄────────────────────┘
//! ```

use async_trait::async_trait;
use chrono::Local;
use chute_config::StoreConfig;
use chute_protocol::LogBatch;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::store::{create_store, Store, StoreContext, StoreCore};

const DEFAULT_MAX_QUEUE_LENGTH: u64 = 2_000_000;
const DEFAULT_BUFFER_SEND_RATE: u64 = 1;
const DEFAULT_AVG_RETRY_INTERVAL: u64 = 300;
const DEFAULT_RETRY_INTERVAL_RANGE: u64 = 60;

/// Connection state of a [`BufferStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Primary healthy, writing straight through.
    Streaming,
    /// Primary down, spooling to the secondary.
    Disconnected,
    /// Primary back up, draining the spool.
    SendingBuffer,
}

impl BufferState {
    fn as_str(self) -> &'static str {
        match self {
            BufferState::Streaming => "STREAMING",
            BufferState::Disconnected => "DISCONNECTED",
            BufferState::SendingBuffer => "SENDING_BUFFER",
        }
    }
}

/// Store that spools through a secondary while its primary is down.
pub struct BufferStore {
    core: StoreCore,
    primary: Option<Box<dyn Store>>,
    secondary: Option<Box<dyn Store>>,

    max_queue_length: u64,
    buffer_send_rate: u64,
    avg_retry_interval: u64,
    retry_interval_range: u64,
    /// When false, spooled data is abandoned in place instead of replayed
    /// after a reconnect.
    replay_buffer: bool,

    state: BufferState,
    last_write_time: i64,
    last_open_attempt: i64,
    retry_interval: u64,
    rng: SmallRng,
}

impl BufferStore {
    pub fn new(ctx: StoreContext, category: &str, multi_category: bool) -> Self {
        let now = Local::now().timestamp();
        let mut store = Self {
            core: StoreCore::new(ctx, category, multi_category),
            primary: None,
            secondary: None,
            max_queue_length: DEFAULT_MAX_QUEUE_LENGTH,
            buffer_send_rate: DEFAULT_BUFFER_SEND_RATE,
            avg_retry_interval: DEFAULT_AVG_RETRY_INTERVAL,
            retry_interval_range: DEFAULT_RETRY_INTERVAL_RANGE,
            replay_buffer: true,
            state: BufferState::Disconnected,
            last_write_time: now,
            last_open_attempt: now,
            retry_interval: 0,
            rng: SmallRng::from_entropy(),
        };
        store.retry_interval = store.new_retry_interval();
        store
    }

    /// Reseed the jitter source. Retry intervals become reproducible, which
    /// tests rely on.
    pub fn seed_jitter(&mut self, seed: u64) {
        self.rng = SmallRng::seed_from_u64(seed);
        self.retry_interval = self.new_retry_interval();
    }

    /// Current state, visible for inspection.
    pub fn state(&self) -> BufferState {
        self.state
    }

    /// Seconds until the next reconnect attempt is allowed.
    pub fn retry_interval(&self) -> u64 {
        self.retry_interval
    }

    /// Seconds since a batch last moved through this store.
    pub fn seconds_since_last_write(&self) -> i64 {
        Local::now().timestamp() - self.last_write_time
    }

    fn new_retry_interval(&mut self) -> u64 {
        let base = self.avg_retry_interval.saturating_sub(self.retry_interval_range / 2);
        if self.retry_interval_range == 0 {
            return self.avg_retry_interval;
        }
        base + self.rng.gen_range(0..self.retry_interval_range)
    }

    /// Run entry and exit actions for a state transition.
    async fn change_state(&mut self, new_state: BufferState) {
        // Leaving the current state.
        match self.state {
            BufferState::Streaming => {
                if let Some(secondary) = self.secondary.as_mut() {
                    secondary.open().await;
                }
            }
            BufferState::Disconnected => {
                // Leaving DISCONNECTED means whatever caused the warning has
                // been fixed.
                self.core.set_status("");
            }
            BufferState::SendingBuffer => {}
        }

        // Entering the new state.
        match new_state {
            BufferState::Streaming => {
                if let Some(secondary) = self.secondary.as_mut() {
                    if secondary.is_open() {
                        secondary.close().await;
                    }
                }
            }
            BufferState::Disconnected => {
                // Status is owned by whatever caused the disconnect; this
                // state is entered too often to overwrite it here.
                self.core
                    .ctx
                    .counters
                    .increment(&self.core.category, "retries", 1);
                self.last_open_attempt = Local::now().timestamp();
                self.retry_interval = self.new_retry_interval();
                tracing::info!(
                    category = %self.core.category,
                    retry_interval = self.retry_interval,
                    "choosing new retry interval"
                );
                if let Some(secondary) = self.secondary.as_mut() {
                    if !secondary.is_open() {
                        secondary.open().await;
                    }
                }
            }
            BufferState::SendingBuffer => {
                if let Some(secondary) = self.secondary.as_mut() {
                    if !secondary.is_open() {
                        secondary.open().await;
                    }
                }
            }
        }

        tracing::info!(
            category = %self.core.category,
            from = self.state.as_str(),
            to = new_state.as_str(),
            "changing buffer state"
        );
        self.state = new_state;
    }

    /// Drain up to `buffer_send_rate` spool files through the primary.
    async fn send_buffer(&mut self) {
        let now = Local::now();

        for _ in 0..self.buffer_send_rate {
            let mut messages = LogBatch::new();

            let read_ok = match self.secondary.as_mut() {
                Some(secondary) => secondary.read_oldest(now, &mut messages).await,
                None => false,
            };
            if !read_ok {
                // Stay in the sending state and keep trying to read.
                self.core.set_status("Failed to read from secondary store");
                tracing::warn!(
                    category = %self.core.category,
                    "buffer store can't read from secondary store"
                );
                break;
            }

            self.last_write_time = Local::now().timestamp();

            let size = messages.len();
            if size > 0 {
                let sent = match self.primary.as_mut() {
                    Some(primary) => primary.handle_messages(&mut messages).await,
                    None => false,
                };
                if sent {
                    if let Some(secondary) = self.secondary.as_mut() {
                        secondary.delete_oldest(now).await;
                    }
                } else {
                    if messages.len() != size {
                        // Part of this spool file went through. Rewrite it
                        // with just the unsent suffix.
                        tracing::warn!(
                            category = %self.core.category,
                            sent = size - messages.len(),
                            total = size,
                            "primary store accepted only part of a spooled batch"
                        );

                        let replaced = match self.secondary.as_mut() {
                            Some(secondary) => secondary.replace_oldest(&mut messages, now).await,
                            None => false,
                        };
                        if !replaced {
                            // Nothing left but to drop the file and record
                            // the loss.
                            tracing::error!(
                                category = %self.core.category,
                                lost = messages.len(),
                                "secondary store lost messages"
                            );
                            self.core.ctx.counters.increment(
                                &self.core.category,
                                "lost",
                                messages.len() as u64,
                            );
                            if let Some(secondary) = self.secondary.as_mut() {
                                secondary.delete_oldest(now).await;
                            }
                        }
                    }

                    self.change_state(BufferState::Disconnected).await;
                    break;
                }
            } else {
                // A read that found nothing still consumes the empty file.
                if let Some(secondary) = self.secondary.as_mut() {
                    secondary.delete_oldest(now).await;
                }
            }

            let drained = match self.secondary.as_mut() {
                Some(secondary) => secondary.empty(now).await,
                None => true,
            };
            if drained {
                tracing::info!(
                    category = %self.core.category,
                    "no more spool files to send, switching to streaming mode"
                );
                self.change_state(BufferState::Streaming).await;
                if let Some(primary) = self.primary.as_mut() {
                    primary.flush().await;
                }
                break;
            }
        }
    }
}

#[async_trait]
impl Store for BufferStore {
    fn category(&self) -> &str {
        &self.core.category
    }

    fn store_type(&self) -> &'static str {
        "buffer"
    }

    fn status(&self) -> String {
        // Precedence goes to the errors that hurt most: a broken secondary
        // means data loss, a broken primary only means spooling.
        let mut status = self
            .secondary
            .as_ref()
            .map(|s| s.status())
            .unwrap_or_default();
        if status.is_empty() {
            status = self.core.status();
        }
        if status.is_empty() {
            status = self.primary.as_ref().map(|s| s.status()).unwrap_or_default();
        }
        status
    }

    fn configure(&mut self, config: &StoreConfig) {
        if let Some(value) = config.get_unsigned("max_queue_length") {
            self.max_queue_length = value;
        }
        if let Some(value) = config.get_unsigned("buffer_send_rate") {
            self.buffer_send_rate = value;
        }
        if let Some(value) = config.get_unsigned("retry_interval") {
            self.avg_retry_interval = value;
        }
        if let Some(value) = config.get_unsigned("retry_interval_range") {
            self.retry_interval_range = value;
        }
        if let Some(flag) = config.get_flag("replay_buffer") {
            self.replay_buffer = flag;
        }

        if self.retry_interval_range > self.avg_retry_interval {
            tracing::warn!(
                category = %self.core.category,
                retry_interval = self.avg_retry_interval,
                retry_interval_range = self.retry_interval_range,
                "retry_interval_range must not exceed retry_interval, clamping"
            );
            self.retry_interval_range = self.avg_retry_interval;
        }
        self.retry_interval = self.new_retry_interval();

        match config.get_store("secondary") {
            None => {
                let msg = "Bad config - buffer store doesn't have secondary store";
                self.core.set_status(msg);
                tracing::error!(category = %self.core.category, "{}", msg);
            }
            Some(secondary_config) => match secondary_config.get_string("type") {
                None => {
                    let msg = "Bad config - buffer secondary store doesn't have a type";
                    self.core.set_status(msg);
                    tracing::error!(category = %self.core.category, "{}", msg);
                }
                Some(store_type) => {
                    // Replay requires a store that can be read back.
                    if let Some(mut secondary) = create_store(
                        &self.core.ctx,
                        store_type,
                        &self.core.category,
                        self.replay_buffer,
                        self.core.multi_category,
                    ) {
                        secondary.configure(secondary_config);
                        self.secondary = Some(secondary);
                    }
                }
            },
        }

        match config.get_store("primary") {
            None => {
                let msg = "Bad config - buffer store doesn't have primary store";
                self.core.set_status(msg);
                tracing::error!(category = %self.core.category, "{}", msg);
            }
            Some(primary_config) => match primary_config.get_string("type") {
                None => {
                    let msg = "Bad config - buffer primary store doesn't have a type";
                    self.core.set_status(msg);
                    tracing::error!(category = %self.core.category, "{}", msg);
                }
                Some("multi") => {
                    // A multi store can partially fail a batch; replaying a
                    // batch some children already handled is unsafe.
                    let msg = "Bad config - buffer primary store cannot be multistore";
                    self.core.set_status(msg);
                    tracing::error!(category = %self.core.category, "{}", msg);
                }
                Some(store_type) => {
                    if let Some(mut primary) = create_store(
                        &self.core.ctx,
                        store_type,
                        &self.core.category,
                        false,
                        self.core.multi_category,
                    ) {
                        primary.configure(primary_config);
                        self.primary = Some(primary);
                    }
                }
            },
        }

        // Even with a bad config, data still goes to a default location on
        // local disk.
        if self.secondary.is_none() {
            self.secondary = create_store(
                &self.core.ctx,
                "file",
                &self.core.category,
                true,
                self.core.multi_category,
            );
        }
        if self.primary.is_none() {
            self.primary = create_store(
                &self.core.ctx,
                "file",
                &self.core.category,
                false,
                self.core.multi_category,
            );
        }
    }

    async fn open(&mut self) -> bool {
        let primary_ok = match self.primary.as_mut() {
            Some(primary) => primary.open().await,
            None => false,
        };

        if primary_ok {
            // In case files are left over from a previous instance.
            self.change_state(BufferState::SendingBuffer).await;

            if !self.replay_buffer {
                // Pass through SENDING_BUFFER anyway so the secondary gets
                // its open sanity check.
                self.change_state(BufferState::Streaming).await;
            }
        } else {
            if let Some(secondary) = self.secondary.as_mut() {
                secondary.open().await;
            }
            self.change_state(BufferState::Disconnected).await;
        }

        self.is_open()
    }

    fn is_open(&self) -> bool {
        self.primary.as_ref().is_some_and(|s| s.is_open())
            || self.secondary.as_ref().is_some_and(|s| s.is_open())
    }

    async fn close(&mut self) {
        if let Some(primary) = self.primary.as_mut() {
            if primary.is_open() {
                primary.flush().await;
                primary.close().await;
            }
        }
        if let Some(secondary) = self.secondary.as_mut() {
            if secondary.is_open() {
                secondary.flush().await;
                secondary.close().await;
            }
        }
    }

    async fn flush(&mut self) {
        if let Some(primary) = self.primary.as_mut() {
            if primary.is_open() {
                primary.flush().await;
            }
        }
        if let Some(secondary) = self.secondary.as_mut() {
            if secondary.is_open() {
                secondary.flush().await;
            }
        }
    }

    async fn handle_messages(&mut self, batch: &mut LogBatch) -> bool {
        self.last_write_time = Local::now().timestamp();

        // A very long batch means the primary is backed up; give up on it
        // for now and shed to local disk.
        if self.state == BufferState::Streaming && batch.len() as u64 > self.max_queue_length {
            tracing::warn!(
                category = %self.core.category,
                messages = batch.len(),
                "buffer store queue backing up, switching to secondary store"
            );
            self.change_state(BufferState::Disconnected).await;
        }

        if self.state == BufferState::Streaming {
            let sent = match self.primary.as_mut() {
                Some(primary) => primary.handle_messages(batch).await,
                None => false,
            };
            if sent {
                return true;
            }
            self.change_state(BufferState::Disconnected).await;
        }

        if self.state != BufferState::Streaming {
            // If this fails there's nothing else to do here.
            return match self.secondary.as_mut() {
                Some(secondary) => secondary.handle_messages(batch).await,
                None => false,
            };
        }

        false
    }

    async fn periodic_check(&mut self) {
        // This store is responsible for checking its children.
        if let Some(primary) = self.primary.as_mut() {
            primary.periodic_check().await;
        }
        if let Some(secondary) = self.secondary.as_mut() {
            secondary.periodic_check().await;
        }

        if self.state == BufferState::Disconnected {
            let now = Local::now().timestamp();
            if now - self.last_open_attempt > self.retry_interval as i64 {
                let primary_ok = match self.primary.as_mut() {
                    Some(primary) => primary.open().await,
                    None => false,
                };
                if primary_ok {
                    if self.replay_buffer {
                        self.change_state(BufferState::SendingBuffer).await;
                    } else {
                        self.change_state(BufferState::Streaming).await;
                    }
                } else {
                    // Re-entering DISCONNECTED resets the retry timer.
                    self.change_state(BufferState::Disconnected).await;
                }
            }
        }

        if self.state == BufferState::SendingBuffer {
            self.send_buffer().await;
        }
    }

    fn copy(&self, category: &str) -> Box<dyn Store> {
        let mut store = BufferStore::new(self.core.ctx.clone(), category, self.core.multi_category);
        store.max_queue_length = self.max_queue_length;
        store.buffer_send_rate = self.buffer_send_rate;
        store.avg_retry_interval = self.avg_retry_interval;
        store.retry_interval_range = self.retry_interval_range;
        store.replay_buffer = self.replay_buffer;
        store.primary = self.primary.as_ref().map(|s| s.copy(category));
        store.secondary = self.secondary.as_ref().map(|s| s.copy(category));
        Box::new(store)
    }
}

#[cfg(test)]
#[path = "buffer_test.rs"]
mod buffer_test;
