//! Rotating file store that delegates framing to the framed backend.
//!
//! Rotation semantics are identical to [`FileStore`](crate::FileStore); the
//! difference is that every message goes straight to the backend as one
//! framed record, with an optional periodic flush cadence instead of
//! per-batch flushing.

use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Local, Timelike};
use chute_config::StoreConfig;
use chute_protocol::LogBatch;

use crate::file_backend::{replace_symlink, FileBackend, FramedFile, PlainFile};
use crate::store::{Store, StoreContext, StoreCore};
use crate::file_base::FileBase;

/// Rotating store writing one framed record per message.
pub struct FramedFileStore {
    core: StoreCore,
    base: FileBase,
    flush_frequency_ms: u64,
    msg_buffer_size: u64,
    /// Write raw bytes with no framing, for payloads that are already
    /// self-delimiting.
    use_simple_file: bool,
    write_file: Option<Box<dyn FileBackend>>,
    last_flush: Instant,
}

impl FramedFileStore {
    pub fn new(ctx: StoreContext, category: &str, multi_category: bool) -> Self {
        Self {
            core: StoreCore::new(ctx, category, multi_category),
            base: FileBase::new(category),
            flush_frequency_ms: 0,
            msg_buffer_size: 0,
            use_simple_file: false,
            write_file: None,
            last_flush: Instant::now(),
        }
    }

    fn make_backend(&self, path: &std::path::Path) -> Box<dyn FileBackend> {
        let capacity = if self.msg_buffer_size > 0 {
            self.msg_buffer_size as usize
        } else {
            64 * 1024
        };
        if self.use_simple_file {
            Box::new(PlainFile::with_capacity(path, capacity))
        } else {
            Box::new(FramedFile::with_capacity(path, capacity))
        }
    }

    fn open_internal(&mut self, increment: bool, time: Option<DateTime<Local>>) -> bool {
        let time = time.unwrap_or_else(Local::now);

        let base_name = self.base.make_base_filename(time);
        let mut suffix = self.base.find_newest_suffix(&base_name);
        if increment {
            suffix += 1;
        }
        if suffix < 0 {
            suffix = 0;
        }
        let filename = self.base.make_full_filename(suffix, time);

        self.base.record_roll(time);

        if let Some(mut old) = self.write_file.take() {
            old.close();
        }

        if let Some(parent) = filename.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::error!(
                    category = %self.core.category,
                    path = %parent.display(),
                    error = %e,
                    "could not create path for file"
                );
                return false;
            }
        }

        let mut backend = self.make_backend(&filename);
        if let Err(e) = backend.open_write() {
            tracing::error!(
                category = %self.core.category,
                path = %filename.display(),
                error = %e,
                "failed to open file for writing"
            );
            self.core.set_status("file open error");
            return false;
        }

        tracing::info!(
            category = %self.core.category,
            path = %filename.display(),
            "opened file for writing"
        );

        self.base.current_size = backend.file_size();
        self.base.current_filename = filename.display().to_string();
        self.base.events_written = 0;
        self.core.set_status("");

        if self.base.create_symlink {
            let link = self.base.make_full_symlink();
            if let Err(e) = replace_symlink(&filename, &link) {
                tracing::warn!(
                    category = %self.core.category,
                    link = %link.display(),
                    error = %e,
                    "failed to update current symlink"
                );
            }
        }

        self.write_file = Some(backend);
        true
    }

    fn rotate_file(&mut self, now: DateTime<Local>) {
        tracing::info!(
            category = %self.core.category,
            hour = now.hour(),
            minute = now.minute(),
            old_size = self.base.current_size,
            max_size = self.base.max_size,
            "rotating file"
        );
        self.base.write_stats_line(&self.core.category);
        self.open_internal(true, Some(now));
    }
}

#[async_trait]
impl Store for FramedFileStore {
    fn category(&self) -> &str {
        &self.core.category
    }

    fn store_type(&self) -> &'static str {
        "framedfile"
    }

    fn status(&self) -> String {
        self.core.status()
    }

    fn configure(&mut self, config: &StoreConfig) {
        self.base.configure(config, &self.core.category);
        if let Some(ms) = config.get_unsigned("flush_frequency_ms") {
            self.flush_frequency_ms = ms;
        }
        if let Some(size) = config.get_unsigned("msg_buffer_size") {
            self.msg_buffer_size = size;
        }
        if let Some(flag) = config.get_flag("use_simple_file") {
            self.use_simple_file = flag;
        }
    }

    async fn open(&mut self) -> bool {
        self.open_internal(true, None)
    }

    fn is_open(&self) -> bool {
        self.write_file.as_ref().is_some_and(|f| f.is_open())
    }

    async fn close(&mut self) {
        if let Some(mut file) = self.write_file.take() {
            file.close();
        }
    }

    async fn flush(&mut self) {
        if let Some(file) = self.write_file.as_mut() {
            if let Err(e) = file.flush() {
                tracing::warn!(category = %self.core.category, error = %e, "flush failed");
            }
            self.last_flush = Instant::now();
        }
    }

    async fn handle_messages(&mut self, batch: &mut LogBatch) -> bool {
        if !self.is_open() {
            return false;
        }

        let mut handled = 0usize;
        let total = batch.len();
        for i in 0..total {
            let entry = &batch[i];
            let file = match self.write_file.as_mut() {
                Some(file) => file,
                None => break,
            };

            let frame = file.frame(entry.message.len());
            let result = file
                .write(&frame)
                .and_then(|_| file.write(&entry.message));
            match result {
                Ok(()) => {
                    self.base.current_size += (frame.len() + entry.message.len()) as u64;
                    self.base.events_written += 1;
                    handled += 1;
                }
                Err(e) => {
                    tracing::error!(
                        category = %self.core.category,
                        error = %e,
                        "framed file store failed to write to file"
                    );
                    self.core.set_status("file write error");
                    batch.drain(..handled);
                    return false;
                }
            }
        }

        // Rotate now rather than waiting for the next periodic check; a
        // failover can deliver a lot of data all at once.
        if self.base.max_size != 0 && self.base.current_size > self.base.max_size {
            self.rotate_file(Local::now());
        }

        batch.clear();
        true
    }

    async fn periodic_check(&mut self) {
        let now = Local::now();
        if self.base.should_roll(now) {
            self.rotate_file(now);
        }
        if self.flush_frequency_ms > 0
            && self.last_flush.elapsed().as_millis() as u64 >= self.flush_frequency_ms
        {
            self.flush().await;
        }
    }

    fn copy(&self, category: &str) -> Box<dyn Store> {
        let mut store = FramedFileStore::new(self.core.ctx.clone(), category, self.core.multi_category);
        store.flush_frequency_ms = self.flush_frequency_ms;
        store.msg_buffer_size = self.msg_buffer_size;
        store.use_simple_file = self.use_simple_file;
        store.base.copy_from(&self.base, category);
        Box::new(store)
    }
}

#[cfg(test)]
#[path = "framed_file_test.rs"]
mod framed_file_test;
