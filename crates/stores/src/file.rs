//! Rotating local file store.
//!
//! Serializes messages into a [`FileBackend`] with optional per-message
//! framing, category prepending, chunk-boundary padding, and trailing
//! newlines. Doubles as the read-capable spool store underneath a
//! [`BufferStore`](crate::BufferStore) when constructed as a buffer file.

use std::path::Path;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use chrono::{DateTime, Local, Timelike};
use chute_config::StoreConfig;
use chute_protocol::{LogBatch, LogEntry};

use crate::file_backend::{create_backend, delete_file, list_dir, replace_symlink, FileBackend};
use crate::file_base::{file_suffix, FileBase, RollPeriod};
use crate::store::{Store, StoreContext, StoreCore};

/// First record of a freshly rotated file when `write_meta` is on; the rest
/// of the record is the full path of the file that superseded this one.
pub(crate) const META_PREFIX: &[u8] = b"scribe_meta<new_logfile>: ";

/// Rotating file store with configurable per-message layout.
pub struct FileStore {
    core: StoreCore,
    base: FileBase,
    /// Buffer files spool for a BufferStore: rotation and chunking are
    /// disabled so framed records can be recovered byte-exactly.
    is_buffer_file: bool,
    add_newlines: bool,
    write_file: Option<Box<dyn FileBackend>>,
}

impl FileStore {
    pub fn new(ctx: StoreContext, category: &str, multi_category: bool, is_buffer_file: bool) -> Self {
        Self {
            core: StoreCore::new(ctx, category, multi_category),
            base: FileBase::new(category),
            is_buffer_file,
            add_newlines: false,
            write_file: None,
        }
    }

    /// Open a (possibly new) numbered file. `increment` allocates the next
    /// suffix; reopening the newest file keeps it.
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
        let file = self.base.make_full_filename(suffix, time);

        self.base.record_roll(time);

        if let Some(old) = self.write_file.as_mut() {
            if self.base.write_meta {
                let mut payload = META_PREFIX.to_vec();
                payload.extend_from_slice(file.display().to_string().as_bytes());
                payload.push(b'\n');
                let mut record = old.frame(payload.len());
                record.extend_from_slice(&payload);
                if let Err(e) = old.write(&record) {
                    tracing::warn!(
                        category = %self.core.category,
                        error = %e,
                        "failed to write rotation meta record"
                    );
                }
            }
            old.close();
        }
        self.write_file = None;

        let Some(mut backend) = create_backend(&self.base.fs_type, &file, self.is_buffer_file)
        else {
            self.core.set_status("file open error");
            return false;
        };

        if let Some(parent) = file.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::error!(
                    category = %self.core.category,
                    path = %parent.display(),
                    error = %e,
                    "failed to create directory for file"
                );
                self.core.set_status("file open error");
                return false;
            }
        }

        if let Err(e) = backend.open_write() {
            tracing::error!(
                category = %self.core.category,
                path = %file.display(),
                error = %e,
                "failed to open file for writing"
            );
            self.core.set_status("file open error");
            return false;
        }

        // Best effort; a failed symlink never fails the open. Buffer files
        // skip it because a stray link confuses suffix scans on readback.
        if self.base.create_symlink && !self.is_buffer_file {
            let link = self.base.make_full_symlink();
            if let Err(e) = replace_symlink(&file, &link) {
                tracing::warn!(
                    category = %self.core.category,
                    link = %link.display(),
                    error = %e,
                    "failed to update current symlink"
                );
            }
        }

        tracing::info!(
            category = %self.core.category,
            path = %file.display(),
            "opened file for writing"
        );

        self.base.current_size = backend.file_size();
        self.base.current_filename = file.display().to_string();
        self.base.events_written = 0;
        self.core.set_status("");
        self.write_file = Some(backend);
        true
    }

    fn rotate_file(&mut self, now: DateTime<Local>) {
        tracing::info!(
            category = %self.core.category,
            hour = now.hour(),
            minute = now.minute(),
            file = %self.base.make_base_filename(now),
            old_size = self.base.current_size,
            max_size = self.base.max_size,
            "rotating file"
        );
        self.base.write_stats_line(&self.core.category);
        self.open_internal(true, Some(now));
    }

    fn close_file(&mut self) {
        if let Some(mut file) = self.write_file.take() {
            file.close();
        }
    }

    /// Serialize and write a batch, either to the current file or to an
    /// explicitly supplied backend (spool rewrites).
    ///
    /// Messages accumulate in a memory buffer flushed once it would push the
    /// file past the write-size cap, and at the end of the batch. A failed
    /// backend write terminates the batch; the handled prefix is drained and
    /// the unhandled suffix stays in `batch`.
    fn write_messages(
        &mut self,
        batch: &mut LogBatch,
        mut external: Option<&mut Box<dyn FileBackend>>,
    ) -> bool {
        if external.is_none() && self.write_file.is_none() {
            return false;
        }

        let max_write = self.base.max_size.min(self.base.max_write_size);
        let mut buffer = BytesMut::new();
        let mut buffered_bytes: u64 = 0;
        let mut num_buffered: usize = 0;
        let mut num_written: usize = 0;
        let mut success = true;

        let total = batch.len();
        for i in 0..total {
            let entry = &batch[i];

            // Frame headers take the payload length; padding takes the full
            // on-disk record length.
            let mut record_len = entry.message.len() as u64;
            if self.add_newlines {
                record_len += 1;
            }
            let mut length = record_len;

            let mut category_frame = Vec::new();
            if self.base.write_category {
                let category_len = entry.category.len() as u64 + 1;
                length += category_len;
                category_frame = self.frame_for(external.as_deref(), category_len as usize);
                length += category_frame.len() as u64;
            }

            let message_frame = self.frame_for(external.as_deref(), record_len as usize);
            length += message_frame.len() as u64;

            let padding = FileBase::bytes_to_pad(length, buffered_bytes, self.base.chunk_size);
            length += padding;
            if padding > 0 {
                buffer.put_bytes(0, padding as usize);
            }

            if self.base.write_category {
                buffer.extend_from_slice(&category_frame);
                buffer.extend_from_slice(entry.category.as_bytes());
                buffer.put_u8(b'\n');
            }
            buffer.extend_from_slice(&message_frame);
            buffer.extend_from_slice(&entry.message);
            if self.add_newlines {
                buffer.put_u8(b'\n');
            }

            buffered_bytes += length;
            num_buffered += 1;

            let over_write_cap = self.base.max_size != 0
                && self.base.current_size + buffered_bytes > max_write;
            if over_write_cap || i + 1 == total {
                // Spool readers scan the file on disk, so buffered bytes
                // must reach it before the batch completes.
                let write_result = match external.as_deref_mut() {
                    Some(file) => file.write(&buffer).and_then(|_| file.flush()),
                    None => match self.write_file.as_mut() {
                        Some(file) => file.write(&buffer).and_then(|_| file.flush()),
                        None => Err(std::io::Error::new(
                            std::io::ErrorKind::NotConnected,
                            "store has no open file",
                        )),
                    },
                };
                if let Err(e) = write_result {
                    tracing::error!(
                        category = %self.core.category,
                        error = %e,
                        remaining = total - num_written,
                        "file store failed to write messages"
                    );
                    self.core.set_status("file write error");
                    success = false;
                    break;
                }

                num_written += num_buffered;
                self.base.current_size += buffered_bytes;
                num_buffered = 0;
                buffered_bytes = 0;
                buffer.clear();
            }

            // Rotate mid-batch once the file is large enough, unless we were
            // handed a specific file to write.
            if self.base.max_size != 0
                && self.base.current_size > self.base.max_size
                && external.is_none()
            {
                self.rotate_file(Local::now());
            }
        }

        self.base.events_written += num_written as u64;

        if success {
            batch.clear();
        } else {
            self.close_file();
            batch.drain(..num_written);
        }
        success
    }

    fn frame_for(&self, external: Option<&Box<dyn FileBackend>>, len: usize) -> Vec<u8> {
        match external {
            Some(file) => file.frame(len),
            None => self
                .write_file
                .as_ref()
                .map(|file| file.frame(len))
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl Store for FileStore {
    fn category(&self) -> &str {
        &self.core.category
    }

    fn store_type(&self) -> &'static str {
        "file"
    }

    fn status(&self) -> String {
        self.core.status()
    }

    fn configure(&mut self, config: &StoreConfig) {
        self.base.configure(config, &self.core.category);

        if self.is_buffer_file {
            // Scheduled rotation of spool files leads to too many messy
            // cases during replay.
            self.base.roll_period = RollPeriod::Never;

            // Spool files must be framed for recovery; framing and chunk
            // padding cannot be read back together.
            self.base.chunk_size = 0;

            // A shared spool mixes categories in one file, so each record
            // carries its category.
            if self.core.multi_category {
                self.base.write_category = true;
            }
        }

        if let Some(flag) = config.get_flag("add_newlines") {
            self.add_newlines = flag;
        }
    }

    async fn open(&mut self) -> bool {
        self.open_internal(false, None)
    }

    fn is_open(&self) -> bool {
        self.write_file.as_ref().is_some_and(|f| f.is_open())
    }

    async fn close(&mut self) {
        self.close_file();
    }

    async fn flush(&mut self) {
        if let Some(file) = self.write_file.as_mut() {
            if let Err(e) = file.flush() {
                tracing::warn!(category = %self.core.category, error = %e, "flush failed");
            }
        }
    }

    async fn handle_messages(&mut self, batch: &mut LogBatch) -> bool {
        if !self.is_open() {
            self.open_internal(true, None);
        }
        if !self.is_open() {
            tracing::error!(category = %self.core.category, "file failed to open for batch");
            return false;
        }
        self.write_messages(batch, None)
    }

    async fn periodic_check(&mut self) {
        let now = Local::now();
        if self.base.should_roll(now) {
            self.rotate_file(now);
        }
    }

    fn copy(&self, category: &str) -> Box<dyn Store> {
        let mut store = FileStore::new(
            self.core.ctx.clone(),
            category,
            self.core.multi_category,
            self.is_buffer_file,
        );
        store.add_newlines = self.add_newlines;
        store.base.copy_from(&self.base, category);
        Box::new(store)
    }

    async fn read_oldest(&mut self, now: DateTime<Local>, out: &mut LogBatch) -> bool {
        let base_name = self.base.make_base_filename(now);
        let index = self.base.find_oldest_suffix(&base_name);
        if index < 0 {
            // No files left; a successful read that found nothing.
            return true;
        }
        let filename = self.base.make_full_filename(index, now);

        let Some(mut infile) = create_backend(&self.base.fs_type, &filename, self.is_buffer_file)
        else {
            return false;
        };
        if let Err(e) = infile.open_read() {
            tracing::error!(
                category = %self.core.category,
                path = %filename.display(),
                error = %e,
                "failed to open spool file for reading"
            );
            return false;
        }

        loop {
            let record = match infile.read_next() {
                Ok(Some(record)) => record,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(
                        category = %self.core.category,
                        path = %filename.display(),
                        error = %e,
                        "stopped reading spool file on error"
                    );
                    break;
                }
            };
            if record.is_empty() || record.starts_with(META_PREFIX) {
                continue;
            }

            if self.base.write_category {
                // Records alternate category, message.
                let mut category = record;
                if category.last() == Some(&b'\n') {
                    category.pop();
                }
                let category = String::from_utf8_lossy(&category).into_owned();

                let message = match infile.read_next() {
                    Ok(Some(message)) => message,
                    _ => {
                        tracing::warn!(
                            category = %self.core.category,
                            spooled_category = %category,
                            "category record without a message record"
                        );
                        break;
                    }
                };
                out.push(std::sync::Arc::new(LogEntry { category, message }));
            } else {
                out.push(std::sync::Arc::new(LogEntry {
                    category: self.core.category.clone(),
                    message: record,
                }));
            }
        }
        infile.close();

        tracing::info!(
            category = %self.core.category,
            entries = out.len(),
            path = %filename.display(),
            "read spool file"
        );
        true
    }

    async fn replace_oldest(&mut self, batch: &mut LogBatch, now: DateTime<Local>) -> bool {
        let base_name = self.base.make_base_filename(now);
        let index = self.base.find_oldest_suffix(&base_name);
        if index < 0 {
            tracing::error!(
                category = %self.core.category,
                base = %base_name,
                "no spool file found to replace"
            );
            return false;
        }
        let filename = self.base.make_full_filename(index, now);

        // The store may have this file open for writing.
        self.close_file();

        let Some(mut infile) = create_backend(&self.base.fs_type, &filename, self.is_buffer_file)
        else {
            return false;
        };
        let success = match infile.open_truncate() {
            Ok(()) => self.write_messages(batch, Some(&mut infile)),
            Err(e) => {
                tracing::error!(
                    category = %self.core.category,
                    path = %filename.display(),
                    error = %e,
                    "failed to open spool file for truncating rewrite"
                );
                false
            }
        };
        infile.close();

        self.open_internal(false, None);
        success
    }

    async fn delete_oldest(&mut self, now: DateTime<Local>) {
        let index = self.base.find_oldest_suffix(&self.base.make_base_filename(now));
        if index < 0 {
            return;
        }
        let filename = self.base.make_full_filename(index, now);
        if let Err(e) = delete_file(&filename) {
            tracing::warn!(
                category = %self.core.category,
                path = %filename.display(),
                error = %e,
                "failed to delete spool file"
            );
        }
    }

    async fn empty(&mut self, now: DateTime<Local>) -> bool {
        let base_name = self.base.make_base_filename(now);
        for file in list_dir(Path::new(&self.base.file_path)) {
            if file_suffix(&file, &base_name).is_some() {
                let full = Path::new(&self.base.file_path).join(&file);
                let size = std::fs::metadata(&full).map(|m| m.len()).unwrap_or(0);
                if size > 0 {
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
#[path = "file_test.rs"]
mod file_test;
