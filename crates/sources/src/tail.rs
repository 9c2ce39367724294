//! Resilient `tail -F` source.
//!
//! Follows a file by name: when the inode behind the name changes (rotation
//! by rename) the source reopens and reads the new file from the start;
//! when the file shrinks (rotation by truncate-and-copy) it rewinds to byte
//! zero. When the file or its parents disappear, the source walks up the
//! directory tree until it finds something watchable and waits for the path
//! to come back.

use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chute_metrics::CounterRegistry;
use chute_protocol::{LogEntry, LogHandler, ResultCode};
use tokio_util::sync::CancellationToken;

use crate::path_watcher::PathWatcher;

/// How long to back off when no parent directory is watchable.
const REWATCH_BACKOFF: Duration = Duration::from_secs(10);

/// Configuration for one tail source.
#[derive(Debug, Clone)]
pub struct TailConfig {
    /// Category every tailed line is tagged with.
    pub category: String,
    /// File to follow.
    pub file: PathBuf,
}

#[derive(Debug, Clone, Copy, Default)]
struct FileIdentity {
    inode: u64,
    size: u64,
}

fn identify(path: &Path) -> Option<FileIdentity> {
    let metadata = std::fs::metadata(path).ok()?;
    #[cfg(unix)]
    let inode = std::os::unix::fs::MetadataExt::ino(&metadata);
    #[cfg(not(unix))]
    let inode = 0;
    Some(FileIdentity {
        inode,
        size: metadata.len(),
    })
}

/// Long-running follower of a single file, delivering each line to the
/// top-level handler as a one-entry batch.
pub struct TailSource {
    config: TailConfig,
    handler: Arc<dyn LogHandler>,
    counters: Arc<CounterRegistry>,
    reader: Option<BufReader<std::fs::File>>,
    /// Trailing bytes of an unterminated line, waiting for its newline.
    pending: Vec<u8>,
    last_stat: FileIdentity,
}

impl TailSource {
    pub fn new(
        config: TailConfig,
        handler: Arc<dyn LogHandler>,
        counters: Arc<CounterRegistry>,
    ) -> Self {
        Self {
            config,
            handler,
            counters,
            reader: None,
            pending: Vec::new(),
            last_stat: FileIdentity::default(),
        }
    }

    /// Follow the file until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!(
            category = %self.config.category,
            file = %self.config.file.display(),
            "starting tail source"
        );

        let mut watcher = match PathWatcher::new(cancel.clone()) {
            Ok(watcher) => watcher,
            Err(e) => {
                tracing::error!(
                    category = %self.config.category,
                    error = %e,
                    "could not create path watcher"
                );
                return;
            }
        };

        self.watch_path(&mut watcher, &cancel).await;

        // Start from the end; only new lines are interesting.
        self.last_stat = identify(&self.config.file).unwrap_or_default();
        self.open_file(SeekFrom::End(0));

        while !cancel.is_cancelled() {
            let event = watcher.wait_for_event().await;
            if cancel.is_cancelled() {
                break;
            }

            if event.rewatch {
                // The file may have changed or been replaced while it was
                // unwatched; regaining the file watch means catching up.
                if self.watch_path(&mut watcher, &cancel).await {
                    self.catch_up().await;
                }
            }
            if event.file_event {
                self.catch_up().await;
            }
        }

        tracing::info!(
            category = %self.config.category,
            file = %self.config.file.display(),
            "closing tailed log file"
        );
    }

    /// Stat the file, react to rotation or truncation, and deliver any new
    /// complete lines.
    async fn catch_up(&mut self) {
        let Some(current) = identify(&self.config.file) else {
            return;
        };

        if current.inode != self.last_stat.inode {
            // Rotation by rename: keep following the name, not the
            // descriptor.
            tracing::debug!(
                category = %self.config.category,
                file = %self.config.file.display(),
                "file inode changed, following the named file"
            );
            self.open_file(SeekFrom::Start(0));
        } else if current.size < self.last_stat.size {
            tracing::debug!(
                category = %self.config.category,
                file = %self.config.file.display(),
                "file shrank, assuming truncation and rewinding"
            );
            self.rewind();
        }
        self.last_stat = current;

        self.deliver_new_lines().await;
    }

    /// Watch the file, or failing that the nearest watchable ancestor
    /// directory. Returns true only when the file itself is watched again;
    /// backs off when nothing up to the root is watchable.
    async fn watch_path(&self, watcher: &mut PathWatcher, cancel: &CancellationToken) -> bool {
        if watcher.try_watch_file(&self.config.file) {
            return true;
        }

        tracing::info!(
            category = %self.config.category,
            file = %self.config.file.display(),
            "unable to watch file, attempting parent directories"
        );
        for ancestor in self.config.file.ancestors().skip(1) {
            if ancestor.as_os_str().is_empty() {
                continue;
            }
            if watcher.try_watch_directory(ancestor) {
                return false;
            }
        }

        tracing::warn!(
            category = %self.config.category,
            file = %self.config.file.display(),
            "failed to watch any parent path"
        );
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(REWATCH_BACKOFF) => {}
        }
        false
    }

    fn open_file(&mut self, position: SeekFrom) {
        self.pending.clear();
        self.reader = std::fs::File::open(&self.config.file)
            .ok()
            .map(|mut file| {
                let _ = file.seek(position);
                BufReader::new(file)
            });
    }

    fn rewind(&mut self) {
        self.pending.clear();
        if let Some(reader) = self.reader.as_mut() {
            let _ = reader.seek(SeekFrom::Start(0));
        }
    }

    /// Read every complete line available and hand each to the handler.
    /// A trailing fragment without its newline is kept for the next event.
    async fn deliver_new_lines(&mut self) {
        if self.reader.is_none() {
            self.open_file(SeekFrom::Start(0));
        }

        loop {
            let Some(reader) = self.reader.as_mut() else {
                return;
            };

            let mut chunk = Vec::new();
            match reader.read_until(b'\n', &mut chunk) {
                Ok(0) => return,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        category = %self.config.category,
                        error = %e,
                        "error reading tailed file"
                    );
                    return;
                }
            }

            if chunk.last() != Some(&b'\n') {
                // Incomplete line; keep it until the newline arrives.
                self.pending.extend_from_slice(&chunk);
                return;
            }

            let mut line = std::mem::take(&mut self.pending);
            line.extend_from_slice(&chunk);
            if line == b"\n" {
                continue;
            }

            let batch = vec![Arc::new(LogEntry::new(self.config.category.clone(), line))];
            let count = batch.len() as u64;
            match self.handler.log(batch).await {
                ResultCode::Ok => {
                    self.counters
                        .increment(&self.config.category, "tail good", count);
                }
                ResultCode::TryLater => {
                    tracing::debug!(
                        category = %self.config.category,
                        file = %self.config.file.display(),
                        "failed to deliver tailed line"
                    );
                    self.counters
                        .increment(&self.config.category, "tail bad", count);
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "tail_test.rs"]
mod tail_test;
