//! Filesystem change notifications for the tail source.
//!
//! At most one file and one parent-directory watch exist at a time. An
//! event on the file watch reports `file_event`; a directory event naming
//! the watched file (or any directory event while no file is watched)
//! reports `rewatch`, telling the caller to re-establish its watches.
//!
//! On platforms without kernel notifications the watcher degrades to 1 Hz
//! polling that always reports `file_event`, preserving the contract.

use std::io;
use std::path::Path;

use tokio_util::sync::CancellationToken;

/// Outcome of one wait: what changed and whether watches need rebuilding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PathEvent {
    /// The watched file itself changed (modified, deleted, or moved).
    pub file_event: bool,
    /// The file appeared, disappeared, or moved within the watched
    /// directory; watches must be re-established.
    pub rewatch: bool,
}

/// Watcher over a single file and its parent directory.
pub struct PathWatcher {
    cancel: CancellationToken,
    inner: imp::Watcher,
}

impl PathWatcher {
    /// Create a watcher tied to `cancel`; cancelling it disarms any
    /// blocked [`wait_for_event`](PathWatcher::wait_for_event) promptly.
    pub fn new(cancel: CancellationToken) -> io::Result<Self> {
        Ok(Self {
            cancel,
            inner: imp::Watcher::new()?,
        })
    }

    /// Watch `path` and its parent directory. Drops any existing watches
    /// first. Returns false when the file cannot be watched (it may not
    /// exist yet).
    pub fn try_watch_file(&mut self, path: &Path) -> bool {
        self.inner.try_watch_file(path)
    }

    /// Watch a directory only, for waiting on a file that does not exist.
    pub fn try_watch_directory(&mut self, path: &Path) -> bool {
        self.inner.try_watch_directory(path)
    }

    /// Drop all watches.
    pub fn clear_watches(&mut self) {
        self.inner.clear_watches();
    }

    /// Wait for the next change. Returns an empty event once shut down.
    pub async fn wait_for_event(&mut self) -> PathEvent {
        if self.cancel.is_cancelled() {
            return PathEvent::default();
        }
        tokio::select! {
            _ = self.cancel.cancelled() => PathEvent::default(),
            event = self.inner.wait_for_event() => event,
        }
    }

    /// Disarm the watcher; any blocked wait returns promptly.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// True once [`shutdown`](PathWatcher::shutdown) has been called.
    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(target_os = "linux")]
mod imp {
    use std::ffi::OsString;
    use std::io;
    use std::path::Path;

    use futures::{FutureExt, StreamExt};
    use inotify::{EventMask, EventStream, Inotify, WatchDescriptor, WatchMask, Watches};

    use super::PathEvent;

    fn file_mask() -> WatchMask {
        WatchMask::MODIFY | WatchMask::DELETE_SELF | WatchMask::MOVE_SELF
    }

    fn dir_mask() -> WatchMask {
        WatchMask::CREATE
            | WatchMask::DELETE
            | WatchMask::DELETE_SELF
            | WatchMask::MOVE_SELF
            | WatchMask::MOVED_FROM
    }

    pub(super) struct Watcher {
        watches: Watches,
        stream: EventStream<Vec<u8>>,
        file_wd: Option<WatchDescriptor>,
        dir_wd: Option<WatchDescriptor>,
        watched_file: Option<OsString>,
    }

    impl Watcher {
        pub(super) fn new() -> io::Result<Self> {
            let inotify = Inotify::init()?;
            let watches = inotify.watches();
            let stream = inotify.into_event_stream(vec![0u8; 4096])?;
            Ok(Self {
                watches,
                stream,
                file_wd: None,
                dir_wd: None,
                watched_file: None,
            })
        }

        pub(super) fn clear_watches(&mut self) {
            if let Some(wd) = self.file_wd.take() {
                tracing::debug!("removing existing file watch");
                let _ = self.watches.remove(wd);
            }
            if let Some(wd) = self.dir_wd.take() {
                tracing::debug!("removing existing directory watch");
                let _ = self.watches.remove(wd);
            }
            self.watched_file = None;
        }

        pub(super) fn try_watch_file(&mut self, path: &Path) -> bool {
            self.clear_watches();
            match self.watches.add(path, file_mask()) {
                Ok(wd) => {
                    self.file_wd = Some(wd);
                    let parent = path.parent().unwrap_or_else(|| Path::new("/"));
                    match self.watches.add(parent, dir_mask()) {
                        Ok(dir_wd) => {
                            self.dir_wd = Some(dir_wd);
                        }
                        Err(e) => {
                            tracing::warn!(
                                path = %parent.display(),
                                error = %e,
                                "failed to watch parent directory"
                            );
                        }
                    }
                    self.watched_file = path.file_name().map(|n| n.to_os_string());
                    tracing::info!(
                        path = %path.display(),
                        parent = %parent.display(),
                        "watching file with parent directory"
                    );
                    true
                }
                Err(_) => false,
            }
        }

        pub(super) fn try_watch_directory(&mut self, path: &Path) -> bool {
            self.clear_watches();
            match self.watches.add(path, dir_mask()) {
                Ok(wd) => {
                    tracing::info!(path = %path.display(), "watching directory");
                    self.dir_wd = Some(wd);
                    true
                }
                Err(_) => false,
            }
        }

        pub(super) async fn wait_for_event(&mut self) -> PathEvent {
            let mut event = PathEvent::default();

            match self.stream.next().await {
                Some(item) => self.classify(item, &mut event),
                None => {
                    event.rewatch = true;
                    return event;
                }
            }

            // Related events (a rename hits both the file and the directory
            // watch) are queued together; fold in whatever is already here.
            while let Some(Some(item)) = self.stream.next().now_or_never() {
                self.classify(item, &mut event);
            }

            event
        }

        fn classify(&self, item: io::Result<inotify::EventOwned>, out: &mut PathEvent) {
            let event = match item {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read filesystem event");
                    out.rewatch = true;
                    return;
                }
            };

            if event.mask.contains(EventMask::IGNORED) {
                return;
            }

            if self.file_wd.as_ref() == Some(&event.wd) {
                out.file_event = true;
            } else if self.file_wd.is_some() && self.dir_wd.as_ref() == Some(&event.wd) {
                // Directory event with a watched file; only the watched
                // name matters.
                if event.name.as_deref() == self.watched_file.as_deref() {
                    out.rewatch = true;
                }
            } else if self.dir_wd.as_ref() == Some(&event.wd) {
                // Directory event with no file watched.
                out.rewatch = true;
            }
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod imp {
    use std::io;
    use std::path::Path;
    use std::time::Duration;

    use super::PathEvent;

    /// Polling fallback: report a file event once a second and let the
    /// caller stat the file.
    pub(super) struct Watcher;

    impl Watcher {
        pub(super) fn new() -> io::Result<Self> {
            Ok(Self)
        }

        pub(super) fn clear_watches(&mut self) {}

        pub(super) fn try_watch_file(&mut self, _path: &Path) -> bool {
            true
        }

        pub(super) fn try_watch_directory(&mut self, _path: &Path) -> bool {
            true
        }

        pub(super) async fn wait_for_event(&mut self) -> PathEvent {
            tokio::time::sleep(Duration::from_secs(1)).await;
            PathEvent {
                file_event: true,
                rewatch: false,
            }
        }
    }
}

#[cfg(test)]
#[path = "path_watcher_test.rs"]
mod path_watcher_test;
