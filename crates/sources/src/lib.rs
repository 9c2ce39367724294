//! Chute - Sources
//!
//! Long-running inputs that feed the relay. The only source type is `tail`:
//! a resilient follower of a single log file that survives rotation by
//! rename, rotation by truncate-and-copy, and temporary disappearance of
//! the file or its parent directories.

mod path_watcher;
mod tail;

pub use path_watcher::{PathEvent, PathWatcher};
pub use tail::{TailConfig, TailSource};
