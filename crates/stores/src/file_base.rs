//! Rotation policy engine shared by the file-backed stores.
//!
//! Owns naming (`{base}-YYYY-MM-DD_NNNNN`, optional `YYYY/MM/DD/HH` tree),
//! suffix allocation by directory scan, roll triggers, the `_current`
//! symlink, chunk padding, and the rotation stats line.

use std::fmt::Write as FmtWrite;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Local, Timelike};
use chute_config::StoreConfig;

use crate::file_backend::list_dir;

const DEFAULT_MAX_SIZE: u64 = 1_000_000_000;
const DEFAULT_MAX_WRITE_SIZE: u64 = 1_000_000;
const DEFAULT_ROLL_HOUR: u32 = 1;
const DEFAULT_ROLL_MINUTE: u32 = 15;

/// Name of the per-directory rotation log.
const STATS_FILE_NAME: &str = "scribe_stats";

/// When to roll the current output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollPeriod {
    Never,
    Hourly,
    Daily,
    /// Fixed interval in seconds.
    Interval(u64),
}

/// Parse a `rotate_period` value: `hourly`, `daily`, `never`, or
/// `N[w|d|h|m|s]` (bare `N` means seconds). Returns `None` for anything
/// malformed or non-positive.
pub fn parse_roll_period(value: &str) -> Option<RollPeriod> {
    match value {
        "hourly" => return Some(RollPeriod::Hourly),
        "daily" => return Some(RollPeriod::Daily),
        "never" => return Some(RollPeriod::Never),
        _ => {}
    }

    let (digits, unit) = match value.find(|c: char| !c.is_ascii_digit()) {
        None => (value, ""),
        Some(pos) => value.split_at(pos),
    };
    if digits.is_empty() || unit.len() > 1 {
        return None;
    }
    let n: u64 = digits.parse().ok()?;
    if n == 0 {
        return None;
    }
    let seconds = match unit {
        "w" => n * 60 * 60 * 24 * 7,
        "d" => n * 60 * 60 * 24,
        "h" => n * 60 * 60,
        "m" => n * 60,
        "s" | "" => n,
        _ => return None,
    };
    Some(RollPeriod::Interval(seconds))
}

/// Configuration and rotation state shared by [`FileStore`] and
/// [`FramedFileStore`].
///
/// [`FileStore`]: crate::FileStore
/// [`FramedFileStore`]: crate::FramedFileStore
pub(crate) struct FileBase {
    pub base_file_path: String,
    pub sub_directory: String,
    /// `base_file_path[/sub_directory]`.
    pub file_path: String,
    pub base_file_name: String,
    pub base_symlink_name: String,
    pub max_size: u64,
    pub max_write_size: u64,
    pub roll_period: RollPeriod,
    pub roll_hour: u32,
    pub roll_minute: u32,
    pub fs_type: String,
    pub chunk_size: u64,
    pub write_meta: bool,
    pub write_category: bool,
    pub create_symlink: bool,
    pub store_tree: bool,
    pub write_stats: bool,
    pub lzo_level: u64,

    // Rotation state.
    pub current_size: u64,
    pub current_filename: String,
    pub events_written: u64,
    /// Day-of-month, hour, or epoch seconds of the last roll, depending on
    /// the roll period.
    pub last_roll: i64,
}

impl FileBase {
    pub fn new(category: &str) -> Self {
        Self {
            base_file_path: "/tmp".into(),
            sub_directory: String::new(),
            file_path: "/tmp".into(),
            base_file_name: category.to_string(),
            base_symlink_name: String::new(),
            max_size: DEFAULT_MAX_SIZE,
            max_write_size: DEFAULT_MAX_WRITE_SIZE,
            roll_period: RollPeriod::Never,
            roll_hour: DEFAULT_ROLL_HOUR,
            roll_minute: DEFAULT_ROLL_MINUTE,
            fs_type: "std".into(),
            chunk_size: 0,
            write_meta: false,
            write_category: false,
            create_symlink: true,
            store_tree: false,
            write_stats: true,
            lzo_level: 0,
            current_size: 0,
            current_filename: String::new(),
            events_written: 0,
            last_roll: 0,
        }
    }

    pub fn configure(&mut self, config: &StoreConfig, category: &str) {
        if let Some(path) = config.get_string("file_path") {
            self.base_file_path = path.to_string();
        }
        if let Some(sub) = config.get_string("sub_directory") {
            self.sub_directory = sub.to_string();
        }
        if config.get_flag("use_hostname_sub_directory") == Some(true) {
            self.set_hostname_sub_directory(category);
        }

        self.file_path = self.base_file_path.clone();
        if !self.sub_directory.is_empty() {
            self.file_path = format!("{}/{}", self.file_path, self.sub_directory);
        }

        match config.get_string("base_filename") {
            Some(name) => self.base_file_name = name.to_string(),
            None => {
                tracing::warn!(category, "no base_filename specified for file store");
            }
        }
        if let Some(name) = config.get_string("base_symlink_name") {
            self.base_symlink_name = name.to_string();
        }

        if let Some(period) = config.get_string("rotate_period") {
            match parse_roll_period(period) {
                Some(parsed) => self.roll_period = parsed,
                None => {
                    self.roll_period = RollPeriod::Never;
                    tracing::warn!(
                        category,
                        rotate_period = period,
                        "invalid rotate_period format, rotations disabled"
                    );
                }
            }
        }

        if let Some(flag) = config.get_flag("write_meta") {
            self.write_meta = flag;
        }
        if let Some(flag) = config.get_flag("write_category") {
            self.write_category = flag;
        }
        if let Some(flag) = config.get_flag("create_symlink") {
            self.create_symlink = flag;
        }
        if config.get_flag("use_tree") == Some(true) {
            // A dated directory tree only makes sense with hourly rolls.
            self.store_tree = true;
            self.roll_period = RollPeriod::Hourly;
        }
        if let Some(flag) = config.get_flag("write_stats") {
            self.write_stats = flag;
        }

        if let Some(fs_type) = config.get_string("fs_type") {
            self.fs_type = fs_type.to_string();
        }
        if let Some(level) = config.get_unsigned("lzo_compression") {
            self.lzo_level = level;
        }
        if let Some(size) = config.get_unsigned("max_size") {
            self.max_size = size;
        }
        if let Some(size) = config.get_unsigned("max_write_size") {
            self.max_write_size = size;
        }
        if let Some(hour) = config.get_unsigned("rotate_hour") {
            self.roll_hour = hour as u32;
        }
        if let Some(minute) = config.get_unsigned("rotate_minute") {
            self.roll_minute = minute as u32;
        }
        if let Some(size) = config.get_unsigned("chunk_size") {
            self.chunk_size = size;
        }
    }

    /// Copy configured parameters (not rotation state) from a sibling,
    /// rebasing the file path and name onto the new category.
    pub fn copy_from(&mut self, other: &FileBase, category: &str) {
        self.sub_directory = other.sub_directory.clone();
        self.chunk_size = other.chunk_size;
        self.max_size = other.max_size;
        self.max_write_size = other.max_write_size;
        self.roll_period = other.roll_period;
        self.roll_hour = other.roll_hour;
        self.roll_minute = other.roll_minute;
        self.fs_type = other.fs_type.clone();
        self.write_meta = other.write_meta;
        self.write_category = other.write_category;
        self.create_symlink = other.create_symlink;
        self.base_symlink_name = other.base_symlink_name.clone();
        self.store_tree = other.store_tree;
        self.write_stats = other.write_stats;
        self.lzo_level = other.lzo_level;

        // Each category gets its own directory under the sibling's base
        // path, and the file name follows the category.
        self.base_file_path = format!("{}/{}", other.base_file_path, category);
        self.file_path = self.base_file_path.clone();
        if !self.sub_directory.is_empty() {
            self.file_path = format!("{}/{}", self.file_path, self.sub_directory);
        }
        self.base_file_name = category.to_string();
    }

    fn set_hostname_sub_directory(&mut self, category: &str) {
        if !self.sub_directory.is_empty() {
            tracing::warn!(category, "use_hostname_sub_directory overrides sub_directory path");
        }
        match hostname::get() {
            Ok(name) if !name.is_empty() => {
                self.sub_directory = name.to_string_lossy().into_owned();
            }
            _ => {
                tracing::warn!(category, "could not determine host name");
            }
        }
    }

    /// Whether any roll trigger fires at `now` given the current size.
    pub fn should_roll(&self, now: DateTime<Local>) -> bool {
        if self.max_size != 0 && self.current_size > self.max_size {
            return true;
        }
        match self.roll_period {
            RollPeriod::Daily => {
                i64::from(now.day()) != self.last_roll
                    && now.hour() >= self.roll_hour
                    && now.minute() >= self.roll_minute
            }
            RollPeriod::Hourly => {
                i64::from(now.hour()) != self.last_roll && now.minute() >= self.roll_minute
            }
            RollPeriod::Interval(seconds) => now.timestamp() >= self.last_roll + seconds as i64,
            RollPeriod::Never => false,
        }
    }

    /// Remember when the current file was opened, in the units
    /// [`should_roll`] compares against.
    ///
    /// [`should_roll`]: FileBase::should_roll
    pub fn record_roll(&mut self, now: DateTime<Local>) {
        self.last_roll = match self.roll_period {
            RollPeriod::Daily => i64::from(now.day()),
            RollPeriod::Hourly => i64::from(now.hour()),
            RollPeriod::Interval(_) => now.timestamp(),
            RollPeriod::Never => self.last_roll,
        };
    }

    /// Dated base name (without the `_NNNNN` suffix), including the tree
    /// prefix when `use_tree` is on.
    pub fn make_base_filename(&self, time: DateTime<Local>) -> String {
        let mut name = String::new();
        if self.roll_period != RollPeriod::Never {
            if self.store_tree {
                let _ = write!(
                    name,
                    "{:04}/{:02}/{:02}/{:02}/{}-{:04}-{:02}-{:02}-{:02}",
                    time.year(),
                    time.month(),
                    time.day(),
                    time.hour(),
                    self.base_file_name,
                    time.year(),
                    time.month(),
                    time.day(),
                    time.hour(),
                );
            } else {
                let _ = write!(
                    name,
                    "{}-{:04}-{:02}-{:02}",
                    self.base_file_name,
                    time.year(),
                    time.month(),
                    time.day(),
                );
            }
        } else {
            name.push_str(&self.base_file_name);
        }
        name
    }

    /// Full path for a numbered file.
    pub fn make_full_filename(&self, suffix: i64, time: DateTime<Local>) -> PathBuf {
        let mut full = format!(
            "{}/{}_{:05}",
            self.file_path,
            self.make_base_filename(time),
            suffix
        );
        if self.lzo_level > 0 {
            full.push_str(".lzo");
        }
        PathBuf::from(full)
    }

    pub fn make_base_symlink(&self) -> String {
        if !self.base_symlink_name.is_empty() {
            format!("{}_current", self.base_symlink_name)
        } else {
            format!("{}_current", self.base_file_name)
        }
    }

    pub fn make_full_symlink(&self) -> PathBuf {
        PathBuf::from(format!("{}/{}", self.file_path, self.make_base_symlink()))
    }

    /// Directory to scan for suffix allocation. With a tree layout the base
    /// name contains the dated subdirectories, so the scan happens there.
    fn scan_dir(&self, base_filename: &str) -> PathBuf {
        if self.store_tree {
            let full = format!("{}/{}", self.file_path, base_filename);
            match full.rfind('/') {
                Some(slash) => PathBuf::from(&full[..slash]),
                None => PathBuf::from(full),
            }
        } else {
            PathBuf::from(&self.file_path)
        }
    }

    /// Largest `_NNNNN` suffix among files matching `base_filename`, or -1.
    pub fn find_newest_suffix(&self, base_filename: &str) -> i64 {
        list_dir(&self.scan_dir(base_filename))
            .iter()
            .filter_map(|f| file_suffix(f, base_filename))
            .max()
            .unwrap_or(-1)
    }

    /// Smallest matching suffix, or -1.
    pub fn find_oldest_suffix(&self, base_filename: &str) -> i64 {
        list_dir(Path::new(&self.file_path))
            .iter()
            .filter_map(|f| file_suffix(f, base_filename))
            .min()
            .unwrap_or(-1)
    }

    /// Bytes of zero padding needed so the next record does not straddle a
    /// chunk boundary. Offsets are relative to the write buffer.
    pub fn bytes_to_pad(next_record_len: u64, current_offset: u64, chunk_size: u64) -> u64 {
        if chunk_size > 0 {
            let space_left_in_chunk = chunk_size - current_offset % chunk_size;
            if next_record_len > space_left_in_chunk {
                return space_left_in_chunk;
            }
        }
        0
    }

    /// Append one rotation line to the stats file in the target directory.
    pub fn write_stats_line(&self, category: &str) {
        if !self.write_stats {
            return;
        }

        let path = PathBuf::from(format!("{}/{}", self.file_path, STATS_FILE_NAME));
        let result = std::fs::create_dir_all(&self.file_path).and_then(|_| {
            let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
            let now = Local::now();
            writeln!(
                file,
                "{:04}-{:02}-{:02}-{:02}:{:02} wrote <{}> bytes in <{}> events to file <{}>",
                now.year(),
                now.month(),
                now.day(),
                now.hour(),
                now.minute(),
                self.current_size,
                self.events_written,
                self.current_filename,
            )
        });

        if let Err(e) = result {
            // Not worth failing the store over.
            tracing::warn!(category, path = %path.display(), error = %e, "failed to write stats file");
        }
    }
}

/// Parse the `_NNNNN[.lzo]` suffix from `filename`, returning `None` when
/// the file does not belong to `base_filename`.
pub(crate) fn file_suffix(filename: &str, base_filename: &str) -> Option<i64> {
    // A tree-layout base name carries directory components; only the final
    // component appears in directory listings.
    let base = match base_filename.rfind('/') {
        Some(slash) => &base_filename[slash + 1..],
        None => base_filename,
    };

    let suffix_pos = filename.rfind('_')?;
    if &filename[..suffix_pos] != base {
        return None;
    }

    let mut digits = &filename[suffix_pos + 1..];
    if let Some(stripped) = digits.strip_suffix(".lzo") {
        digits = stripped;
    }
    digits.parse().ok()
}

#[cfg(test)]
#[path = "file_base_test.rs"]
mod file_base_test;
