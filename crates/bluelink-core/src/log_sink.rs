//! Per-test-case event log.
//!
//! Every line is written as `YYYY-MM-DD HH:MM:SS - message` to the store for
//! its tag and pushed to live observers. The first append for a tag within a
//! [`LogSink`]'s lifetime clears whatever the store held for that tag, so each
//! run starts with a fresh log while repeated appends in the same run
//! accumulate. Line breaks inside a message are escaped so that one append
//! is always one stored line.
//!
//! Storage failures never reach the caller: they are reported through
//! `tracing` and otherwise dropped.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use time::OffsetDateTime;
use time::macros::format_description;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use bluelink_types::LogLine;

/// Backing storage for log lines, keyed by tag.
pub trait LogStore: Send + Sync {
    /// Append one formatted line.
    fn append(&self, tag: &str, line: &str) -> io::Result<()>;

    /// Remove all lines for a tag.
    fn clear(&self, tag: &str) -> io::Result<()>;

    /// All lines for a tag, in append order.
    fn read(&self, tag: &str) -> io::Result<Vec<String>>;
}

/// One plain-text file per tag: `<dir>/<tag>_log.txt`.
#[derive(Debug, Clone)]
pub struct FileLogStore {
    dir: PathBuf,
}

impl FileLogStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the log files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file for a tag.
    pub fn path_for(&self, tag: &str) -> PathBuf {
        let safe: String = tag
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{safe}_log.txt"))
    }
}

impl LogStore for FileLogStore {
    fn append(&self, tag: &str, line: &str) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(tag))?;
        writeln!(file, "{line}")
    }

    fn clear(&self, tag: &str) -> io::Result<()> {
        match fs::remove_file(self.path_for(tag)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    fn read(&self, tag: &str) -> io::Result<Vec<String>> {
        match fs::read_to_string(self.path_for(tag)) {
            Ok(contents) => Ok(contents.lines().map(str::to_string).collect()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}

/// In-memory store, used by tests and demo runs.
#[derive(Debug, Default)]
pub struct MemoryLogStore {
    lines: Mutex<HashMap<String, Vec<String>>>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tags with at least one stored line.
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = lock(&self.lines)
            .iter()
            .filter(|(_, lines)| !lines.is_empty())
            .map(|(tag, _)| tag.clone())
            .collect();
        tags.sort();
        tags
    }
}

impl LogStore for MemoryLogStore {
    fn append(&self, tag: &str, line: &str) -> io::Result<()> {
        lock(&self.lines)
            .entry(tag.to_string())
            .or_default()
            .push(line.to_string());
        Ok(())
    }

    fn clear(&self, tag: &str) -> io::Result<()> {
        lock(&self.lines).remove(tag);
        Ok(())
    }

    fn read(&self, tag: &str) -> io::Result<Vec<String>> {
        Ok(lock(&self.lines).get(tag).cloned().unwrap_or_default())
    }
}

/// Handle returned by [`LogSink::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&LogLine) + Send + Sync>;

struct Inner {
    store: Arc<dyn LogStore>,
    initialized: Mutex<HashSet<String>>,
    subscribers: Mutex<Vec<(SubscriptionId, Callback)>>,
    next_id: AtomicU64,
    lines: broadcast::Sender<LogLine>,
}

/// Append-only log with live subscribers. Cloning shares the same log.
#[derive(Clone)]
pub struct LogSink {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for LogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSink")
            .field("subscribers", &lock(&self.inner.subscribers).len())
            .finish()
    }
}

impl LogSink {
    /// Create a sink over the given store.
    pub fn new(store: Arc<dyn LogStore>) -> Self {
        let (lines, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                store,
                initialized: Mutex::new(HashSet::new()),
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                lines,
            }),
        }
    }

    /// Sink writing one file per tag under `dir`.
    pub fn to_dir(dir: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(FileLogStore::new(dir)))
    }

    /// Sink keeping lines in memory.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryLogStore::new()))
    }

    /// Append a message under `tag` and notify observers.
    ///
    /// Returns the formatted line.
    pub fn append(&self, tag: &str, message: &str) -> LogLine {
        let message = single_line(message);
        let line = LogLine {
            tag: tag.to_string(),
            line: format!("{} - {}", timestamp(), message),
        };

        {
            // Held across the clear so a concurrent first append cannot land before it.
            let mut initialized = lock(&self.inner.initialized);
            if initialized.insert(tag.to_string())
                && let Err(e) = self.inner.store.clear(tag)
            {
                warn!(tag, error = %e, "Failed to reset log");
            }
        }
        if let Err(e) = self.inner.store.append(tag, &line.line) {
            warn!(tag, error = %e, "Failed to write log line");
        }
        debug!(tag, "{message}");

        let subscribers: Vec<Callback> = lock(&self.inner.subscribers)
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in subscribers {
            callback(&line);
        }
        // No receivers is fine.
        let _ = self.inner.lines.send(line.clone());
        line
    }

    /// Explicitly reset the log for `tag`.
    pub fn clear(&self, tag: &str) {
        if let Err(e) = self.inner.store.clear(tag) {
            warn!(tag, error = %e, "Failed to clear log");
        }
    }

    /// All stored lines for `tag`.
    pub fn read(&self, tag: &str) -> io::Result<Vec<String>> {
        self.inner.store.read(tag)
    }

    /// Register a callback invoked with every appended line.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&LogLine) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.inner.subscribers).push((id, Arc::new(callback)));
        id
    }

    /// Remove a callback. Returns `false` if the handle was unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = lock(&self.inner.subscribers);
        let before = subscribers.len();
        subscribers.retain(|(sub, _)| *sub != id);
        subscribers.len() != before
    }

    /// Number of registered callbacks.
    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.subscribers).len()
    }

    /// Receive appended lines as a broadcast stream.
    pub fn stream(&self) -> broadcast::Receiver<LogLine> {
        self.inner.lines.subscribe()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn single_line(message: &str) -> Cow<'_, str> {
    if message.contains(['\r', '\n']) {
        Cow::Owned(message.replace("\r\n", "\\n").replace(['\r', '\n'], "\\n"))
    } else {
        Cow::Borrowed(message)
    }
}

fn timestamp() -> String {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(&format)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}
