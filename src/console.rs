//! Console panel state: a bounded list of log entries plus the last runtime error.

use crate::config::DEFAULT_MAX_LOG_ENTRIES;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

/// Console severity channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[default]
    Log,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Log => "log",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line in the console panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub id: u64,
    pub level: LogLevel,
    pub text: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.level, self.text)
    }
}

/// Log buffer and runtime error state for the current run.
///
/// Entries are kept in arrival order. Once the buffer holds more than
/// `capacity` entries the oldest are evicted first. Entry ids keep increasing
/// across `clear`, so an id is never reused within one console.
#[derive(Debug, Clone, Serialize)]
pub struct ConsoleState {
    entries: VecDeque<LogEntry>,
    #[serde(skip)]
    capacity: usize,
    #[serde(skip)]
    next_id: u64,
    runtime_error: Option<String>,
}

/// Console state shared between the bridge and the lifecycle controller.
pub type SharedConsole = Rc<RefCell<ConsoleState>>;

impl Default for ConsoleState {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MAX_LOG_ENTRIES)
    }
}

impl ConsoleState {
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "console capacity must be at least 1");
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            next_id: 0,
            runtime_error: None,
        }
    }

    pub fn shared(capacity: usize) -> SharedConsole {
        Rc::new(RefCell::new(Self::with_capacity(capacity)))
    }

    /// Append an entry, evicting from the front until the bound holds.
    /// Returns the new entry's id.
    pub fn push(&mut self, level: LogLevel, text: impl Into<String>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push_back(LogEntry {
            id,
            level,
            text: text.into(),
        });
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
        id
    }

    /// Record an uncaught error: sets the runtime error and logs it at `error`.
    pub fn record_runtime_error(&mut self, message: impl Into<String>) -> u64 {
        let message = message.into();
        self.runtime_error = Some(message.clone());
        self.push(LogLevel::Error, message)
    }

    /// Drop all entries and the runtime error (start of a Run).
    pub fn reset(&mut self) {
        self.entries.clear();
        self.runtime_error = None;
    }

    pub fn entries(&self) -> impl ExactSizeIterator<Item = &LogEntry> + '_ {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn runtime_error(&self) -> Option<&str> {
        self.runtime_error.as_deref()
    }

    /// Plain-text rendering of the panel, one entry per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&entry.to_string());
            out.push('\n');
        }
        if let Some(error) = &self.runtime_error {
            out.push_str("Runtime Error: ");
            out.push_str(error);
            out.push('\n');
        }
        out
    }
}
