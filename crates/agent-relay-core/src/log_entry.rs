//! Log entries as reported by the remote relay service.

use std::{borrow::Cow, fmt, sync::LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

/// CSI sequences (colors, cursor movement) and OSC sequences (window titles).
/// An OSC cut off by the end of a line is stripped up to that line end.
static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)(?:\x1B\].*?(?:\x07|\x1B\\|$))|(?:\x1B[@-_][0-?]*[ -/]*[@-~])")
        .expect("ANSI escape pattern is valid")
});

/// Severity attached to a log entry by the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// Upper-case label used when rendering a line.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A single line of agent output.
///
/// The timestamp is assigned by the remote service when the output was
/// emitted and is kept verbatim; the relay never re-stamps entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    /// Create an entry, keeping the message exactly as given.
    #[must_use]
    pub fn new(timestamp: impl Into<String>, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp.into(),
            level,
            message: message.into(),
        }
    }

    /// Return the entry with terminal escape sequences removed from the message.
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        if let Cow::Owned(clean) = strip_ansi(&self.message) {
            self.message = clean;
        }
        self
    }

    /// Render as `[timestamp] [LEVEL] message`.
    #[must_use]
    pub fn display_line(&self) -> String {
        format!("[{}] [{}] {}", self.timestamp, self.level, self.message)
    }
}

/// Remove ANSI CSI and OSC escape sequences from `text`.
#[must_use]
pub fn strip_ansi(text: &str) -> Cow<'_, str> {
    ANSI_ESCAPE.replace_all(text, "")
}
