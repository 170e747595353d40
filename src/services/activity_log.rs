//! Bounded activity log (§4.7).
//!
//! A ring buffer of human-readable events, newest-first, capped at a fixed
//! capacity. Messages are HTML-escaped at insertion time so the HTML status
//! page can render them without further escaping.

use std::collections::VecDeque;
use std::time::SystemTime;

use parking_lot::Mutex;
use serde::Serialize;

/// Default ring-buffer capacity (`spec.md` §3).
pub const DEFAULT_CAPACITY: usize = 100;

/// Severity of a logged event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational event.
    Info,
    /// A successful operation worth surfacing.
    Success,
    /// A recoverable problem.
    Warning,
    /// A handler-level error.
    Error,
}

/// One entry in the activity log.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    /// Wall-clock time the event was recorded, as Unix seconds.
    pub timestamp: u64,
    /// Event severity.
    pub severity: Severity,
    /// HTML-safe message (reserved characters already escaped).
    pub message: String,
}

/// Thread-safe bounded ring buffer of [`LogEntry`] values.
pub struct ActivityLog {
    capacity: usize,
    entries: Mutex<VecDeque<LogEntry>>,
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl ActivityLog {
    /// Creates a log bounded at `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Appends an event, escaping `message` for safe HTML rendering and
    /// evicting the oldest entry if the log is at capacity.
    pub fn record(&self, severity: Severity, message: impl AsRef<str>) {
        let entry = LogEntry {
            timestamp: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            severity,
            message: escape_html(message.as_ref()),
        };
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_back();
        }
        entries.push_front(entry);
    }

    /// Returns the most recent `limit` entries, newest-first.
    pub fn recent(&self, limit: usize) -> Vec<LogEntry> {
        self.entries.lock().iter().take(limit).cloned().collect()
    }

    /// Current number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True if the log holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Escapes `&`, `<`, `>`, `"`, and `'` for safe inclusion in HTML text.
fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

/// Single-lines and elides `code` content for debug-mode logging:
/// CR/LF are escaped and the middle is elided to at most ~120 characters.
pub fn elide_code_for_log(code: &str) -> String {
    let single_line = code.replace('\r', "\\r").replace('\n', "\\n");
    const MAX_LEN: usize = 120;
    if single_line.chars().count() <= MAX_LEN {
        return single_line;
    }
    let head: String = single_line.chars().take(MAX_LEN / 2 - 2).collect();
    let tail: String = single_line
        .chars()
        .rev()
        .take(MAX_LEN / 2 - 2)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("{head}...{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_and_newest_first() {
        let log = ActivityLog::with_capacity(2);
        log.record(Severity::Info, "first");
        log.record(Severity::Info, "second");
        log.record(Severity::Info, "third");
        let entries = log.recent(10);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "third");
        assert_eq!(entries[1].message, "second");
    }

    #[test]
    fn html_reserved_chars_escaped() {
        let log = ActivityLog::with_capacity(4);
        log.record(Severity::Warning, "<script>alert('x')</script>");
        let entries = log.recent(1);
        assert!(!entries[0].message.contains('<'));
        assert!(entries[0].message.contains("&lt;script&gt;"));
    }

    #[test]
    fn elides_long_code() {
        let long = "x".repeat(500);
        let elided = elide_code_for_log(&long);
        assert!(elided.len() < long.len());
        assert!(elided.contains("..."));
    }

    #[test]
    fn escapes_crlf_in_code_log() {
        let elided = elide_code_for_log("a\r\nb");
        assert_eq!(elided, "a\\r\\nb");
    }
}
