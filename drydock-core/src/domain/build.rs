//! Build domain types
//!
//! A build is one execution attempt of the clone → build → push → deploy
//! pipeline for a container. Its log is an append-only, capped sequence of
//! severity-tagged lines.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Build execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildStatus {
    Queue,
    Running,
    Skipped,
    Cancel,
    Success,
    Failed,
}

impl BuildStatus {
    /// Terminal statuses never change again (a restart creates a fresh
    /// transition back to QUEUE instead of mutating in place)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildStatus::Skipped | BuildStatus::Cancel | BuildStatus::Success | BuildStatus::Failed
        )
    }
}

/// Severity tag prefixed onto every build log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSeverity {
    Log,
    Error,
}

impl LogSeverity {
    pub fn prefix(&self) -> &'static str {
        match self {
            LogSeverity::Log => "log",
            LogSeverity::Error => "error",
        }
    }
}

/// Append-only log with FIFO eviction beyond a fixed cap
///
/// Appends are O(1) amortized; the oldest entries drop first once the cap is
/// reached, so the log always holds the most recent `cap` lines in original
/// order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundedLog {
    cap: usize,
    lines: Vec<String>,
}

impl BoundedLog {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            lines: Vec::new(),
        }
    }

    /// Appends a severity-tagged line, evicting from the front past the cap
    pub fn append(&mut self, severity: LogSeverity, line: impl AsRef<str>) {
        self.lines
            .push(format!("{}: {}", severity.prefix(), line.as_ref()));
        if self.lines.len() > self.cap {
            let excess = self.lines.len() - self.cap;
            self.lines.drain(..excess);
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

/// One pipeline execution attempt for a container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Build {
    pub id: Uuid,
    pub container_id: Uuid,
    pub status: BuildStatus,
    pub log: BoundedLog,
    pub restarted: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Build {
    /// Creates a fresh QUEUE build for a container
    pub fn new(container_id: Uuid, log_cap: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            container_id,
            status: BuildStatus::Queue,
            log: BoundedLog::new(log_cap),
            restarted: false,
            created_at: chrono::Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(!BuildStatus::Queue.is_terminal());
        assert!(!BuildStatus::Running.is_terminal());
        assert!(BuildStatus::Skipped.is_terminal());
        assert!(BuildStatus::Cancel.is_terminal());
        assert!(BuildStatus::Success.is_terminal());
        assert!(BuildStatus::Failed.is_terminal());
    }

    #[test]
    fn test_log_lines_are_severity_tagged() {
        let mut log = BoundedLog::new(10);
        log.append(LogSeverity::Log, "cloning");
        log.append(LogSeverity::Error, "boom");
        assert_eq!(log.lines()[0], "log: cloning");
        assert_eq!(log.lines()[1], "error: boom");
    }

    #[test]
    fn test_log_cap_keeps_most_recent_in_order() {
        let mut log = BoundedLog::new(5000);
        for i in 0..6000 {
            log.append(LogSeverity::Log, format!("line {}", i));
        }
        assert_eq!(log.len(), 5000);
        assert_eq!(log.lines()[0], "log: line 1000");
        assert_eq!(log.lines()[4999], "log: line 5999");
        // still strictly in original order
        for (idx, line) in log.lines().iter().enumerate() {
            assert_eq!(line, &format!("log: line {}", idx + 1000));
        }
    }

    #[test]
    fn test_new_build_is_queued() {
        let b = Build::new(Uuid::new_v4(), 100);
        assert_eq!(b.status, BuildStatus::Queue);
        assert!(!b.restarted);
        assert!(b.finished_at.is_none());
    }
}
