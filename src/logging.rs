//! Per-agent plain-text log files.
//!
//! Each agent appends timestamped lines to `<workspace>/logs/<name>.log`.
//! Uses synchronous `std::fs` since writes are small, buffered, and flushed
//! after each event. Structured diagnostics still flow through `tracing`;
//! this file is the operator-readable narrative of one agent's run.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;

/// Append-only logger for one agent.
pub struct AgentLogger {
    writer: BufWriter<fs::File>,
    log_path: PathBuf,
}

impl AgentLogger {
    /// Open (creating if needed) `<workspace>/logs/<name>.log`.
    pub fn new(workspace: &Path, name: &str) -> anyhow::Result<Self> {
        let log_dir = workspace.join("logs");
        fs::create_dir_all(&log_dir)?;
        let log_path = log_dir.join(format!("{name}.log"));

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        Ok(Self {
            writer: BufWriter::new(file),
            log_path,
        })
    }

    /// Append one timestamped line and flush.
    pub fn log(&mut self, message: &str) {
        let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ");
        if writeln!(self.writer, "[{timestamp}] {message}").is_err() {
            tracing::warn!(path = %self.log_path.display(), "agent log write failed");
            return;
        }
        if self.writer.flush().is_err() {
            tracing::warn!(path = %self.log_path.display(), "agent log flush failed");
        }
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn logger_appends_timestamped_lines() {
        let tmp = TempDir::new().unwrap();
        let mut logger = AgentLogger::new(tmp.path(), "alice").unwrap();
        logger.log("iteration 1 started");
        logger.log("iteration 1 finished");

        let contents = std::fs::read_to_string(tmp.path().join("logs/alice.log")).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("iteration 1 started"));
    }

    #[test]
    fn reopening_appends_rather_than_truncates() {
        let tmp = TempDir::new().unwrap();
        {
            let mut logger = AgentLogger::new(tmp.path(), "alice").unwrap();
            logger.log("first run");
        }
        {
            let mut logger = AgentLogger::new(tmp.path(), "alice").unwrap();
            logger.log("second run");
        }

        let contents = std::fs::read_to_string(tmp.path().join("logs/alice.log")).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
