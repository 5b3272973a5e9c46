//! Append-only error log.
//!
//! Every per-turn failure is written here as a single line:
//!
//! ```text
//! 2026-10-18 14:03:11 ERROR [weather] input="weather in qwertyzxcvb": city not recognised ...
//! ```
//!
//! The file is opened in append mode for each entry, so the log survives
//! restarts and no handle is held between turns.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::error::AssistantError;

#[derive(Clone, Debug)]
pub struct ErrorLog {
    path: Arc<PathBuf>,
}

impl ErrorLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Arc::new(path.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry for `err`, tagged with its component and the input
    /// that triggered it. Failing to write the log is reported through the
    /// diagnostic logger only; it never interrupts the conversation.
    pub fn record(&self, input: &str, err: &AssistantError) {
        log::error!("[{}] {}", err.component(), err);
        if let Err(e) = self.append(err.component(), input, &err.to_string()) {
            log::error!("Failed to write error log {}: {e:#}", self.path.display());
        }
    }

    fn append(&self, component: &str, input: &str, message: &str) -> Result<()> {
        let line = format!(
            "{} ERROR [{}] input={:?}: {}\n",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            component,
            single_line(input),
            single_line(message)
        );
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path.as_ref())
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .context("failed to append error log entry")?;
        Ok(())
    }
}

/// Collapse embedded newlines so one failure is always one line.
fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WeatherFailure;
    use tempfile::TempDir;

    #[test]
    fn record_appends_one_line_per_failure() {
        let dir = TempDir::new().unwrap();
        let log = ErrorLog::new(dir.path().join("errors.log"));

        log.record("hello", &AssistantError::speech("could not understand audio"));
        log.record(
            "weather in Qwertyzxcvb",
            &WeatherFailure::UnknownCity("Qwertyzxcvb".into()).into(),
        );

        let contents = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("ERROR [speech] input=\"hello\": speech recognition failed"));
        assert!(lines[1].contains("[weather]"));
        assert!(lines[1].contains("Qwertyzxcvb"));
    }

    #[test]
    fn multi_line_messages_stay_on_one_line() {
        let dir = TempDir::new().unwrap();
        let log = ErrorLog::new(dir.path().join("errors.log"));

        log.record(
            "tell me\na story",
            &AssistantError::ModelInference("line one\nline two".into()),
        );

        let contents = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.contains("input=\"tell me a story\""));
        assert!(contents.contains("line one line two"));
    }

    #[test]
    fn entries_start_with_a_timestamp() {
        let dir = TempDir::new().unwrap();
        let log = ErrorLog::new(dir.path().join("errors.log"));
        log.record("x", &AssistantError::speech("timeout"));

        let contents = std::fs::read_to_string(log.path()).unwrap();
        let stamp = &contents[..19];
        assert!(chrono::NaiveDateTime::parse_from_str(stamp, "%Y-%m-%d %H:%M:%S").is_ok());
    }
}
