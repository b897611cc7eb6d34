//! Operational log: a bounded in-memory ring of structured entries mirrored to
//! an append-only JSONL file, plus the usage-sink contract billing hooks into.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::usage::UsageRecord;

const MAX_LOG_ENTRIES: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub component: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl LogEntry {
    pub fn new(level: LogLevel, component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            component: component.into(),
            message: message.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, ctx: serde_json::Value) -> Self {
        self.context = Some(ctx);
        self
    }
}

pub struct Logger {
    entries: VecDeque<LogEntry>,
    writer: BufWriter<File>,
}

impl Logger {
    /// Open (or create) the log file and replay its tail into the ring.
    pub fn new(file_path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file_path = file_path.as_ref().to_path_buf();

        if let Some(parent) = file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut entries = VecDeque::with_capacity(MAX_LOG_ENTRIES);

        if file_path.exists() {
            let file = File::open(&file_path)?;
            let reader = BufReader::new(file);
            for line in reader.lines().map_while(std::result::Result::ok) {
                if let Ok(entry) = serde_json::from_str::<LogEntry>(&line) {
                    if entries.len() >= MAX_LOG_ENTRIES {
                        entries.pop_front();
                    }
                    entries.push_back(entry);
                }
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file_path)?;

        Ok(Self {
            entries,
            writer: BufWriter::new(file),
        })
    }

    pub fn log(&mut self, entry: LogEntry) {
        if let Ok(json) = serde_json::to_string(&entry) {
            let _ = writeln!(self.writer, "{}", json);
            let _ = self.writer.flush();
        }
        if self.entries.len() >= MAX_LOG_ENTRIES {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Newest first.
    pub fn recent(&self, limit: usize) -> Vec<LogEntry> {
        self.entries.iter().rev().take(limit).cloned().collect()
    }
}

#[derive(Clone)]
pub struct SharedLogger(Arc<Mutex<Logger>>);

impl SharedLogger {
    pub fn new(file_path: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self(Arc::new(Mutex::new(Logger::new(file_path)?))))
    }

    pub fn log(&self, entry: LogEntry) {
        if let Ok(mut logger) = self.0.lock() {
            logger.log(entry);
        }
    }

    pub fn info(&self, component: impl Into<String>, message: impl Into<String>) {
        self.log(LogEntry::new(LogLevel::Info, component, message));
    }

    pub fn warn(&self, component: impl Into<String>, message: impl Into<String>) {
        self.log(LogEntry::new(LogLevel::Warn, component, message));
    }

    pub fn error(&self, component: impl Into<String>, message: impl Into<String>) {
        self.log(LogEntry::new(LogLevel::Error, component, message));
    }

    pub fn log_with_context(
        &self,
        level: LogLevel,
        component: impl Into<String>,
        message: impl Into<String>,
        context: serde_json::Value,
    ) {
        self.log(LogEntry::new(level, component, message).with_context(context));
    }

    pub fn recent(&self, limit: usize) -> Vec<LogEntry> {
        self.0.lock().map(|l| l.recent(limit)).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Usage reporting
// ---------------------------------------------------------------------------

/// Billing record for one finished request or realtime session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageReport {
    pub request_id: String,
    pub client_dialect: String,
    pub target_dialect: String,
    pub model: String,
    pub upstream_model: String,
    pub stream: bool,
    pub duration_ms: u64,
    pub usage: UsageRecord,
    /// Set when the request ended early; usage is then the best known so far.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Where finished usage goes. Partial usage arrives with the error that cut it short.
pub trait UsageSink: Send + Sync {
    fn record_usage(&self, report: &UsageReport);
}

impl UsageSink for SharedLogger {
    fn record_usage(&self, report: &UsageReport) {
        let level = if report.error.is_some() {
            LogLevel::Warn
        } else {
            LogLevel::Info
        };
        let message = format!(
            "{} {}->{} model={} in={} out={} total={}{}",
            report.request_id,
            report.client_dialect,
            report.target_dialect,
            report.model,
            report.usage.prompt_tokens,
            report.usage.completion_tokens,
            report.usage.total_tokens,
            if report.usage.estimated { " (estimated)" } else { "" },
        );
        let context = serde_json::to_value(report).unwrap_or(serde_json::Value::Null);
        self.log_with_context(level, "usage", message, context);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn report(error: Option<&str>) -> UsageReport {
        UsageReport {
            request_id: "req_1".to_string(),
            client_dialect: "chat".to_string(),
            target_dialect: "responses".to_string(),
            model: "gpt-4.1".to_string(),
            upstream_model: "gpt-4.1".to_string(),
            stream: true,
            duration_ms: 12,
            usage: UsageRecord::new(10, 5),
            error_kind: error.map(|_| "write_failure".to_string()),
            error: error.map(String::from),
        }
    }

    #[test]
    fn test_entries_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gateway.log");
        {
            let logger = SharedLogger::new(&path).unwrap();
            logger.info("startup", "first");
            logger.warn("dispatch", "second");
        }
        let logger = SharedLogger::new(&path).unwrap();
        let recent = logger.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message, "second");
        assert_eq!(recent[1].level, LogLevel::Info);
    }

    #[test]
    fn test_usage_sink_levels() {
        let dir = tempdir().unwrap();
        let logger = SharedLogger::new(dir.path().join("usage.log")).unwrap();

        logger.record_usage(&report(None));
        logger.record_usage(&report(Some("client went away")));

        let recent = logger.recent(2);
        assert_eq!(recent[0].level, LogLevel::Warn);
        assert_eq!(recent[1].level, LogLevel::Info);
        assert_eq!(recent[1].component, "usage");
        let ctx = recent[1].context.as_ref().unwrap();
        assert_eq!(ctx["usage"]["total_tokens"], 15);
    }
}
