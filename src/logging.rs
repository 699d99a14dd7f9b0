//! Request journal: a ring buffer of recent entries persisted as JSONL.
//!
//! Console diagnostics go through `tracing`; the journal is the durable record
//! of what the relay routed where.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const MAX_LOG_ENTRIES: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One routed request: which client model went to which upstream model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRecord {
    pub method: String,
    pub path: String,
    pub source_model: String,
    pub target_model: String,
    pub messages: usize,
    pub tools: usize,
    pub stream: bool,
    pub status: u16,
}

impl RouteRecord {
    /// `POST /v1/messages claude-3-haiku -> gemini/gemini-2.0-flash (2 messages, 0 tools) 200`
    pub fn summary(&self) -> String {
        let mark = if self.status < 400 { "ok" } else { "failed" };
        format!(
            "{} {} {} -> {} ({} messages, {} tools{}) {} {}",
            self.method,
            self.path,
            self.source_model,
            self.target_model,
            self.messages,
            self.tools,
            if self.stream { ", stream" } else { "" },
            self.status,
            mark,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub component: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<RouteRecord>,
}

impl JournalEntry {
    pub fn new(level: LogLevel, component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            component: component.into(),
            message: message.into(),
            route: None,
        }
    }

    pub fn with_route(mut self, route: RouteRecord) -> Self {
        self.route = Some(route);
        self
    }
}

pub struct Journal {
    entries: VecDeque<JournalEntry>,
    file_path: Option<PathBuf>,
    writer: Option<BufWriter<File>>,
}

impl Journal {
    /// Open (or create) a journal file, loading the newest entries it holds
    /// and rewriting it down to that window.
    pub fn open(file_path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file_path = file_path.as_ref().to_path_buf();

        if let Some(parent) = file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut entries = VecDeque::with_capacity(MAX_LOG_ENTRIES);
        let mut dropped = 0usize;

        if file_path.exists() {
            let reader = BufReader::new(File::open(&file_path)?);
            for line in reader.lines().map_while(std::result::Result::ok) {
                if let Ok(entry) = serde_json::from_str::<JournalEntry>(&line) {
                    if entries.len() >= MAX_LOG_ENTRIES {
                        entries.pop_front();
                        dropped += 1;
                    }
                    entries.push_back(entry);
                }
            }
        }

        let mut journal = Self {
            entries,
            file_path: Some(file_path),
            writer: None,
        };
        if dropped > 0 {
            journal.compact()?;
        } else {
            journal.reopen_writer()?;
        }
        Ok(journal)
    }

    /// Journal without a backing file.
    pub fn in_memory() -> Self {
        Self {
            entries: VecDeque::new(),
            file_path: None,
            writer: None,
        }
    }

    pub fn record(&mut self, entry: JournalEntry) {
        if let Some(ref mut writer) = self.writer {
            if let Ok(json) = serde_json::to_string(&entry) {
                let _ = writeln!(writer, "{}", json);
                let _ = writer.flush();
            }
        }
        if self.entries.len() >= MAX_LOG_ENTRIES {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Newest first.
    pub fn recent(&self, limit: usize) -> Vec<JournalEntry> {
        self.entries.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rewrite the backing file to hold exactly the in-memory window.
    pub fn compact(&mut self) -> std::io::Result<()> {
        let Some(path) = self.file_path.clone() else {
            return Ok(());
        };
        self.writer = None;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        let mut writer = BufWriter::new(file);
        for entry in &self.entries {
            if let Ok(json) = serde_json::to_string(entry) {
                writeln!(writer, "{}", json)?;
            }
        }
        writer.flush()?;
        self.reopen_writer()
    }

    fn reopen_writer(&mut self) -> std::io::Result<()> {
        if let Some(path) = &self.file_path {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            self.writer = Some(BufWriter::new(file));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct SharedJournal(Arc<Mutex<Journal>>);

impl SharedJournal {
    pub fn open(file_path: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self::from_journal(Journal::open(file_path)?))
    }

    pub fn in_memory() -> Self {
        Self::from_journal(Journal::in_memory())
    }

    fn from_journal(journal: Journal) -> Self {
        Self(Arc::new(Mutex::new(journal)))
    }

    pub fn record(&self, entry: JournalEntry) {
        if let Ok(mut journal) = self.0.lock() {
            journal.record(entry);
        }
    }

    pub fn info(&self, component: impl Into<String>, message: impl Into<String>) {
        self.record(JournalEntry::new(LogLevel::Info, component, message));
    }

    pub fn warn(&self, component: impl Into<String>, message: impl Into<String>) {
        self.record(JournalEntry::new(LogLevel::Warn, component, message));
    }

    pub fn error(&self, component: impl Into<String>, message: impl Into<String>) {
        self.record(JournalEntry::new(LogLevel::Error, component, message));
    }

    /// Journal a routed request and print its one-line summary.
    pub fn route(&self, record: RouteRecord) {
        let summary = record.summary();
        let level = if record.status < 400 {
            tracing::info!(target: "claude_relay::route", "{}", summary);
            LogLevel::Info
        } else {
            tracing::warn!(target: "claude_relay::route", "{}", summary);
            LogLevel::Warn
        };
        self.record(JournalEntry::new(level, "route", summary).with_route(record));
    }

    pub fn recent(&self, limit: usize) -> Vec<JournalEntry> {
        self.0.lock().map(|j| j.recent(limit)).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(status: u16) -> RouteRecord {
        RouteRecord {
            method: "POST".to_string(),
            path: "/v1/messages".to_string(),
            source_model: "claude-3-haiku".to_string(),
            target_model: "gemini/gemini-2.0-flash".to_string(),
            messages: 2,
            tools: 1,
            stream: false,
            status,
        }
    }

    #[test]
    fn test_route_summary() {
        assert_eq!(
            record(200).summary(),
            "POST /v1/messages claude-3-haiku -> gemini/gemini-2.0-flash (2 messages, 1 tools) 200 ok"
        );
        assert!(record(502).summary().ends_with("502 failed"));
    }

    #[test]
    fn test_journal_persists_and_reloads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs").join("relay.jsonl");

        let journal = SharedJournal::open(&path).unwrap();
        journal.info("startup", "hello");
        journal.route(record(200));

        let reopened = Journal::open(&path).unwrap();
        assert_eq!(reopened.len(), 2);
        let newest = &reopened.recent(1)[0];
        assert_eq!(newest.component, "route");
        assert_eq!(newest.route.as_ref().map(|r| r.status), Some(200));
    }

    #[test]
    fn test_in_memory_ring_buffer() {
        let mut journal = Journal::in_memory();
        for i in 0..(MAX_LOG_ENTRIES + 5) {
            journal.record(JournalEntry::new(LogLevel::Debug, "test", i.to_string()));
        }
        assert_eq!(journal.len(), MAX_LOG_ENTRIES);
        assert_eq!(journal.recent(1)[0].message, (MAX_LOG_ENTRIES + 4).to_string());
        assert!(journal.compact().is_ok());
    }

    #[test]
    fn test_failed_route_is_a_warning() {
        let journal = SharedJournal::in_memory();
        journal.route(record(429));
        let entries = journal.recent(10);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].level, LogLevel::Warn);
    }
}
