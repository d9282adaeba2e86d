//! Append-only CSV log of analytics records.
//!
//! The file gets a header row when it is first created and one row per
//! record afterwards. Appends from one process are serialized; nothing
//! guards against a second process writing the same file.

use async_trait::async_trait;
use serde::Serialize;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::SinkError;
use crate::record::EventRecord;
use crate::sink::EventSink;

/// Column order of the log file.
pub const COLUMNS: [&str; 6] = [
    "user_id",
    "timestamp",
    "action",
    "completion_tokens",
    "prompt_tokens",
    "model_name",
];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// One CSV row. Field names double as the header.
#[derive(Serialize)]
struct LogRow {
    user_id: i64,
    timestamp: String,
    action: &'static str,
    completion_tokens: u32,
    prompt_tokens: u32,
    model_name: String,
}

impl From<&EventRecord> for LogRow {
    fn from(record: &EventRecord) -> Self {
        Self {
            user_id: record.user_id().as_i64(),
            timestamp: record.timestamp().format(TIMESTAMP_FORMAT).to_string(),
            action: record.action().as_str(),
            completion_tokens: record.completion_tokens(),
            prompt_tokens: record.prompt_tokens(),
            model_name: record.model_name().to_string(),
        }
    }
}

/// Full contents of the log: header names and rows of raw cells.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl LogTable {
    /// Number of data rows (header excluded).
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

pub struct AppendLogSink {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl AppendLogSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Read everything written so far.
    pub fn read_all(&self) -> Result<LogTable, SinkError> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&self.path)?;

        let headers = reader.headers()?.iter().map(String::from).collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            rows.push(record?.iter().map(String::from).collect());
        }

        Ok(LogTable { headers, rows })
    }
}

fn append_row(path: &Path, write_lock: &Mutex<()>, row: &LogRow) -> Result<(), SinkError> {
    let _guard = write_lock.lock().unwrap_or_else(PoisonError::into_inner);

    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let needs_header = file.metadata()?.len() == 0;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(needs_header)
        .from_writer(file);
    writer.serialize(row)?;
    writer.flush()?;
    Ok(())
}

#[async_trait]
impl EventSink for AppendLogSink {
    fn name(&self) -> &'static str {
        "append_log"
    }

    async fn write(&self, record: &EventRecord) -> Result<(), SinkError> {
        let path = self.path.clone();
        let write_lock = self.write_lock.clone();
        let row = LogRow::from(record);

        tokio::task::spawn_blocking(move || append_row(&path, &write_lock, &row)).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Interaction;
    use chrono::Utc;
    use llmbot_core::UserId;
    use std::sync::Arc;

    fn help(user: i64) -> EventRecord {
        EventRecord::new(UserId(user), Utc::now(), "test-model", Interaction::Help)
    }

    fn answer(user: i64) -> EventRecord {
        EventRecord::new(
            UserId(user),
            Utc::now(),
            "test-model",
            Interaction::Answer {
                prompt_tokens: 12,
                completion_tokens: 4,
                request_payload: None,
                response_text: "Hi, there".into(),
            },
        )
    }

    #[tokio::test]
    async fn test_header_written_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let sink = AppendLogSink::new(dir.path().join("actions.csv"));

        for user in 0..5 {
            sink.write(&help(user)).await.unwrap();
        }

        let contents = std::fs::read_to_string(sink.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0], COLUMNS.join(","));
        assert_eq!(contents.matches("user_id").count(), 1);
    }

    #[tokio::test]
    async fn test_row_matches_record() {
        let dir = tempfile::tempdir().unwrap();
        let sink = AppendLogSink::new(dir.path().join("actions.csv"));
        sink.write(&answer(42)).await.unwrap();

        let table = sink.read_all().unwrap();
        assert_eq!(table.headers, COLUMNS.to_vec());
        assert_eq!(table.len(), 1);
        let row = &table.rows[0];
        assert_eq!(row[0], "42");
        assert_eq!(row[2], "answer");
        assert_eq!(row[3], "4");
        assert_eq!(row[4], "12");
        assert_eq!(row[5], "test-model");
    }

    #[tokio::test]
    async fn test_empty_existing_file_gets_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("actions.csv");
        std::fs::write(&path, "").unwrap();

        let sink = AppendLogSink::new(&path);
        sink.write(&help(1)).await.unwrap();

        let table = sink.read_all().unwrap();
        assert_eq!(table.headers, COLUMNS.to_vec());
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let sink = AppendLogSink::new(dir.path().join("missing").join("actions.csv"));

        let err = sink.write(&help(1)).await.unwrap_err();
        assert!(matches!(err, SinkError::Io(_)));
        assert!(!sink.exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_writers_in_one_process() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(AppendLogSink::new(dir.path().join("actions.csv")));

        let mut handles = Vec::new();
        for user in 0..20 {
            let sink = sink.clone();
            handles.push(tokio::spawn(async move { sink.write(&help(user)).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let table = sink.read_all().unwrap();
        assert_eq!(table.len(), 20);
        assert!(table.rows.iter().all(|row| row.len() == COLUMNS.len()));
    }

    #[test]
    fn test_read_all_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let sink = AppendLogSink::new(dir.path().join("nope.csv"));
        assert!(sink.read_all().is_err());
    }
}
