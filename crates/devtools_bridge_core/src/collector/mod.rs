//! Structured log collector: classifies feed lines, keeps the bounded in-memory record,
//! appends JSONL to disk and writes the summary on dispose.

mod buffer;

pub use buffer::LogBuffer;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::types::{
    CapturedEntry, ConsoleLine, Level, LogEntry, RawLine, Summary, UncaughtError,
};
use crate::Result;

/// Prefix that marks a console line as one structured entry.
pub const STRUCTURED_MARKER: &str = "[DEBUG_LOG]";
pub const COLLECTOR_SOURCE: &str = "log-collector";
pub const PARSE_FAILURE_MESSAGE: &str = "failed to parse structured entry";
pub const UNCAUGHT_SOURCE: &str = "uncaught-exception";
pub const UNCAUGHT_KIND: &str = "uncaught";
/// Overwritten by every run.
pub const SUMMARY_FILE_NAME: &str = "summary.json";

/// Classifies one line of text.
///
/// `None` means the line is not part of the structured stream. A marked line always yields
/// an entry: when the payload is not a valid entry it is demoted to a `warn` entry carrying
/// the original text and the parse error.
pub fn parse_structured_line(text: &str) -> Option<LogEntry> {
    let payload = text.trim_start().strip_prefix(STRUCTURED_MARKER)?.trim();
    Some(match serde_json::from_str::<LogEntry>(payload) {
        Ok(entry) => entry,
        Err(e) => LogEntry::new(Level::Warn, COLLECTOR_SOURCE, PARSE_FAILURE_MESSAGE).with_data(
            json!({
                "raw": text,
                "error": e.to_string(),
            }),
        ),
    })
}

/// Where a collector persists its output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectorArtifacts {
    pub structured: PathBuf,
    pub raw: Option<PathBuf>,
    pub summary: PathBuf,
}

#[derive(Debug)]
struct BufferState {
    buffer: LogBuffer,
    next_seq: u64,
}

#[derive(Debug, Default)]
struct Streams {
    structured: Option<File>,
    raw: Option<File>,
}

#[derive(Debug)]
pub struct LogCollector {
    state: Mutex<BufferState>,
    streams: tokio::sync::Mutex<Streams>,
    artifacts: CollectorArtifacts,
    capture_raw: bool,
    disposed: AtomicBool,
}

impl LogCollector {
    /// Opens this run's timestamped stream files under `output_dir`, creating it if needed.
    pub async fn create(output_dir: &Path, capacity: usize, capture_raw: bool) -> Result<Self> {
        tokio::fs::create_dir_all(output_dir).await?;

        let stamp = Utc::now().format("%Y%m%d-%H%M%S-%3f");
        let artifacts = CollectorArtifacts {
            structured: output_dir.join(format!("structured-{stamp}.jsonl")),
            raw: capture_raw.then(|| output_dir.join(format!("raw-{stamp}.jsonl"))),
            summary: output_dir.join(SUMMARY_FILE_NAME),
        };

        let structured = open_append(&artifacts.structured).await?;
        let raw = match &artifacts.raw {
            Some(path) => Some(open_append(path).await?),
            None => None,
        };

        tracing::info!(
            "Collecting structured entries into {}",
            artifacts.structured.display()
        );

        Ok(Self {
            state: Mutex::new(BufferState {
                buffer: LogBuffer::new(capacity),
                next_seq: 0,
            }),
            streams: tokio::sync::Mutex::new(Streams {
                structured: Some(structured),
                raw,
            }),
            artifacts,
            capture_raw,
            disposed: AtomicBool::new(false),
        })
    }

    pub fn artifacts(&self) -> &CollectorArtifacts {
        &self.artifacts
    }

    pub fn capacity(&self) -> usize {
        self.lock_state().buffer.capacity()
    }

    pub fn len(&self) -> usize {
        self.lock_state().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Classifies and records one console line. Returns the buffered entry when the line was
    /// part of the structured stream.
    ///
    /// Calls are serialized on the stream lock, so file order always matches buffer order.
    /// Write failures are logged; they never fail the line.
    pub async fn ingest(&self, line: &ConsoleLine) -> Option<CapturedEntry> {
        let mut streams = self.streams.lock().await;

        if self.capture_raw {
            write_raw(&mut streams, &line.kind, &line.text).await;
        }

        let entry = parse_structured_line(&line.text)?;
        if entry.source == COLLECTOR_SOURCE && entry.message == PARSE_FAILURE_MESSAGE {
            tracing::warn!("Demoted malformed structured line: {}", line.text);
        }
        Some(self.append(&mut streams, entry).await)
    }

    /// Records an uncaught error as an `error` entry (and a raw line when raw capture is on).
    pub async fn record_uncaught(&self, error: &UncaughtError) -> CapturedEntry {
        let mut streams = self.streams.lock().await;

        if self.capture_raw {
            let text = match &error.stack {
                Some(stack) => format!("{}\n{}", error.message, stack),
                None => error.message.clone(),
            };
            write_raw(&mut streams, UNCAUGHT_KIND, &text).await;
        }

        let mut entry = LogEntry::new(Level::Error, UNCAUGHT_SOURCE, error.message.clone());
        if let Some(stack) = &error.stack {
            entry = entry.with_data(json!({ "stack": stack }));
        }
        self.append(&mut streams, entry).await
    }

    /// Records a failure observed outside the feed, such as a run that never connected.
    pub async fn record_failure(
        &self,
        source: &str,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> CapturedEntry {
        let mut streams = self.streams.lock().await;
        let mut entry = LogEntry::new(Level::Error, source, message);
        entry.data = data;
        self.append(&mut streams, entry).await
    }

    async fn append(&self, streams: &mut Streams, entry: LogEntry) -> CapturedEntry {
        let captured = {
            let mut state = self.lock_state();
            let captured = CapturedEntry {
                seq: state.next_seq,
                received_at: Utc::now(),
                entry,
            };
            state.next_seq += 1;
            let evicted = state.buffer.push(captured.clone());
            if evicted > 0 {
                tracing::debug!(
                    "Log buffer reached capacity {}; evicted {} oldest entries",
                    state.buffer.capacity(),
                    evicted
                );
            }
            captured
        };

        if let Some(file) = streams.structured.as_mut() {
            if let Err(e) = write_json_line(file, &captured).await {
                tracing::warn!(
                    "Failed to append to {}: {}",
                    self.artifacts.structured.display(),
                    e
                );
            }
        }
        captured
    }

    /// Entries of `level` in arrival order.
    pub fn by_level(&self, level: Level) -> Vec<CapturedEntry> {
        self.filtered(|entry| entry.level() == level)
    }

    /// Entries from `source` in arrival order.
    pub fn by_source(&self, source: &str) -> Vec<CapturedEntry> {
        self.filtered(|entry| entry.source() == source)
    }

    pub fn has_errors(&self) -> bool {
        self.lock_state()
            .buffer
            .iter()
            .any(|entry| entry.level() == Level::Error)
    }

    pub fn entries(&self) -> Vec<CapturedEntry> {
        self.filtered(|_| true)
    }

    pub fn summary(&self) -> Summary {
        let state = self.lock_state();
        Summary::from_entries(state.buffer.iter(), Utc::now())
    }

    /// Writes the summary file, then flushes and closes both streams.
    ///
    /// Every step is attempted even if an earlier one fails; the first error is returned.
    /// Only the first call does anything.
    pub async fn dispose(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            tracing::debug!("Collector already disposed");
            return Ok(());
        }

        let mut first_error = None;

        let summary = self.summary();
        if let Err(e) = write_summary(&self.artifacts.summary, &summary).await {
            tracing::warn!(
                "Failed to write summary {}: {}",
                self.artifacts.summary.display(),
                e
            );
            first_error.get_or_insert(e);
        }

        let mut streams = self.streams.lock().await;
        for (name, file) in [("structured", streams.structured.take()), ("raw", streams.raw.take())] {
            let Some(mut file) = file else {
                continue;
            };
            if let Err(e) = file.flush().await {
                tracing::warn!("Failed to flush {} stream: {}", name, e);
                first_error.get_or_insert(e.into());
            }
            if let Err(e) = file.sync_all().await {
                tracing::warn!("Failed to sync {} stream: {}", name, e);
                first_error.get_or_insert(e.into());
            }
        }

        tracing::info!(
            "Collector disposed: {} entries, summary at {}",
            summary.stats.total_entries,
            self.artifacts.summary.display()
        );

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn filtered(&self, keep: impl Fn(&CapturedEntry) -> bool) -> Vec<CapturedEntry> {
        self.lock_state()
            .buffer
            .iter()
            .filter(|entry| keep(entry))
            .cloned()
            .collect()
    }

    fn lock_state(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn open_append(path: &Path) -> Result<File> {
    Ok(OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?)
}

async fn write_json_line<T: Serialize>(file: &mut File, value: &T) -> Result<()> {
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    file.write_all(&line).await?;
    file.flush().await?;
    Ok(())
}

async fn write_raw(streams: &mut Streams, kind: &str, text: &str) {
    let Some(file) = streams.raw.as_mut() else {
        return;
    };
    let record = RawLine {
        timestamp: Utc::now(),
        kind: kind.to_string(),
        text: text.to_string(),
    };
    if let Err(e) = write_json_line(file, &record).await {
        tracing::warn!("Failed to append raw line: {}", e);
    }
}

async fn write_summary(path: &Path, summary: &Summary) -> Result<()> {
    let body = serde_json::to_vec_pretty(summary)?;
    tokio::fs::write(path, body).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn structured(level: &str, source: &str, message: &str) -> ConsoleLine {
        ConsoleLine::new(
            "log",
            format!(
                r#"{STRUCTURED_MARKER} {{"timestamp":1700000000000,"level":"{level}","source":"{source}","message":"{message}"}}"#
            ),
        )
    }

    fn read_lines(path: &Path) -> Vec<Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn unmarked_lines_are_not_structured() {
        assert!(parse_structured_line("plain console output").is_none());
        assert!(parse_structured_line("prefix [DEBUG_LOG] {}").is_none());
    }

    #[test]
    fn marked_line_parses_with_optional_data() {
        let entry = parse_structured_line(
            r#"[DEBUG_LOG]{"timestamp":"2024-05-01T10:00:00Z","level":"error","source":"ext","message":"boom","data":{"code":7}}"#,
        )
        .unwrap();
        assert_eq!(entry.level, Level::Error);
        assert_eq!(entry.source, "ext");
        assert_eq!(entry.data, Some(json!({ "code": 7 })));
    }

    #[test]
    fn malformed_payloads_are_demoted_not_dropped() {
        let cases = [
            "[DEBUG_LOG] {not json",
            r#"[DEBUG_LOG] {"timestamp":1,"level":"info","source":"A"}"#,
            r#"[DEBUG_LOG] {"timestamp":1,"level":"fatal","source":"A","message":"m"}"#,
            r#"[DEBUG_LOG] {"timestamp":1,"level":"ERROR","source":"A","message":"m"}"#,
            "[DEBUG_LOG]",
        ];
        for raw in cases {
            let entry = parse_structured_line(raw).expect("marked line must yield an entry");
            assert_eq!(entry.level, Level::Warn, "{raw}");
            assert_eq!(entry.source, COLLECTOR_SOURCE);
            assert_eq!(entry.message, PARSE_FAILURE_MESSAGE);
            let data = entry.data.expect("demoted entry carries the original text");
            assert_eq!(data["raw"], raw);
            assert!(data["error"].as_str().is_some_and(|e| !e.is_empty()));
        }
    }

    #[tokio::test]
    async fn ingest_buffers_and_persists_in_arrival_order() {
        let dir = tempfile::tempdir().unwrap();
        let collector = LogCollector::create(dir.path(), 100, false).await.unwrap();

        assert!(collector.ingest(&ConsoleLine::new("log", "not structured")).await.is_none());
        collector.ingest(&structured("info", "A", "first")).await.unwrap();
        collector.ingest(&structured("warn", "B", "second")).await.unwrap();
        let demoted = collector
            .ingest(&ConsoleLine::new("log", "[DEBUG_LOG] {oops"))
            .await
            .unwrap();
        assert_eq!(demoted.level(), Level::Warn);

        assert_eq!(collector.len(), 3);
        let persisted = read_lines(&collector.artifacts().structured);
        let messages: Vec<&str> = persisted
            .iter()
            .map(|line| line["message"].as_str().unwrap())
            .collect();
        assert_eq!(messages, vec!["first", "second", PARSE_FAILURE_MESSAGE]);
        assert_eq!(persisted[0]["seq"], 0);
        assert!(persisted[0]["receivedAt"].as_str().is_some());
        assert!(collector.artifacts().raw.is_none());
    }

    #[tokio::test]
    async fn malformed_line_grows_buffer_by_exactly_one() {
        let dir = tempfile::tempdir().unwrap();
        let collector = LogCollector::create(dir.path(), 100, false).await.unwrap();
        collector.ingest(&structured("info", "A", "ok")).await;

        let before = collector.len();
        collector.ingest(&ConsoleLine::new("log", "[DEBUG_LOG] []")).await;
        assert_eq!(collector.len(), before + 1);
        assert_eq!(collector.by_level(Level::Warn).len(), 1);
    }

    #[tokio::test]
    async fn filters_and_has_errors_agree() {
        let dir = tempfile::tempdir().unwrap();
        let collector = LogCollector::create(dir.path(), 100, false).await.unwrap();
        assert!(!collector.has_errors());
        assert!(collector.by_level(Level::Error).is_empty());

        collector.ingest(&structured("info", "A", "1")).await;
        collector.ingest(&structured("debug", "B", "2")).await;
        collector.ingest(&structured("info", "A", "3")).await;
        assert!(!collector.has_errors());

        collector.ingest(&structured("error", "B", "4")).await;
        assert!(collector.has_errors());
        assert_eq!(collector.by_level(Level::Error).len(), 1);

        let from_a: Vec<String> = collector
            .by_source("A")
            .into_iter()
            .map(|e| e.entry.message)
            .collect();
        assert_eq!(from_a, vec!["1", "3"]);
    }

    #[tokio::test]
    async fn rotation_applies_to_buffer_but_file_keeps_everything() {
        let dir = tempfile::tempdir().unwrap();
        let collector = LogCollector::create(dir.path(), 4, false).await.unwrap();

        for i in 0..5 {
            collector.ingest(&structured("error", "A", &i.to_string())).await;
        }
        let kept: Vec<u64> = collector.entries().iter().map(|e| e.seq).collect();
        assert_eq!(kept, vec![3, 4]);
        assert!(collector.has_errors());
        assert_eq!(read_lines(&collector.artifacts().structured).len(), 5);
    }

    #[tokio::test]
    async fn raw_capture_records_every_line_and_uncaught_errors() {
        let dir = tempfile::tempdir().unwrap();
        let collector = LogCollector::create(dir.path(), 100, true).await.unwrap();

        collector.ingest(&ConsoleLine::new("warning", "plain")).await;
        collector.ingest(&structured("info", "A", "s")).await;
        let uncaught = collector
            .record_uncaught(&UncaughtError {
                message: "TypeError: boom".to_string(),
                stack: Some("    at f (a.js:1:1)".to_string()),
            })
            .await;
        assert_eq!(uncaught.level(), Level::Error);
        assert_eq!(uncaught.source(), UNCAUGHT_SOURCE);

        let raw_path = collector.artifacts().raw.clone().expect("raw stream enabled");
        let raw = read_lines(&raw_path);
        assert_eq!(raw.len(), 3);
        assert_eq!(raw[0]["kind"], "warning");
        assert_eq!(raw[0]["text"], "plain");
        assert!(raw[1]["text"].as_str().unwrap().starts_with(STRUCTURED_MARKER));
        assert_eq!(raw[2]["kind"], UNCAUGHT_KIND);
        assert!(raw[2]["timestamp"].as_str().is_some());

        assert_eq!(collector.len(), 2, "plain lines only reach the raw stream");
    }

    #[tokio::test]
    async fn dispose_writes_summary_once() {
        let dir = tempfile::tempdir().unwrap();
        let collector = LogCollector::create(dir.path(), 100, true).await.unwrap();
        collector.ingest(&structured("warn", "A", "w")).await;
        collector
            .record_failure("debug-run-orchestrator", "connect timeout", None)
            .await;

        collector.dispose().await.unwrap();
        assert!(collector.is_disposed());

        let summary_path = collector.artifacts().summary.clone();
        let summary: Value =
            serde_json::from_str(&std::fs::read_to_string(&summary_path).unwrap()).unwrap();
        assert_eq!(summary["stats"]["totalEntries"], 2);
        assert_eq!(summary["stats"]["errors"], 1);
        assert_eq!(summary["stats"]["warnings"], 1);
        assert_eq!(
            summary["stats"]["sources"],
            json!(["A", "debug-run-orchestrator"])
        );

        std::fs::write(&summary_path, b"sentinel").unwrap();
        collector.dispose().await.unwrap();
        assert_eq!(std::fs::read(&summary_path).unwrap(), b"sentinel");
    }

    #[tokio::test]
    async fn summary_file_name_is_fixed_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        let first = LogCollector::create(dir.path(), 10, false).await.unwrap();
        first.ingest(&structured("info", "A", "run 1")).await;
        first.dispose().await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = LogCollector::create(dir.path(), 10, false).await.unwrap();
        second.dispose().await.unwrap();

        assert_eq!(first.artifacts().summary, second.artifacts().summary);
        assert_ne!(first.artifacts().structured, second.artifacts().structured);
        let summary: Value = serde_json::from_str(
            &std::fs::read_to_string(&second.artifacts().summary).unwrap(),
        )
        .unwrap();
        assert_eq!(summary["stats"]["totalEntries"], 0);
    }
}
