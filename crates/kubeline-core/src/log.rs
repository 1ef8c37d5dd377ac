//! Stage log stream.
//!
//! Every step of an executor, and every subprocess or container it starts,
//! writes through one [`StageLogger`]. The logger appends [`LogLine`]s to a
//! shared [`LogSink`]; sinks must accept concurrent writers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// A line of log output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub stream: LogStream,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogStream {
    Stdout,
    Stderr,
    /// Progress lines written by the engine itself.
    System,
}

/// Append-only destination for stage log lines.
pub trait LogSink: Send + Sync {
    fn append(&self, line: LogLine);
}

/// Keeps every line in memory. Used for archival and in tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<LogLine>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<LogLine> {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn contents(&self) -> Vec<String> {
        self.lines().into_iter().map(|l| l.content).collect()
    }
}

impl LogSink for MemorySink {
    fn append(&self, line: LogLine) {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(line);
    }
}

/// Forwards lines to a channel for live tailing.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<LogLine>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LogLine>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl LogSink for ChannelSink {
    fn append(&self, line: LogLine) {
        // A closed receiver means nobody is tailing any more.
        let _ = self.tx.send(line);
    }
}

const MASK: &str = "******";

/// Cheap-to-clone handle writing to a shared sink, masking registered secrets.
#[derive(Clone)]
pub struct StageLogger {
    sink: Arc<dyn LogSink>,
    masks: Arc<[String]>,
}

impl StageLogger {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self {
            sink,
            masks: Arc::from(Vec::new()),
        }
    }

    /// A logger writing to the same sink that also masks `secrets`.
    pub fn with_masks<I, S>(&self, secrets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut masks: Vec<String> = self.masks.to_vec();
        masks.extend(
            secrets
                .into_iter()
                .map(Into::into)
                .filter(|s: &String| !s.is_empty()),
        );
        // Longest first so a secret containing another is masked whole.
        masks.sort_by(|a, b| b.len().cmp(&a.len()));
        masks.dedup();
        Self {
            sink: self.sink.clone(),
            masks: Arc::from(masks),
        }
    }

    /// Write an engine progress line.
    pub fn log(&self, content: impl AsRef<str>) {
        self.write(LogStream::System, content.as_ref());
    }

    pub fn stdout(&self, content: impl AsRef<str>) {
        self.write(LogStream::Stdout, content.as_ref());
    }

    pub fn stderr(&self, content: impl AsRef<str>) {
        self.write(LogStream::Stderr, content.as_ref());
    }

    /// Write `content`, one sink line per text line. Blank lines are kept;
    /// a single trailing newline does not start another line.
    pub fn write(&self, stream: LogStream, content: &str) {
        let masked = self.mask(content);
        let body = masked.strip_suffix('\n').unwrap_or(&masked);
        for line in body.split('\n') {
            self.sink.append(LogLine {
                timestamp: Utc::now(),
                stream,
                content: line.trim_end_matches('\r').to_string(),
            });
        }
    }

    fn mask(&self, content: &str) -> String {
        let mut out = content.to_string();
        for secret in self.masks.iter() {
            if out.contains(secret.as_str()) {
                out = out.replace(secret.as_str(), MASK);
            }
        }
        out
    }
}

impl std::fmt::Debug for StageLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageLogger")
            .field("masks", &self.masks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logger() -> (StageLogger, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        (StageLogger::new(sink.clone()), sink)
    }

    #[test]
    fn test_multiline_content_is_split() {
        let (logger, sink) = logger();
        logger.stdout("one\ntwo\r\nthree\n");
        assert_eq!(sink.contents(), vec!["one", "two", "three"]);
    }

    #[test]
    fn test_blank_lines_are_kept() {
        let (logger, sink) = logger();
        logger.stdout("");
        logger.stdout("a\n\nb\n");
        assert_eq!(sink.contents(), vec!["", "a", "", "b"]);
    }

    #[test]
    fn test_secrets_are_masked() {
        let (logger, sink) = logger();
        let logger = logger.with_masks(["s3cr3t", ""]);
        logger.log("docker run -e SONAR_TOKEN=s3cr3t scanner");
        assert_eq!(
            sink.contents(),
            vec!["docker run -e SONAR_TOKEN=****** scanner"]
        );
    }

    #[test]
    fn test_masked_logger_shares_sink() {
        let (logger, sink) = logger();
        let masked = logger.with_masks(["x"]);
        logger.log("plain");
        masked.log("also plain");
        assert_eq!(sink.lines().len(), 2);
    }

    #[test]
    fn test_streams_are_recorded() {
        let (logger, sink) = logger();
        logger.stderr("boom");
        logger.log("progress");
        let lines = sink.lines();
        assert_eq!(lines[0].stream, LogStream::Stderr);
        assert_eq!(lines[1].stream, LogStream::System);
    }

    #[tokio::test]
    async fn test_channel_sink_forwards_lines() {
        let (sink, mut rx) = ChannelSink::new();
        let logger = StageLogger::new(Arc::new(sink));
        logger.log("hello");
        let line = rx.recv().await.unwrap();
        assert_eq!(line.content, "hello");
    }
}
