//! Diagnostic log capture and retrieval.
//!
//! Provides a [`LogCollector`] that captures `tracing` events into a bounded
//! ring buffer, a [`LogReader`] handle for reading captured entries, and
//! [`LogSource`], which yields the log bundle served by `logs view` and
//! shipped by `logs send`.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

use edgedns_config::ServiceConfig;

/// A single captured log entry.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Timestamp as seconds since the collector was created.
    pub elapsed_secs: f64,
    /// Log level.
    pub level: Level,
    /// Target module path.
    pub target: String,
    /// The formatted message.
    pub message: String,
    /// Structured fields, rendered as `key=value`.
    pub fields: Vec<(String, String)>,
}

impl LogEntry {
    /// Render as one log line (without the trailing newline).
    pub fn render(&self) -> String {
        let mut line = format!(
            "{:>10.3} {:>5} {}: {}",
            self.elapsed_secs, self.level, self.target, self.message
        );
        for (key, value) in &self.fields {
            let _ = write!(line, " {key}={value}");
        }
        line
    }
}

/// Shared buffer backing the log collector.
#[derive(Debug)]
struct LogBuffer {
    entries: Vec<LogEntry>,
    capacity: usize,
    start_time: std::time::Instant,
}

impl LogBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
            start_time: std::time::Instant::now(),
        }
    }

    fn push(&mut self, level: Level, target: String, visitor: FieldVisitor) {
        if self.entries.len() >= self.capacity {
            self.entries.remove(0);
        }
        self.entries.push(LogEntry {
            elapsed_secs: self.start_time.elapsed().as_secs_f64(),
            level,
            target,
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}

/// A `tracing` layer that captures log events into a shared ring buffer.
///
/// Attach this to a `tracing_subscriber` registry so that recent log events
/// can be served over the control socket.
#[derive(Debug, Clone)]
pub struct LogCollector {
    buffer: Arc<Mutex<LogBuffer>>,
}

impl LogCollector {
    /// Create a new collector with the given ring buffer capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(LogBuffer::new(capacity))),
        }
    }

    /// Get a reader handle for the captured log entries.
    pub fn reader(&self) -> LogReader {
        LogReader {
            buffer: Arc::clone(&self.buffer),
        }
    }
}

impl<S: Subscriber> Layer<S> for LogCollector {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let level = *metadata.level();
        let target = metadata.target().to_string();

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        if let Ok(mut buf) = self.buffer.lock() {
            buf.push(level, target, visitor);
        }
    }
}

/// A read handle for the log buffer.
#[derive(Debug, Clone)]
pub struct LogReader {
    buffer: Arc<Mutex<LogBuffer>>,
}

impl LogReader {
    /// Return a snapshot of all captured log entries.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.buffer
            .lock()
            .map(|buf| buf.entries.clone())
            .unwrap_or_default()
    }

    /// Render every captured entry, one per line.
    pub fn render(&self) -> Result<Vec<u8>, LogError> {
        let buf = self.buffer.lock().map_err(|_| LogError::BufferPoisoned)?;
        let mut out = String::new();
        for entry in &buf.entries {
            out.push_str(&entry.render());
            out.push('\n');
        }
        Ok(out.into_bytes())
    }

    /// Return the number of entries currently in the buffer.
    pub fn len(&self) -> usize {
        self.buffer.lock().map(|buf| buf.entries.len()).unwrap_or(0)
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Visitor that extracts the `message` field and collects the rest.
#[derive(Default)]
struct FieldVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields
                .push((field.name().to_string(), format!("{value:?}")));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields
                .push((field.name().to_string(), value.to_string()));
        }
    }
}

/// Errors reading the log bundle.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("failed to read log file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("in-memory log buffer is poisoned")]
    BufferPoisoned,
}

/// The raw diagnostic log. Empty is a valid state, distinct from a read error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogBundle(Vec<u8>);

impl LogBundle {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The content as text; invalid UTF-8 is replaced.
    pub fn to_text(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }
}

/// Where the log bundle comes from.
#[derive(Debug, Clone)]
pub enum LogSource {
    /// The in-memory ring buffer.
    Memory(LogReader),
    /// A log file written by the daemon.
    File(PathBuf),
}

impl LogSource {
    /// The file named by `service.log_path` if set, the ring buffer otherwise.
    pub fn for_service(service: &ServiceConfig, reader: &LogReader) -> Self {
        match service.log_path.as_deref() {
            Some(path) if !path.is_empty() => Self::File(PathBuf::from(path)),
            _ => Self::Memory(reader.clone()),
        }
    }

    /// Read the current bundle.
    pub async fn read(&self) -> Result<LogBundle, LogError> {
        match self {
            Self::Memory(reader) => reader.render().map(LogBundle),
            Self::File(path) => tokio::fs::read(path)
                .await
                .map(LogBundle)
                .map_err(|source| LogError::Read {
                    path: path.clone(),
                    source,
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    #[test]
    fn test_log_collector_captures_events() {
        let collector = LogCollector::new(100);
        let reader = collector.reader();

        let _guard = tracing_subscriber::registry().with(collector).set_default();

        tracing::info!("hello from test");
        tracing::warn!(listener = "0", "a warning");

        let entries = reader.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].level, Level::INFO);
        assert_eq!(entries[1].level, Level::WARN);
        assert_eq!(
            entries[1].fields,
            vec![("listener".to_string(), "0".to_string())]
        );
    }

    #[test]
    fn test_log_collector_ring_buffer() {
        let collector = LogCollector::new(3);
        let reader = collector.reader();

        let _guard = tracing_subscriber::registry().with(collector).set_default();

        tracing::info!("one");
        tracing::info!("two");
        tracing::info!("three");
        tracing::info!("four");

        let entries = reader.entries();
        assert_eq!(entries.len(), 3);
        // First entry ("one") should have been evicted
        assert!(entries[0].message.contains("two"));
    }

    #[test]
    fn test_log_reader_is_empty() {
        let collector = LogCollector::new(10);
        let reader = collector.reader();
        assert!(reader.is_empty());
        assert_eq!(reader.len(), 0);
        assert!(reader.render().unwrap().is_empty());
    }

    #[test]
    fn test_render_lines() {
        let collector = LogCollector::new(10);
        let reader = collector.reader();
        let _guard = tracing_subscriber::registry().with(collector).set_default();

        tracing::error!(code = 7, "upstream failed");

        let text = String::from_utf8(reader.render().unwrap()).unwrap();
        assert!(text.contains("ERROR"));
        assert!(text.contains("upstream failed code=7"));
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn test_source_selection() {
        let reader = LogCollector::new(1).reader();
        let mut service = ServiceConfig::default();
        assert!(matches!(
            LogSource::for_service(&service, &reader),
            LogSource::Memory(_)
        ));

        service.log_path = Some("/var/log/edgedns.log".to_string());
        assert!(matches!(
            LogSource::for_service(&service, &reader),
            LogSource::File(_)
        ));
    }

    #[tokio::test]
    async fn test_file_source_reads_content() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("edgedns.log");
        tokio::fs::write(&path, b"line one\n").await.unwrap();

        let bundle = LogSource::File(path).read().await.unwrap();
        assert_eq!(bundle.as_bytes(), b"line one\n");
    }

    #[tokio::test]
    async fn test_file_source_empty_is_not_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("edgedns.log");
        tokio::fs::write(&path, b"").await.unwrap();

        let bundle = LogSource::File(path).read().await.unwrap();
        assert!(bundle.is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_is_read_error() {
        let result = LogSource::File(PathBuf::from("/nonexistent/edgedns.log"))
            .read()
            .await;
        assert!(matches!(result, Err(LogError::Read { .. })));
    }
}
