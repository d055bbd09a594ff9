//! Log sinks for captured child output.

use chrono::Utc;
use parking_lot::Mutex;
use pidone_common::{SupervisorError, SupervisorResult};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

/// Which child stream a captured line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Stdout => write!(f, "stdout"),
            StreamKind::Stderr => write!(f, "stderr"),
        }
    }
}

/// Destination for one service's captured output.
///
/// A sink is exclusively owned by one service; pumps for both of that
/// service's streams share it, so writes take an internal lock.
pub trait LogSink: Send + Sync {
    /// Write one captured line.
    fn write_line(&self, stream: StreamKind, line: &str) -> SupervisorResult<()>;

    /// Flush any buffered output.
    fn flush(&self) -> SupervisorResult<()>;
}

/// Append-mode file sink.
///
/// Lines are flushed as they are written: captured output must survive a
/// supervisor or service crash.
pub struct FileSink {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl FileSink {
    /// Create a file sink, creating parent directories as needed.
    pub fn create(path: PathBuf) -> SupervisorResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SupervisorError::capture(
                    path.display().to_string(),
                    format!("Failed to create log directory: {}", e),
                )
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                SupervisorError::capture(
                    path.display().to_string(),
                    format!("Failed to open log file: {}", e),
                )
            })?;

        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            path,
        })
    }

    /// Path of the underlying log file.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl LogSink for FileSink {
    fn write_line(&self, stream: StreamKind, line: &str) -> SupervisorResult<()> {
        let formatted = format!(
            "[{}] [{}] {}\n",
            Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            stream,
            line
        );

        let mut writer = self.writer.lock();
        writer
            .write_all(formatted.as_bytes())
            .and_then(|_| writer.flush())
            .map_err(|e| {
                SupervisorError::capture(
                    self.path.display().to_string(),
                    format!("Failed to write to log file: {}", e),
                )
            })
    }

    fn flush(&self) -> SupervisorResult<()> {
        self.writer.lock().flush().map_err(|e| {
            SupervisorError::capture(
                self.path.display().to_string(),
                format!("Failed to flush log file: {}", e),
            )
        })
    }
}

/// In-memory sink, for tests.
#[derive(Default)]
pub struct MemorySink {
    lines: Mutex<Vec<(StreamKind, String)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of captured lines.
    pub fn lines(&self) -> Vec<(StreamKind, String)> {
        self.lines.lock().clone()
    }
}

impl LogSink for MemorySink {
    fn write_line(&self, stream: StreamKind, line: &str) -> SupervisorResult<()> {
        self.lines.lock().push((stream, line.to_string()));
        Ok(())
    }

    fn flush(&self) -> SupervisorResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_sink_writes_tagged_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("novnc.log");

        let sink = FileSink::create(path.clone()).unwrap();
        sink.write_line(StreamKind::Stdout, "listening on 6080")
            .unwrap();
        sink.write_line(StreamKind::Stderr, "deprecation warning")
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("[stdout] listening on 6080"));
        assert!(content.contains("[stderr] deprecation warning"));
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn test_file_sink_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svc.log");

        {
            let sink = FileSink::create(path.clone()).unwrap();
            sink.write_line(StreamKind::Stdout, "first run").unwrap();
        }
        {
            let sink = FileSink::create(path.clone()).unwrap();
            sink.write_line(StreamKind::Stdout, "second run").unwrap();
        }

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("first run"));
        assert!(content.contains("second run"));
    }

    #[test]
    fn test_memory_sink() {
        let sink = MemorySink::new();
        sink.write_line(StreamKind::Stdout, "hello").unwrap();
        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0], (StreamKind::Stdout, "hello".to_string()));
    }
}
