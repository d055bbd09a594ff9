//! Capture pumps: async tasks that drain a child stream into a sink.

use crate::sink::{LogSink, StreamKind};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Shared line/byte counters for one service's capture.
///
/// Counters survive relaunches, so totals cover the whole supervised
/// lifetime of the service.
#[derive(Debug, Clone, Default)]
pub struct CaptureCounters {
    lines: Arc<AtomicI64>,
    bytes: Arc<AtomicI64>,
}

impl CaptureCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> i64 {
        self.lines.load(Ordering::SeqCst)
    }

    pub fn bytes(&self) -> i64 {
        self.bytes.load(Ordering::SeqCst)
    }

    fn record(&self, line: &str) {
        self.lines.fetch_add(1, Ordering::SeqCst);
        self.bytes.fetch_add(line.len() as i64, Ordering::SeqCst);
    }
}

/// Spawn a capture pump for one child stream.
///
/// The pump runs until the stream ends (child exited), a read error occurs,
/// or the cancellation token fires. The returned handle completes when the
/// pump has written everything it will ever write, so awaiting it after
/// child exit guarantees the sink holds the full output.
pub fn spawn_capture<R>(
    service: &str,
    stream: R,
    kind: StreamKind,
    sink: Arc<dyn LogSink>,
    counters: CaptureCounters,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let service = service.to_string();

    tokio::spawn(async move {
        debug!(service = %service, stream = %kind, "Capture pump started");
        let reader = BufReader::new(stream);
        let mut lines = reader.lines();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(service = %service, stream = %kind, "Capture pump cancelled");
                    break;
                }
                result = lines.next_line() => {
                    match result {
                        Ok(Some(line)) => {
                            counters.record(&line);
                            if let Err(e) = sink.write_line(kind, &line) {
                                warn!(
                                    service = %service,
                                    stream = %kind,
                                    error = %e,
                                    "Failed to write captured line"
                                );
                            }
                        }
                        Ok(None) => {
                            debug!(service = %service, stream = %kind, "Stream ended");
                            break;
                        }
                        Err(e) => {
                            warn!(
                                service = %service,
                                stream = %kind,
                                error = %e,
                                "Error reading from child stream"
                            );
                            break;
                        }
                    }
                }
            }
        }

        if let Err(e) = sink.flush() {
            warn!(service = %service, error = %e, "Failed to flush sink");
        }
    })
}
