//! # pidone-capture
//!
//! Per-service output capture. Each background service (and each blocking
//! prerequisite) owns exactly one [`sink::LogSink`]; capture pumps read the
//! child's piped stdout/stderr line by line and write through the sink, so a
//! service's output never interleaves with another service's output or with
//! the supervisor's own logging.

pub mod pump;
pub mod sink;

pub use pump::{spawn_capture, CaptureCounters};
pub use sink::{FileSink, LogSink, MemorySink, StreamKind};
