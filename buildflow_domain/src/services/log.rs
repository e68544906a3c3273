// /////////////////////////////////////////////////////////////////////////////
// Buildflow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Logging Capability
//!
//! [`LogHandle`] is the logging capability carried by every run context.
//! The domain only defines the port ([`LogSink`]); the infrastructure layer
//! supplies the sink that feeds the engine's event bus and the `tracing`
//! subscriber.

use std::fmt;
use std::sync::Arc;

use crate::events::{LogEvent, LogLevel};
use crate::EngineError;

/// Receives structured log events. Implemented by the infrastructure log
/// emitter; a no-op implementation backs [`LogHandle::disabled`].
pub trait LogSink: Send + Sync {
    /// Delivers one event.
    fn emit(&self, event: LogEvent);
}

struct NullSink;

impl LogSink for NullSink {
    fn emit(&self, _event: LogEvent) {}
}

/// The per-run logging capability.
///
/// Cheap to clone; debug-level events are dropped here unless the engine is
/// in debug mode, so plugins can log freely.
#[derive(Clone)]
pub struct LogHandle {
    sink: Arc<dyn LogSink>,
    debug: bool,
}

impl LogHandle {
    /// Wraps a sink. `debug` controls whether debug-level events pass.
    pub fn new(sink: Arc<dyn LogSink>, debug: bool) -> Self {
        LogHandle { sink, debug }
    }

    /// A handle that drops everything. Used by tests and detached contexts.
    pub fn disabled() -> Self {
        LogHandle {
            sink: Arc::new(NullSink),
            debug: false,
        }
    }

    /// Emits a prebuilt event, applying debug suppression.
    pub fn emit(&self, event: LogEvent) {
        if event.level == LogLevel::Debug && !self.debug {
            return;
        }
        self.sink.emit(event);
    }

    /// Logs an info-level message.
    pub fn info(&self, message: impl Into<String>) {
        self.emit(LogEvent::info(message));
    }

    /// Logs a debug-level message. Dropped unless debug mode is on.
    pub fn debug(&self, message: impl Into<String>) {
        self.emit(LogEvent::debug(message));
    }

    /// Logs a warning.
    pub fn warning(&self, message: impl Into<String>) {
        self.emit(LogEvent::warning(message));
    }

    /// Logs an error.
    pub fn error(&self, error: EngineError) {
        self.emit(LogEvent::error(error));
    }
}

impl fmt::Debug for LogHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogHandle").field("debug", &self.debug).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Capture(Mutex<Vec<LogEvent>>);

    impl LogSink for Capture {
        fn emit(&self, event: LogEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    #[test]
    fn test_debug_suppressed_by_default() {
        let capture = Arc::new(Capture::default());
        let handle = LogHandle::new(capture.clone(), false);
        handle.debug("hidden");
        handle.info("visible");
        let events = capture.0.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message, "visible");
    }

    #[test]
    fn test_debug_passes_in_debug_mode() {
        let capture = Arc::new(Capture::default());
        let handle = LogHandle::new(capture.clone(), true);
        handle.debug("shown");
        assert_eq!(capture.0.lock().unwrap().len(), 1);
    }
}
