// /////////////////////////////////////////////////////////////////////////////
// Buildflow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Engine Events
//!
//! The engine's only coupling to its host is this small set of typed
//! events, fanned out on the facade's event bus and mirrored to each
//! plugin's lifecycle hooks. Keeping the surface explicit keeps the
//! pipeline core testable in isolation.

use std::collections::HashMap;
use std::fmt::{self, Display};
use std::str::FromStr;

use crate::entities::{ChangedFile, RunContext, RunSummary};
use crate::EngineError;

/// Severity of a [`LogEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    /// Diagnostic output, suppressed unless the engine is in debug mode.
    Debug,
    /// Informational output.
    Info,
    /// Something looks wrong but the run continues.
    Warning,
    /// Something failed.
    Error,
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warning => write!(f, "warning"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

impl FromStr for LogLevel {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warning" | "warn" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            other => Err(EngineError::validation(format!("Unknown log level: {}", other))),
        }
    }
}

/// A structured log event.
#[derive(Debug, Clone)]
pub struct LogEvent {
    /// Severity.
    pub level: LogLevel,
    /// Human-readable message.
    pub message: String,
    /// The error that triggered the event, for error-level events.
    pub error: Option<EngineError>,
    /// Open structured fields.
    pub fields: HashMap<String, serde_json::Value>,
}

impl LogEvent {
    /// Creates an event at an explicit level.
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        LogEvent {
            level,
            message: message.into(),
            error: None,
            fields: HashMap::new(),
        }
    }

    /// Creates an info-level event.
    pub fn info(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, message)
    }

    /// Creates a debug-level event.
    pub fn debug(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Debug, message)
    }

    /// Creates a warning-level event.
    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Warning, message)
    }

    /// Creates an error-level event carrying the error.
    pub fn error(error: EngineError) -> Self {
        LogEvent {
            level: LogLevel::Error,
            message: error.to_string(),
            error: Some(error),
            fields: HashMap::new(),
        }
    }

    /// Adds one structured field.
    pub fn with_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }
}

/// One of the five events the engine facade emits.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A run is starting. Carries a clone of the run context.
    Start(RunContext),
    /// A run finished. Carries the summary.
    Finish(RunSummary),
    /// A watcher reported a change. Emitted eagerly, before debouncing.
    Change(ChangedFile),
    /// A structured log event.
    Log(LogEvent),
    /// A fatal or run-aborting error.
    Error(EngineError),
}

impl EngineEvent {
    /// Stable name of the event kind, for filtering and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineEvent::Start(_) => "start",
            EngineEvent::Finish(_) => "finish",
            EngineEvent::Change(_) => "change",
            EngineEvent::Log(_) => "log",
            EngineEvent::Error(_) => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_round_trip() {
        for level in [LogLevel::Debug, LogLevel::Info, LogLevel::Warning, LogLevel::Error] {
            assert_eq!(level.to_string().parse::<LogLevel>().unwrap(), level);
        }
        assert_eq!("warn".parse::<LogLevel>().unwrap(), LogLevel::Warning);
        assert!("trace".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_error_event_carries_error() {
        let event = LogEvent::error(EngineError::internal("boom"));
        assert_eq!(event.level, LogLevel::Error);
        assert!(event.error.is_some());
        assert_eq!(event.message, "Internal error: boom");
    }

    #[test]
    fn test_event_kinds() {
        assert_eq!(EngineEvent::Log(LogEvent::info("x")).kind(), "log");
        assert_eq!(EngineEvent::Error(EngineError::internal("x")).kind(), "error");
    }
}
