// /////////////////////////////////////////////////////////////////////////////
// Buildflow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Engine Error Types
//!
//! This module provides the single error type shared by every layer of the
//! buildflow engine. Each variant represents a specific failure mode and is
//! designed to carry enough context to identify what went wrong and where.
//!
//! ## Error Categories
//!
//! - **Plugin faults** — a plugin invocation failed; the error names the
//!   plugin and the operation and carries the underlying cause
//! - **Protocol faults** — the worker wire protocol was violated (unknown
//!   event, invalid request id, duplicate response)
//! - **Disposal faults** — use of a disposed engine, pool, or worker
//! - **Validation faults** — invalid plugin definitions, files, or paths,
//!   rejected at the boundary
//! - **Worker crashes** — an execution context exited without being asked
//!
//! ## Error Handling Strategy
//!
//! Errors are the cancellation signal inside the pipeline: any error in a
//! step poisons its output channel, which poisons all downstream channels,
//! and the run rejects as a whole. The engine never attempts per-file
//! recovery.
//!
//! ## Performance Considerations
//!
//! - **Cloneable**: errors can be cloned for event fan-out and logging
//! - **String Allocation**: error messages are allocated only when errors
//!   occur

use thiserror::Error;

/// Errors produced by the buildflow engine.
///
/// This enum represents all failure modes of the engine core. Variants use
/// string payloads so errors stay cloneable across the event surface; the
/// one structured variant, [`EngineError::PluginFault`], preserves the
/// failing plugin, the operation, and the underlying cause.
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    /// A plugin invocation failed. Rendered with the fixed contextual
    /// message identifying the plugin and the operation.
    #[error("An error occurred in {plugin} while {operation}.")]
    PluginFault {
        /// Name of the plugin that failed.
        plugin: String,
        /// Human-readable description of the operation, e.g. "reading
        /// source files" or "handling the start event".
        operation: String,
        /// The underlying failure.
        #[source]
        cause: Box<EngineError>,
    },

    /// The worker wire protocol was violated.
    #[error("Protocol fault: {0}")]
    Protocol(String),

    /// An operation was attempted on a disposed engine, pool, or worker.
    #[error("Disposed: {0}")]
    Disposed(String),

    /// A value was rejected at a boundary (invalid plugin definition,
    /// invalid file spec, absolute path, missing change kind).
    #[error("Validation error: {0}")]
    Validation(String),

    /// A worker execution context exited without being asked. Fatal.
    #[error("Worker crashed: {0}")]
    WorkerCrash(String),

    /// IO error while a plugin or the engine touched the host system.
    #[error("IO error: {0}")]
    Io(String),

    /// Serialization of a value crossing the worker boundary failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An operation was cancelled because the run was aborted.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// An unexpected internal failure (task panic, broken invariant).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Wraps a failure from a plugin invocation with the plugin name and the
    /// operation being performed.
    pub fn plugin_fault(plugin: impl Into<String>, operation: impl Into<String>, cause: EngineError) -> Self {
        Self::PluginFault {
            plugin: plugin.into(),
            operation: operation.into(),
            cause: Box::new(cause),
        }
    }

    /// Creates a new protocol fault
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Creates the disposal fault raised by post-dispose operations
    pub fn disposed(what: impl Into<String>) -> Self {
        Self::Disposed(what.into())
    }

    /// Creates a new validation fault
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Creates a new worker crash error
    pub fn worker_crash(msg: impl Into<String>) -> Self {
        Self::WorkerCrash(msg.into())
    }

    /// Creates a new IO error
    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }

    /// Creates a new serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Creates a new cancellation error
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    /// Creates a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Checks whether this error is the disposal fault
    pub fn is_disposed(&self) -> bool {
        matches!(self, EngineError::Disposed(_))
    }

    /// Checks whether this error is fatal to the whole engine (rather than
    /// to a single run)
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::WorkerCrash(_))
    }

    /// Gets the error category for log and event tagging
    pub fn category(&self) -> &'static str {
        match self {
            EngineError::PluginFault { .. } => "plugin",
            EngineError::Protocol(_) => "protocol",
            EngineError::Disposed(_) => "disposal",
            EngineError::Validation(_) => "validation",
            EngineError::WorkerCrash(_) => "worker",
            EngineError::Io(_) => "io",
            EngineError::Serialization(_) => "serialization",
            EngineError::Cancelled(_) => "cancellation",
            EngineError::Internal(_) => "internal",
        }
    }

    /// Walks to the innermost cause of a (possibly nested) plugin fault.
    pub fn root_cause(&self) -> &EngineError {
        match self {
            EngineError::PluginFault { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}

// Implement conversion from standard library errors
impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plugin_fault_message_format() {
        let err = EngineError::plugin_fault(
            "markdown",
            "processing file1.txt",
            EngineError::internal("boom"),
        );
        assert_eq!(
            err.to_string(),
            "An error occurred in markdown while processing file1.txt."
        );
    }

    #[test]
    fn test_plugin_fault_preserves_cause() {
        let err = EngineError::plugin_fault("p", "reading source files", EngineError::io_error("denied"));
        assert_eq!(err.root_cause().to_string(), "IO error: denied");
        let source = std::error::Error::source(&err).expect("cause is exposed as source");
        assert_eq!(source.to_string(), "IO error: denied");
    }

    #[test]
    fn test_categories() {
        assert_eq!(EngineError::protocol("x").category(), "protocol");
        assert_eq!(EngineError::disposed("engine").category(), "disposal");
        assert_eq!(EngineError::validation("x").category(), "validation");
        assert_eq!(EngineError::worker_crash("x").category(), "worker");
    }

    #[test]
    fn test_disposed_detection() {
        assert!(EngineError::disposed("engine").is_disposed());
        assert!(!EngineError::internal("x").is_disposed());
    }

    #[test]
    fn test_nested_root_cause() {
        let inner = EngineError::validation("bad path");
        let mid = EngineError::plugin_fault("a", "op", inner);
        let outer = EngineError::plugin_fault("b", "op", mid);
        assert_eq!(outer.root_cause().to_string(), "Validation error: bad path");
    }
}
