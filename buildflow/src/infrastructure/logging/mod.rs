// /////////////////////////////////////////////////////////////////////////////
// Buildflow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Log Emitter
//!
//! Maps structured [`LogEvent`]s onto two surfaces at once: the engine's
//! event bus (so hosts and plugin `on_log` hooks observe them) and the
//! `tracing` ecosystem at the corresponding level.
//!
//! Debug suppression happens upstream in [`LogHandle`]
//! (`buildflow_domain::LogHandle`), so everything arriving here is meant to
//! be seen.

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use buildflow_domain::{EngineEvent, LogEvent, LogLevel, LogSink};

/// A [`LogSink`] that forwards log events into the engine event bus and
/// mirrors them to `tracing`.
pub struct BusLogSink {
    bus: broadcast::Sender<EngineEvent>,
}

impl BusLogSink {
    /// Wraps the engine's event bus sender.
    pub fn new(bus: broadcast::Sender<EngineEvent>) -> Self {
        BusLogSink { bus }
    }
}

impl LogSink for BusLogSink {
    fn emit(&self, event: LogEvent) {
        match event.level {
            LogLevel::Debug => debug!(target: "buildflow", "{}", event.message),
            LogLevel::Info => info!(target: "buildflow", "{}", event.message),
            LogLevel::Warning => warn!(target: "buildflow", "{}", event.message),
            LogLevel::Error => {
                error!(target: "buildflow", error = ?event.error, "{}", event.message)
            }
        }
        // No receivers just means nobody is listening yet.
        let _ = self.bus.send(EngineEvent::Log(event));
    }
}

/// Installs a default `tracing` subscriber honoring `RUST_LOG`.
///
/// Optional: hosts that configure their own subscriber skip this. Calling
/// it twice is harmless.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .try_init();
}
