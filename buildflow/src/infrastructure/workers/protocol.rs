// /////////////////////////////////////////////////////////////////////////////
// Buildflow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Worker Wire Protocol
//!
//! Three message frames flow over a worker's message port, in both
//! directions:
//!
//! - [`WorkerMessage::Request`] — a fresh request; `id` is monotonically
//!   increasing per side
//! - [`WorkerMessage::SubRequest`] — a request issued by a handler while it
//!   services an original request; routed to the original request's
//!   sub-handler table first
//! - [`WorkerMessage::Response`] — resolves or rejects the matching pending
//!   request; late duplicates are ignored
//!
//! The event vocabulary the engine core uses is [`WorkerEvent`].

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

use super::wire::WireValue;

/// Events spoken over the worker protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkerEvent {
    /// Load a plugin module into the executor.
    LoadModule,
    /// Execute a loaded module's per-file capability.
    ExecCapability,
    /// A log event, usually a sub-request of an execution.
    Log,
    /// Worker startup handshake.
    Online,
    /// Orderly shutdown request.
    Terminated,
}

impl Display for WorkerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerEvent::LoadModule => write!(f, "load-module"),
            WorkerEvent::ExecCapability => write!(f, "exec-capability"),
            WorkerEvent::Log => write!(f, "log"),
            WorkerEvent::Online => write!(f, "online"),
            WorkerEvent::Terminated => write!(f, "terminated"),
        }
    }
}

/// One frame on a worker's message port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkerMessage {
    /// A fresh request.
    Request {
        /// Sender-side monotonic id.
        id: u64,
        /// What is being asked.
        event: WorkerEvent,
        /// Projected payload.
        data: WireValue,
    },
    /// A request issued while servicing `original_request_id`.
    SubRequest {
        /// Sender-side monotonic id.
        id: u64,
        /// The request whose handler issued this one.
        original_request_id: u64,
        /// What is being asked.
        event: WorkerEvent,
        /// Projected payload.
        data: WireValue,
    },
    /// Resolution of a prior request.
    Response {
        /// The request being answered.
        request_id: u64,
        /// Success payload or projected fault.
        outcome: Result<WireValue, WireValue>,
    },
}

impl WorkerMessage {
    /// The id of the request this frame opens, if any.
    pub fn request_id(&self) -> Option<u64> {
        match self {
            WorkerMessage::Request { id, .. } | WorkerMessage::SubRequest { id, .. } => Some(*id),
            WorkerMessage::Response { .. } => None,
        }
    }
}
