// /////////////////////////////////////////////////////////////////////////////
// Buildflow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Worker Pool and RPC
//!
//! Per-file plugin work can be offloaded to a pool of isolated execution
//! contexts: OS threads, each running its own current-thread runtime and
//! hosting a [`WorkerExecutor`] that instantiates plugin modules by id and
//! invokes their capabilities.
//!
//! ## Shape
//!
//! - [`wire`] — `WireValue`, the depth-bounded projection every payload
//!   passes through before crossing the boundary, plus in-place update for
//!   values the main side retains
//! - [`protocol`] — the request / sub-request / response message frames and
//!   the event vocabulary
//! - [`messenger`] — the RPC multiplexer used symmetrically on both sides
//! - [`executor`] — the worker-side module host and the contract worker
//!   plugins implement
//! - [`worker`] — one execution context: thread, runtime, demux
//! - [`pool`] — round-robin pool sized to the engine's concurrency
//! - [`dispatch`] — the bridge implementing the domain's `ProcessFile`
//!   capability by round-tripping through the pool
//!
//! Workers share no memory with the main side; everything crosses through
//! the wire protocol. Backpressure is the step runner's concern — the pool
//! selects a worker per file but never queues beyond that.

pub mod dispatch;
pub mod executor;
pub mod messenger;
pub mod pool;
pub mod protocol;
pub mod wire;
mod worker;

pub use dispatch::WorkerDispatch;
pub use executor::{ModuleRegistry, WorkerExecutor, WorkerFile, WorkerLogger, WorkerPlugin, WorkerRunInfo};
pub use messenger::Messenger;
pub use pool::WorkerPool;
pub use protocol::{WorkerEvent, WorkerMessage};
pub use wire::WireValue;
pub use worker::{FaultHandler, Worker};
