// /////////////////////////////////////////////////////////////////////////////
// Buildflow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Buildflow
//!
//! A streaming asset build engine. Buildflow ingests virtual files from one
//! or more source plugins, transforms them through an ordered chain of
//! processor plugins, and yields the resulting stream — in one-shot builds
//! or in long-lived watch mode with coalesced incremental rebuilds.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Application Layer                          │
//! │  (Engine facade, pipeline driver, step runner, watcher)     │
//! └─────────────────────────────────────────────────────────────┘
//!                                │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Domain Layer                             │
//! │  (Files, runs, plugin contract, events — buildflow-domain)  │
//! └─────────────────────────────────────────────────────────────┘
//!                                │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                Infrastructure Layer                         │
//! │  (Stream primitives, plugin controller, workers, logging)   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Concepts
//!
//! ### Pipeline
//! An ordered list of plugins. Steps execute sequentially in insertion
//! order, but each step processes files concurrently, bounded by the run's
//! concurrency.
//!
//! ### Channels
//! Steps are linked by single-producer, single-consumer async channels with
//! end/poison signalling. Poisoning is the cancellation mechanism: any error
//! in a step poisons its output channel, which propagates downstream, and
//! the run rejects as a whole.
//!
//! ### Watch mode
//! Watch plugins supply change events; the watch coordinator merges them,
//! debounces bursts into batches, collapses each batch to one effective
//! change per path, and dispatches a partial run per batch.
//!
//! ### Worker pool
//! Per-file work can be offloaded to a pool of isolated worker threads
//! hosting plugin modules, spoken to over a small request/response wire
//! protocol with depth-bounded value projection.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! let engine = BuildEngine::new(EngineConfig::default())?;
//! engine.use_plugin(PluginBuilder::named("source").read_specs(specs)).await?;
//! engine.use_plugin(PluginBuilder::from_fn(|file, _run| async move { Ok(vec![file]) })).await?;
//! let summary = engine.build().await?;
//! ```

pub mod application;
pub mod infrastructure;

// Tests are organized as:
// - Unit tests: #[cfg(test)] modules within each source file
// - Integration tests: separate files in tests/ directory

// Re-export domain types for convenient access
pub use buildflow_domain::{
    ChangeKind, ChangedFile, ChangedFileSpec, Concurrency, EngineError, EngineEvent, FileSpec, LogEvent, LogHandle,
    LogLevel, PathFilter, Plugin, PluginBuilder, RelativePath, RunContext, RunSummary, StreamTotals, VirtualFile,
    WatchEvent,
};

pub use application::engine::{BuildEngine, EngineConfig};
pub use infrastructure::workers::{ModuleRegistry, WireValue, WorkerFile, WorkerPlugin, WorkerRunInfo};
