// /////////////////////////////////////////////////////////////////////////////
// Buildflow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Buildflow Domain
//!
//! The buildflow domain represents the core business concepts of the build
//! engine: virtual files flowing through a pipeline of plugins, the runs that
//! drive them, and the events the engine emits while doing so. It is
//! completely independent of external concerns like the async runtime, worker
//! threads, or the host filesystem.
//!
//! ## Module Structure
//!
//! - [`entities`] — objects with identity and a lifecycle: [`VirtualFile`],
//!   [`ChangedFile`], [`RunContext`], [`RunSummary`]
//! - [`value_objects`] — immutable, self-validating values:
//!   [`RelativePath`], [`ChangeKind`], [`Concurrency`]
//! - [`services`] — the plugin contract: capability ports, the normalized
//!   [`Plugin`] record, and the [`PluginBuilder`] normalizer
//! - [`events`] — the typed event surface the engine exposes to its host
//! - [`error`] — the single error type shared by every layer
//!
//! ## Domain-Driven Design Concepts
//!
//! ### Entities
//! Entities have a distinct identity that runs through time. A
//! [`VirtualFile`] is mutated by plugins as it flows through the pipeline; a
//! [`RunContext`] identifies one pass through the pipeline.
//!
//! ### Value Objects
//! Value objects are immutable and defined by their attributes. A
//! [`RelativePath`] is validated and normalized at construction; an invalid
//! path cannot exist inside the engine.
//!
//! ### Ports
//! Plugin capabilities are async traits that deal with I/O; they are
//! implemented by plugin authors (or by infrastructure adapters, e.g. the
//! worker-pool dispatch capability) and injected as `Arc<dyn …>`.

pub mod entities;
pub mod error;
pub mod events;
pub mod services;
pub mod value_objects;

// Re-export the types that make up the public surface of the domain.
pub use entities::{
    ChangedFile, ChangedFileSpec, FileSpec, RunContext, RunSummary, RunTiming, StreamTotals, VirtualFile, WatchEvent,
};
pub use error::EngineError;
pub use events::{EngineEvent, LogEvent, LogLevel};
pub use services::{
    CleanTarget, DisposeTarget, FileSpecStream, FileStream, LifecycleHooks, LogHandle, LogSink, PathFilter, Plugin,
    PluginBuilder, ProcessFile, ProcessFiles, ReadSource, WatchEmitter, WatchSource, WatchSpecStream, WorkerModuleRef,
};
pub use value_objects::{ChangeKind, Concurrency, RelativePath};
