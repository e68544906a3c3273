// /////////////////////////////////////////////////////////////////////////////
// Buildflow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Domain service ports: the plugin contract and the logging capability.
//!
//! These are infrastructure ports in the DDD sense — async traits that deal
//! with I/O, implemented outside the domain and injected as `Arc<dyn …>`.

mod log;
mod plugin;

pub use log::{LogHandle, LogSink};
pub use plugin::{
    CleanTarget, DisposeTarget, FileSpecStream, FileStream, LifecycleHooks, PathFilter, Plugin, PluginBuilder,
    ProcessFile, ProcessFiles, ReadSource, WatchEmitter, WatchSource, WatchSpecStream, WorkerModuleRef,
};
