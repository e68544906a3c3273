// /////////////////////////////////////////////////////////////////////////////
// Buildflow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Run Lifecycle Entities
//!
//! A [`RunContext`] identifies and configures one pass through the pipeline;
//! a [`RunSummary`] is produced exactly once when that pass completes.
//!
//! ## Full and partial runs
//!
//! A run is either *full* (the sources are read from scratch) or *partial*
//! (a watch-mode rebuild driven by a deduped batch of changed files). The
//! two are mutually exclusive; `changed_files` may legitimately be empty in
//! both cases.
//!
//! ## Sharing
//!
//! The context is handed to plugins by reference and to event listeners as a
//! clone, so external mutation can never affect a run in flight.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

use crate::entities::ChangedFile;
use crate::services::LogHandle;
use crate::value_objects::Concurrency;

/// Context for one pass through the pipeline.
#[derive(Debug, Clone)]
pub struct RunContext {
    id: Uuid,
    cwd: PathBuf,
    concurrency: Concurrency,
    full: bool,
    changed_files: Vec<ChangedFile>,
    dev: bool,
    debug: bool,
    log: LogHandle,
}

impl RunContext {
    /// Creates the context for a full run.
    pub fn full_run(cwd: PathBuf, concurrency: Concurrency, dev: bool, debug: bool, log: LogHandle) -> Self {
        RunContext {
            id: Uuid::new_v4(),
            cwd,
            concurrency,
            full: true,
            changed_files: Vec::new(),
            dev,
            debug,
            log,
        }
    }

    /// Creates the context for a partial (watch-mode) run driven by a batch
    /// of changed files.
    pub fn partial_run(
        cwd: PathBuf,
        concurrency: Concurrency,
        changed_files: Vec<ChangedFile>,
        dev: bool,
        debug: bool,
        log: LogHandle,
    ) -> Self {
        RunContext {
            id: Uuid::new_v4(),
            cwd,
            concurrency,
            full: false,
            changed_files,
            dev,
            debug,
            log,
        }
    }

    /// Unique id of this run.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Working directory the run resolves against.
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Concurrency bound for every step of this run.
    pub fn concurrency(&self) -> usize {
        self.concurrency.get()
    }

    /// Whether this is a full run.
    pub fn is_full(&self) -> bool {
        self.full
    }

    /// Whether this is a partial (watch-mode) run.
    pub fn is_partial(&self) -> bool {
        !self.full
    }

    /// The deduped changed files driving a partial run. Empty for full runs
    /// (and legitimately possibly empty for partial ones).
    pub fn changed_files(&self) -> &[ChangedFile] {
        &self.changed_files
    }

    /// Whether the run is in dev mode.
    pub fn dev(&self) -> bool {
        self.dev
    }

    /// Whether the run is in debug mode.
    pub fn debug(&self) -> bool {
        self.debug
    }

    /// The logging capability plugins use during this run.
    pub fn log(&self) -> &LogHandle {
        &self.log
    }
}

/// File count and byte totals observed at one end of the pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamTotals {
    /// Number of files that crossed the observation point.
    pub file_count: u64,
    /// Total contents size, in bytes.
    pub file_size: u64,
}

impl StreamTotals {
    /// Creates totals from explicit counts.
    pub fn new(file_count: u64, file_size: u64) -> Self {
        StreamTotals { file_count, file_size }
    }
}

/// Wall-clock timing of a completed run.
#[derive(Debug, Clone, Copy)]
pub struct RunTiming {
    /// When the run started.
    pub start: DateTime<Utc>,
    /// When the run finished.
    pub end: DateTime<Utc>,
    /// Monotonic elapsed time between the two.
    pub elapsed: Duration,
}

/// Everything observable about a completed run. Produced exactly once.
#[derive(Debug, Clone)]
pub struct RunSummary {
    run_id: Uuid,
    cwd: PathBuf,
    concurrency: usize,
    full: bool,
    changed_files: Vec<ChangedFile>,
    dev: bool,
    debug: bool,
    input: StreamTotals,
    output: StreamTotals,
    timing: RunTiming,
}

impl RunSummary {
    /// Builds the summary for a completed run.
    pub fn new(run: &RunContext, input: StreamTotals, output: StreamTotals, timing: RunTiming) -> Self {
        RunSummary {
            run_id: run.id(),
            cwd: run.cwd().to_path_buf(),
            concurrency: run.concurrency(),
            full: run.is_full(),
            changed_files: run.changed_files().to_vec(),
            dev: run.dev(),
            debug: run.debug(),
            input,
            output,
            timing,
        }
    }

    /// Id of the run this summary describes.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Working directory of the run.
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Concurrency bound of the run.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Whether the run was full.
    pub fn is_full(&self) -> bool {
        self.full
    }

    /// Changed files that drove the run (empty for full runs).
    pub fn changed_files(&self) -> &[ChangedFile] {
        &self.changed_files
    }

    /// Whether the run was in dev mode.
    pub fn dev(&self) -> bool {
        self.dev
    }

    /// Whether the run was in debug mode.
    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Totals observed entering the first step.
    pub fn input(&self) -> StreamTotals {
        self.input
    }

    /// Totals observed leaving the final step.
    pub fn output(&self) -> StreamTotals {
        self.output
    }

    /// Wall-clock timing.
    pub fn timing(&self) -> RunTiming {
        self.timing
    }
}
