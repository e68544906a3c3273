// /////////////////////////////////////////////////////////////////////////////
// Buildflow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Driver
//!
//! Chains plugin controllers into a run: fan-in of the source streams, one
//! step runner per processor with a fresh channel between neighbors, metric
//! observers at both ends, and a concurrent final drain.
//!
//! ## Run shape
//!
//! ```text
//! sources ──join──► [input metrics] ──► step 1 ──► … ──► step N ──► [output metrics] ──► drain
//! ```
//!
//! Policies: file ordering across sources is unspecified (first-available);
//! within a source it is preserved until a concurrent step reorders;
//! duplicate paths are allowed; a full run with zero sources yields an
//! empty stream without error; a partial run takes its non-deleted changed
//! files as input instead of re-reading sources. Any step error poisons the
//! chain and the run rejects as a whole.

mod step;

pub use step::run_step;

use byte_unit::{Byte, UnitType};
use chrono::Utc;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use buildflow_domain::{
    ChangeKind, EngineError, RunContext, RunSummary, RunTiming, StreamTotals, VirtualFile,
};

use crate::infrastructure::adapters::PluginController;
use crate::infrastructure::streams::{merge_streams, prefetch, stream_channel};

/// Byte-and-file counters observed at one end of a run.
#[derive(Debug, Default)]
struct TotalsCounter {
    files: AtomicU64,
    bytes: AtomicU64,
}

impl TotalsCounter {
    fn record(&self, file: &VirtualFile) {
        self.files.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(file.size(), Ordering::Relaxed);
    }

    fn totals(&self) -> StreamTotals {
        StreamTotals::new(self.files.load(Ordering::Relaxed), self.bytes.load(Ordering::Relaxed))
    }
}

/// An ordered chain of plugin controllers.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    controllers: Vec<Arc<PluginController>>,
}

impl Pipeline {
    /// Creates an empty pipeline.
    pub fn new() -> Self {
        Pipeline::default()
    }

    /// Builds a pipeline over an existing controller list.
    pub fn from_controllers(controllers: Vec<Arc<PluginController>>) -> Self {
        Pipeline { controllers }
    }

    /// Appends a controller. Order is execution order.
    pub fn add(&mut self, controller: Arc<PluginController>) {
        self.controllers.push(controller);
    }

    /// The controllers, in execution order.
    pub fn controllers(&self) -> &[Arc<PluginController>] {
        &self.controllers
    }

    /// Number of plugins in the pipeline.
    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    /// Whether the pipeline has no plugins.
    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    /// Drives one run through the pipeline and produces its summary.
    pub async fn run(&self, run: &RunContext) -> Result<RunSummary, EngineError> {
        let started = Instant::now();
        let start_time = Utc::now();
        let run = Arc::new(run.clone());
        debug!(run = %run.id(), full = run.is_full(), plugins = self.controllers.len(), "run starting");

        // 1. Input: fan-in of source streams, or the changed files of a
        // partial run (deletions never enter the pipeline).
        let input: BoxStream<'static, Result<VirtualFile, EngineError>> = if run.is_partial() {
            let files: Vec<Result<VirtualFile, EngineError>> = run
                .changed_files()
                .iter()
                .filter(|change| change.kind() != ChangeKind::Deleted)
                .map(|change| Ok(change.file().clone()))
                .collect();
            futures::stream::iter(files).boxed()
        } else {
            let mut sources = Vec::new();
            for controller in self.controllers.iter().filter(|c| c.has_read()) {
                sources.push(controller.read(&run).await?);
            }
            merge_streams(sources).boxed()
        };

        // 2. Input metrics observer.
        let input_totals = Arc::new(TotalsCounter::default());
        let observer = input_totals.clone();
        let mut current: BoxStream<'static, Result<VirtualFile, EngineError>> = input
            .inspect(move |item| {
                if let Ok(file) = item {
                    observer.record(file);
                }
            })
            .boxed();

        // 3. One step per processor, linked by fresh channels.
        let mut steps = Vec::new();
        for controller in self.controllers.iter().filter(|c| c.is_processor()) {
            let (writer, reader) = stream_channel();
            steps.push((
                controller.name().to_string(),
                tokio::spawn(run_step(controller.clone(), current, writer, run.clone())),
            ));
            current = reader.into_stream().boxed();
        }

        // 4. Output metrics observer and concurrent drain. The prefetch
        // keeps trailing steps' concurrency busy even with no consumer
        // behind the drain.
        let output_totals = Arc::new(TotalsCounter::default());
        let observer = output_totals.clone();
        let metered = current
            .inspect(move |item| {
                if let Ok(file) = item {
                    observer.record(file);
                }
            })
            .boxed();
        let mut drained = prefetch(metered, run.concurrency());
        let mut failure: Option<EngineError> = None;
        while let Some(item) = drained.next().await {
            if let Err(err) = item {
                failure = Some(err);
                break;
            }
        }
        drop(drained);

        // 5. Every step task settles before the run does.
        for (name, task) in steps {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    failure.get_or_insert(err);
                }
                Err(join_err) => {
                    failure.get_or_insert(EngineError::internal(format!("Step {} panicked: {}", name, join_err)));
                }
            }
        }
        if let Some(err) = failure {
            return Err(err);
        }

        let timing = RunTiming {
            start: start_time,
            end: Utc::now(),
            elapsed: started.elapsed(),
        };
        let summary = RunSummary::new(&run, input_totals.totals(), output_totals.totals(), timing);

        let output_size = Byte::from_u64(summary.output().file_size).get_appropriate_unit(UnitType::Decimal);
        run.log().info(format!(
            "Processed {} files into {} files ({:.2}) in {:?}",
            summary.input().file_count,
            summary.output().file_count,
            output_size,
            timing.elapsed,
        ));

        Ok(summary)
    }
}
