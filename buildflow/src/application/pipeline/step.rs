// /////////////////////////////////////////////////////////////////////////////
// Buildflow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Step Runner
//!
//! Executes one processor step: for each input file, either forward it
//! untouched (filter miss) or deliver it to the step's capabilities, under
//! the run's concurrency bound.
//!
//! ## Dataflow
//!
//! ```text
//!                        ┌── filter miss ───────────────► output
//!   input ──► per file ──┤
//!                        ├── processFile task ──────────► output
//!                        └── secondary channel ─► processFiles ─► pump ─► output
//! ```
//!
//! A step may implement `processFile`, `processFiles`, or both; when both
//! are present a matching file is delivered to *both* paths. The secondary
//! channel is unbounded so feeding it can never deadlock against a plugin
//! that reads its input slowly or not at all; the controller drains
//! leftovers after the plugin's output ends.
//!
//! Every per-file delivery runs as a tracked task behind a concurrency
//! slot. When the input is exhausted the runner waits for all tracked
//! tasks, ends the secondary channel, drives the `processFiles` output to
//! completion through the pump, and only then ends the output channel. Any
//! error poisons the output channel, which is the run-wide abort signal.

use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

use buildflow_domain::{EngineError, RunContext, VirtualFile};

use crate::infrastructure::adapters::PluginController;
use crate::infrastructure::streams::{stream_channel_unbounded, StreamWriter, TaskGate};

/// Runs one processor step to completion.
///
/// Consumes `input`, writes results to `output`, and settles the channel —
/// `end()` on success, `poison(err)` on failure — before returning.
pub async fn run_step(
    controller: Arc<PluginController>,
    input: BoxStream<'static, Result<VirtualFile, EngineError>>,
    output: StreamWriter<VirtualFile>,
    run: Arc<RunContext>,
) -> Result<(), EngineError> {
    debug!(step = controller.name(), "step starting");

    // Whole-stream capability: secondary channel plus a pump that delivers
    // the plugin's output into the step output on demand.
    let mut secondary: Option<StreamWriter<VirtualFile>> = None;
    let mut pump: Option<JoinHandle<Result<(), EngineError>>> = None;
    if controller.has_process_files() {
        let (writer, reader) = stream_channel_unbounded();
        match controller.process_files(Box::pin(reader.into_stream()), &run).await {
            Ok(collective) => {
                let pump_out = output.clone();
                pump = Some(tokio::spawn(async move {
                    futures::pin_mut!(collective);
                    while let Some(item) = collective.next().await {
                        pump_out.send(item?).await?;
                    }
                    Ok(())
                }));
                secondary = Some(writer);
            }
            Err(err) => {
                output.poison(err.clone());
                return Err(err);
            }
        }
    }

    let mut failure = consume_input(&controller, input, &output, secondary.as_ref(), &run).await.err();

    // Settle the secondary channel so the plugin's input ends (or aborts),
    // then wait for the pump to finish delivering.
    match (&failure, &secondary) {
        (None, Some(writer)) => writer.end(),
        (Some(err), Some(writer)) => writer.poison(err.clone()),
        _ => {}
    }
    if let Some(pump) = pump {
        match pump.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                failure.get_or_insert(err);
            }
            Err(join_err) => {
                failure.get_or_insert(EngineError::internal(format!("Step pump panicked: {}", join_err)));
            }
        }
    }

    match failure {
        None => {
            output.end();
            debug!(step = controller.name(), "step completed");
            Ok(())
        }
        Some(err) => {
            output.poison(err.clone());
            debug!(step = controller.name(), error = %err, "step failed");
            Err(err)
        }
    }
}

/// Routes every input file under the concurrency bound, then joins all
/// tracked tasks.
async fn consume_input(
    controller: &Arc<PluginController>,
    mut input: BoxStream<'static, Result<VirtualFile, EngineError>>,
    output: &StreamWriter<VirtualFile>,
    secondary: Option<&StreamWriter<VirtualFile>>,
    run: &Arc<RunContext>,
) -> Result<(), EngineError> {
    let mut gate = TaskGate::new(run.concurrency());

    while let Some(item) = input.next().await {
        let file = item?;
        let permit = gate.acquire().await?;

        if !controller.matches(file.path()) {
            // Filter miss: forward untouched, never into either capability.
            let out = output.clone();
            gate.spawn(permit, async move { out.send(file).await });
            continue;
        }

        if controller.has_process_file() {
            // Both paths get the file when both capabilities exist.
            if let Some(writer) = secondary {
                writer.send(file.clone()).await?;
            }
            let ctl = controller.clone();
            let out = output.clone();
            let run = run.clone();
            gate.spawn(permit, async move {
                for produced in ctl.process_file(file, &run).await? {
                    out.send(produced).await?;
                }
                Ok(())
            });
        } else if let Some(writer) = secondary {
            drop(permit); // the unbounded write completes immediately
            writer.send(file).await?;
        } else {
            // A step with neither capability forwards everything.
            let out = output.clone();
            gate.spawn(permit, async move { out.send(file).await });
        }
    }

    gate.join_all().await
}
