// /////////////////////////////////////////////////////////////////////////////
// Buildflow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Worker Execution Context
//!
//! One worker is an OS thread running a current-thread tokio runtime. The
//! thread hosts a [`WorkerExecutor`](super::executor::WorkerExecutor) and a
//! worker-side messenger; the main side holds the other messenger plus a
//! demux task that feeds it.
//!
//! Lifecycle: the thread announces itself with an `online` request; the
//! pool asks it to stop with a `terminated` request; the demux task
//! noticing the channel close *without* a disposal in progress treats it as
//! an unexpected termination — fatal, rejected in-flight requests and all.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use buildflow_domain::EngineError;

use super::executor::{ModuleRegistry, WorkerExecutor};
use super::messenger::Messenger;
use super::protocol::{WorkerEvent, WorkerMessage};
use super::wire::WireValue;

/// Callback the demux task raises worker faults through.
pub type FaultHandler = Arc<dyn Fn(EngineError) + Send + Sync>;

/// Main-side handle to one worker execution context.
pub struct Worker {
    id: usize,
    messenger: Arc<Messenger>,
    ready: watch::Receiver<bool>,
    thread: parking_lot::Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl Worker {
    /// Spawns a worker thread and its main-side demux task.
    ///
    /// `disposing` distinguishes an orderly shutdown from a crash when the
    /// worker's channel closes; `on_fault` receives protocol faults and
    /// crash errors.
    pub fn spawn(
        id: usize,
        registry: Arc<ModuleRegistry>,
        disposing: Arc<AtomicBool>,
        on_fault: FaultHandler,
    ) -> Result<Worker, EngineError> {
        let (to_worker_tx, to_worker_rx) = mpsc::unbounded_channel::<WorkerMessage>();
        let (to_main_tx, mut to_main_rx) = mpsc::unbounded_channel::<WorkerMessage>();

        let messenger = Messenger::new(to_worker_tx);
        let (ready_tx, ready_rx) = watch::channel(false);
        messenger.set_handler(
            WorkerEvent::Online,
            Arc::new(move |_id, _data| {
                let _ = ready_tx.send(true);
                Box::pin(async { Ok(WireValue::Null) })
            }),
        );

        // Demux: feed incoming frames to the messenger; surface faults; on
        // channel close decide crash vs orderly shutdown.
        let demux_messenger = messenger.clone();
        let demux_fault = on_fault.clone();
        tokio::spawn(async move {
            while let Some(frame) = to_main_rx.recv().await {
                if let Err(fault) = demux_messenger.handle_message(frame).await {
                    warn!(worker = id, error = %fault, "worker protocol fault");
                    demux_fault(fault);
                }
            }
            if disposing.load(Ordering::SeqCst) {
                demux_messenger.reject_all(&EngineError::disposed("worker pool"));
                debug!(worker = id, "worker stopped");
            } else {
                let crash = EngineError::worker_crash(format!("Worker {} exited unexpectedly", id));
                demux_messenger.reject_all(&crash);
                demux_fault(crash);
            }
        });

        let thread = std::thread::Builder::new()
            .name(format!("buildflow-worker-{}", id))
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread().enable_time().build() {
                    Ok(runtime) => runtime,
                    // Dropping to_main_tx makes the demux side report a crash.
                    Err(_) => return,
                };
                runtime.block_on(worker_main(to_main_tx, to_worker_rx, registry));
            })
            .map_err(|e| EngineError::internal(format!("Failed to spawn worker thread {}: {}", id, e)))?;

        Ok(Worker {
            id,
            messenger,
            ready: ready_rx,
            thread: parking_lot::Mutex::new(Some(thread)),
        })
    }

    /// This worker's index in the pool.
    pub fn id(&self) -> usize {
        self.id
    }

    /// The main-side messenger for this worker.
    pub fn messenger(&self) -> &Arc<Messenger> {
        &self.messenger
    }

    /// Waits for the worker's `online` handshake.
    pub async fn wait_ready(&self) -> Result<(), EngineError> {
        let mut ready = self.ready.clone();
        while !*ready.borrow() {
            ready
                .changed()
                .await
                .map_err(|_| EngineError::worker_crash(format!("Worker {} exited before coming online", self.id)))?;
        }
        Ok(())
    }

    /// Asks the worker thread to exit its loop.
    pub fn request_shutdown(&self) {
        self.messenger.notify(WorkerEvent::Terminated, WireValue::Null);
    }

    /// Takes the thread handle for joining. `None` once taken.
    pub fn take_thread(&self) -> Option<std::thread::JoinHandle<()>> {
        self.thread.lock().take()
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker").field("id", &self.id).finish()
    }
}

/// The worker thread's event loop.
async fn worker_main(
    to_main: mpsc::UnboundedSender<WorkerMessage>,
    mut inbox: mpsc::UnboundedReceiver<WorkerMessage>,
    registry: Arc<ModuleRegistry>,
) {
    let messenger = Messenger::new(to_main);
    let executor = WorkerExecutor::new(registry);
    executor.install(&messenger);

    messenger.notify(WorkerEvent::Online, WireValue::Null);

    while let Some(frame) = inbox.recv().await {
        if let WorkerMessage::Request {
            id,
            event: WorkerEvent::Terminated,
            ..
        } = &frame
        {
            messenger.respond(*id, Ok(WireValue::Null));
            break;
        }
        if let Err(fault) = messenger.handle_message(frame).await {
            // Worker-side protocol faults travel to the main side as log
            // requests; the pool surfaces them.
            messenger.notify(
                WorkerEvent::Log,
                WireValue::record([
                    ("level", WireValue::Text("warning".into())),
                    ("message", WireValue::Text(fault.to_string())),
                ]),
            );
        }
    }
    // Runtime (and any spawned handler tasks) drop here; the channel close
    // tells the main side this context is gone.
}
