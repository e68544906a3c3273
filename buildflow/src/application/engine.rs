// /////////////////////////////////////////////////////////////////////////////
// Buildflow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Engine Facade
//!
//! [`BuildEngine`] is the thin owner of everything: configuration, the
//! plugin pipeline, the worker pool, and the event bus. It exposes the
//! whole public surface — `use_plugin`, `build`, `watch`, `clean`,
//! `dispose` — and emits the five engine events (`start`, `finish`,
//! `change`, `log`, `error`).
//!
//! ## Events and hooks
//!
//! Events are broadcast to host subscribers and, through a lazily started
//! pump task, fanned out to every plugin's matching lifecycle hook. Hook
//! failures are surfaced as `error` events without aborting the other
//! listeners; failures of `on_error` hooks only reach the log, which is
//! what keeps the error path from feeding itself.
//!
//! ## Disposal
//!
//! `dispose` is idempotent: it stops any watch loop, terminates the worker
//! pool (rejecting in-flight RPCs), and disposes every plugin. Every
//! operation after disposal fails with the dedicated disposal error kind.
//! A worker crashing on its own is fatal — the crash is emitted as an
//! `error` event and the engine disposes itself.
//!
//! ## The global registry
//!
//! A process-wide registry of live engines backs [`BuildEngine::dispose_all`].
//! It is opt-in via [`BuildEngine::new_registered`]; the pipeline itself
//! never consults it.

use futures::StreamExt;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, warn};

use buildflow_domain::{
    Concurrency, EngineError, EngineEvent, LogHandle, PluginBuilder, RunContext, RunSummary,
};

use crate::application::pipeline::Pipeline;
use crate::application::watch::dedupe_batch;
use crate::infrastructure::adapters::PluginController;
use crate::infrastructure::logging::BusLogSink;
use crate::infrastructure::streams::{debounce, merge_streams};
use crate::infrastructure::workers::{
    FaultHandler, ModuleRegistry, WireValue, WorkerDispatch, WorkerPlugin, WorkerPool,
};

/// How many events the bus buffers for a slow subscriber before it lags.
const EVENT_BUS_CAPACITY: usize = 256;

static LIVE_ENGINES: Lazy<Mutex<Vec<Weak<EngineInner>>>> = Lazy::new(|| Mutex::new(Vec::new()));

/// Engine configuration. Every field has a host-derived default.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Working directory runs resolve against.
    pub cwd: PathBuf,
    /// Concurrency bound per step, and the worker pool size.
    pub concurrency: Concurrency,
    /// Quiet window for watch-mode batching.
    pub watch_delay: Duration,
    /// Dev-mode flag, visible to plugins.
    pub dev: bool,
    /// Debug-mode flag; gates debug-level log events.
    pub debug: bool,
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|value| matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            concurrency: Concurrency::default_for_host(),
            watch_delay: Duration::from_millis(300),
            dev: env_flag("BUILDFLOW_DEV"),
            debug: env_flag("BUILDFLOW_DEBUG"),
        }
    }
}

impl EngineConfig {
    /// Sets the working directory.
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = cwd.into();
        self
    }

    /// Sets the concurrency bound.
    pub fn with_concurrency(mut self, concurrency: Concurrency) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Sets the watch debounce delay.
    pub fn with_watch_delay(mut self, delay: Duration) -> Self {
        self.watch_delay = delay;
        self
    }

    /// Sets the dev-mode flag.
    pub fn with_dev(mut self, dev: bool) -> Self {
        self.dev = dev;
        self
    }

    /// Sets the debug-mode flag.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

struct EngineInner {
    config: EngineConfig,
    controllers: RwLock<Vec<Arc<PluginController>>>,
    registry: Arc<ModuleRegistry>,
    pool: Arc<WorkerPool>,
    bus: broadcast::Sender<EngineEvent>,
    disposed: AtomicBool,
    pump_started: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

impl EngineInner {
    fn guard(&self) -> Result<(), EngineError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(EngineError::disposed("engine"));
        }
        Ok(())
    }

    fn log_handle(&self) -> LogHandle {
        LogHandle::new(Arc::new(BusLogSink::new(self.bus.clone())), self.config.debug)
    }

    fn snapshot(&self) -> Vec<Arc<PluginController>> {
        self.controllers.read().clone()
    }

    fn emit(&self, event: EngineEvent) {
        match &event {
            EngineEvent::Start(run) => debug!(run = %run.id(), full = run.is_full(), "run start"),
            EngineEvent::Finish(summary) => debug!(run = %summary.run_id(), "run finish"),
            EngineEvent::Change(change) => debug!(path = %change.path(), kind = %change.kind(), "change"),
            EngineEvent::Error(err) => error!(error = %err, "engine error"),
            // Log events were already mirrored to tracing by the log sink.
            EngineEvent::Log(_) => {}
        }
        let _ = self.bus.send(event);
    }

    /// Starts the event pump that fans bus events out to plugin lifecycle
    /// hooks. Idempotent; requires a runtime, so it is called from the
    /// async entry points rather than the constructor.
    fn ensure_pump(self: &Arc<Self>) {
        if self.pump_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut events = self.bus.subscribe();
        let mut shutdown = self.shutdown_tx.subscribe();
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    received = events.recv() => match received {
                        Ok(event) => {
                            let Some(inner) = weak.upgrade() else { break };
                            for controller in inner.snapshot() {
                                if let Err(err) = controller.dispatch_event(&event).await {
                                    error!(error = %err, "plugin event hook failed");
                                    // An on_error hook failing must not feed
                                    // the error path again.
                                    if !matches!(event, EngineEvent::Error(_)) {
                                        inner.emit(EngineEvent::Error(err));
                                    }
                                }
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "event pump lagged behind the bus");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });
    }

    fn on_worker_fault(self: &Arc<Self>, err: EngineError) {
        let fatal = err.is_fatal();
        self.emit(EngineEvent::Error(err));
        if fatal && !self.disposed.load(Ordering::SeqCst) {
            let inner = self.clone();
            tokio::spawn(async move {
                inner.dispose_impl().await;
            });
        }
    }

    async fn dispose_impl(self: Arc<Self>) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(true);
        self.pool.dispose().await;
        for controller in self.snapshot() {
            if let Err(err) = controller.dispose().await {
                error!(error = %err, "plugin dispose failed");
                let _ = self.bus.send(EngineEvent::Error(err));
            }
        }
        LIVE_ENGINES
            .lock()
            .retain(|weak| weak.upgrade().map_or(false, |other| !Arc::ptr_eq(&other, &self)));
        debug!("engine disposed");
    }
}

/// The buildflow engine.
pub struct BuildEngine {
    inner: Arc<EngineInner>,
}

impl BuildEngine {
    /// Creates an engine with the given configuration.
    pub fn new(config: EngineConfig) -> Self {
        let (bus, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        let registry = ModuleRegistry::new();
        let (shutdown_tx, _) = watch::channel(false);

        let inner = Arc::new_cyclic(|weak: &Weak<EngineInner>| {
            let fault_target = weak.clone();
            let on_fault: FaultHandler = Arc::new(move |err| {
                if let Some(inner) = fault_target.upgrade() {
                    inner.on_worker_fault(err);
                }
            });
            let pool_log = LogHandle::new(Arc::new(BusLogSink::new(bus.clone())), config.debug);
            EngineInner {
                pool: WorkerPool::new(config.concurrency.get(), registry.clone(), pool_log, on_fault),
                registry,
                controllers: RwLock::new(Vec::new()),
                bus,
                disposed: AtomicBool::new(false),
                pump_started: AtomicBool::new(false),
                shutdown_tx,
                config,
            }
        });
        BuildEngine { inner }
    }

    /// Creates an engine and enrolls it in the process-wide registry so
    /// [`BuildEngine::dispose_all`] can reclaim it.
    pub fn new_registered(config: EngineConfig) -> Self {
        let engine = BuildEngine::new(config);
        LIVE_ENGINES.lock().push(Arc::downgrade(&engine.inner));
        engine
    }

    /// The engine's configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Whether the engine has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Subscribes to the engine's event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.bus.subscribe()
    }

    /// Registers a worker plugin module factory under an id, making the id
    /// resolvable from `PluginBuilder::process_file_module`.
    pub fn register_module<F>(&self, module_id: impl Into<String>, factory: F) -> Result<(), EngineError>
    where
        F: Fn(Option<&WireValue>) -> Result<Arc<dyn WorkerPlugin>, EngineError> + Send + Sync + 'static,
    {
        self.inner.guard()?;
        self.inner.registry.register(module_id, factory);
        Ok(())
    }

    /// Normalizes a plugin definition and appends it to the pipeline.
    /// Worker-module references are loaded into the pool (broadcast to all
    /// workers) and replaced with a dispatch capability first.
    pub async fn use_plugin(&self, mut builder: PluginBuilder) -> Result<(), EngineError> {
        self.inner.guard()?;
        self.inner.ensure_pump();

        if let Some(module_ref) = builder.take_worker_module()? {
            self.inner
                .pool
                .load_module(&module_ref.module_id, module_ref.data.clone())
                .await?;
            builder = builder.process_file_arc(Arc::new(WorkerDispatch::new(
                self.inner.pool.clone(),
                module_ref.module_id,
            )));
        }

        let position = self.inner.controllers.read().len();
        let plugin = builder.normalize(position)?;
        debug!(plugin = plugin.name(), position, "plugin added");
        self.inner.controllers.write().push(Arc::new(PluginController::new(plugin)));
        Ok(())
    }

    /// Runs one full build and returns its summary.
    pub async fn build(&self) -> Result<RunSummary, EngineError> {
        self.inner.guard()?;
        self.inner.ensure_pump();

        let run = RunContext::full_run(
            self.inner.config.cwd.clone(),
            self.inner.config.concurrency,
            self.inner.config.dev,
            self.inner.config.debug,
            self.inner.log_handle(),
        );
        self.inner.emit(EngineEvent::Start(run.clone()));

        let pipeline = Pipeline::from_controllers(self.inner.snapshot());
        match pipeline.run(&run).await {
            Ok(summary) => {
                self.inner.emit(EngineEvent::Finish(summary.clone()));
                Ok(summary)
            }
            Err(err) => {
                self.inner.emit(EngineEvent::Error(err.clone()));
                Err(err)
            }
        }
    }

    /// Cleans every plugin's destination.
    pub async fn clean(&self) -> Result<(), EngineError> {
        self.inner.guard()?;
        self.inner.ensure_pump();
        let controllers = self.inner.snapshot();
        futures::future::try_join_all(controllers.iter().map(|controller| controller.clean())).await?;
        Ok(())
    }

    /// Runs watch mode until disposal, the end of every watch stream, or an
    /// error.
    ///
    /// Every change event is broadcast eagerly as it arrives; bursts are
    /// debounced into batches, deduped to one change per path, and each
    /// batch dispatches one partial run. An error emits the `error` event
    /// and ends the loop.
    pub async fn watch(&self) -> Result<(), EngineError> {
        self.inner.guard()?;
        self.inner.ensure_pump();

        let session = RunContext::partial_run(
            self.inner.config.cwd.clone(),
            self.inner.config.concurrency,
            Vec::new(),
            self.inner.config.dev,
            self.inner.config.debug,
            self.inner.log_handle(),
        );

        let watchers: Vec<Arc<PluginController>> = self
            .inner
            .snapshot()
            .into_iter()
            .filter(|controller| controller.has_watch())
            .collect();
        if watchers.is_empty() {
            return Err(EngineError::validation("No plugin provides a watch capability"));
        }

        let mut streams = Vec::new();
        for controller in watchers {
            let stream = controller.watch(&session).await?;
            let inner = self.inner.clone();
            streams.push(
                stream
                    .inspect(move |item| {
                        if let Ok(event) = item {
                            inner.emit(EngineEvent::Change(event.change().clone()));
                        }
                    })
                    .boxed(),
            );
        }

        let merged = merge_streams(streams);
        let batches = debounce(merged, self.inner.config.watch_delay);
        futures::pin_mut!(batches);
        let mut shutdown = self.inner.shutdown_tx.subscribe();

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(());
                    }
                }
                batch = batches.next() => match batch {
                    None => return Ok(()),
                    Some(Err(err)) => {
                        self.inner.emit(EngineEvent::Error(err.clone()));
                        return Err(err);
                    }
                    Some(Ok(events)) => {
                        let changed = dedupe_batch(events);
                        let run = RunContext::partial_run(
                            self.inner.config.cwd.clone(),
                            self.inner.config.concurrency,
                            changed,
                            self.inner.config.dev,
                            self.inner.config.debug,
                            self.inner.log_handle(),
                        );
                        self.inner.emit(EngineEvent::Start(run.clone()));
                        let pipeline = Pipeline::from_controllers(self.inner.snapshot());
                        match pipeline.run(&run).await {
                            Ok(summary) => self.inner.emit(EngineEvent::Finish(summary)),
                            Err(err) => {
                                self.inner.emit(EngineEvent::Error(err.clone()));
                                return Err(err);
                            }
                        }
                    }
                }
            }
        }
    }

    /// Disposes the engine: stops watch mode, terminates the worker pool,
    /// disposes every plugin. Idempotent.
    pub async fn dispose(&self) {
        self.inner.clone().dispose_impl().await;
    }

    /// Disposes every engine created through [`BuildEngine::new_registered`].
    pub async fn dispose_all() {
        let inners: Vec<Arc<EngineInner>> = {
            let mut registry = LIVE_ENGINES.lock();
            registry.drain(..).filter_map(|weak| weak.upgrade()).collect()
        };
        for inner in inners {
            inner.dispose_impl().await;
        }
    }
}

impl std::fmt::Debug for BuildEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildEngine")
            .field("plugins", &self.inner.controllers.read().len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildflow_domain::FileSpec;

    fn config() -> EngineConfig {
        EngineConfig::default()
            .with_cwd(".")
            .with_concurrency(Concurrency::new(2).unwrap())
            .with_dev(false)
            .with_debug(false)
    }

    #[tokio::test]
    async fn test_disposed_engine_rejects_every_operation() {
        let engine = BuildEngine::new(config());
        engine.dispose().await;
        engine.dispose().await; // idempotent

        let use_err = engine
            .use_plugin(PluginBuilder::from_fn(|file, _run| async move { Ok(vec![file]) }))
            .await
            .unwrap_err();
        assert!(use_err.is_disposed());
        assert!(engine.build().await.unwrap_err().is_disposed());
        assert!(engine.clean().await.unwrap_err().is_disposed());
        assert!(engine.watch().await.unwrap_err().is_disposed());
        assert!(engine.register_module("m", |_| Err(EngineError::internal("x"))).unwrap_err().is_disposed());
    }

    #[tokio::test]
    async fn test_build_emits_start_and_finish() {
        let engine = BuildEngine::new(config());
        engine
            .use_plugin(PluginBuilder::named("src").read_specs(vec![FileSpec::new("a.txt").with_text("hi")]))
            .await
            .unwrap();

        let mut events = engine.subscribe();
        let summary = engine.build().await.unwrap();
        assert_eq!(summary.input().file_count, 1);

        let first = events.recv().await.unwrap();
        assert_eq!(first.kind(), "start");
        // Skip any log events between start and finish.
        loop {
            let event = events.recv().await.unwrap();
            match event {
                EngineEvent::Finish(finished) => {
                    assert_eq!(finished.run_id(), summary.run_id());
                    break;
                }
                EngineEvent::Log(_) => continue,
                other => panic!("unexpected event {:?}", other.kind()),
            }
        }
        engine.dispose().await;
    }

    #[tokio::test]
    async fn test_watch_without_watchers_is_a_validation_fault() {
        let engine = BuildEngine::new(config());
        engine
            .use_plugin(PluginBuilder::from_fn(|file, _run| async move { Ok(vec![file]) }))
            .await
            .unwrap();
        let err = engine.watch().await.unwrap_err();
        assert_eq!(err.category(), "validation");
        engine.dispose().await;
    }

    #[tokio::test]
    async fn test_dispose_all_reclaims_registered_engines() {
        let engine = BuildEngine::new_registered(config());
        BuildEngine::dispose_all().await;
        assert!(engine.is_disposed());
    }

    #[test]
    fn test_config_defaults() {
        let config = EngineConfig::default();
        assert!(config.concurrency.get() >= 1);
        assert_eq!(config.watch_delay, Duration::from_millis(300));
    }
}
