// /////////////////////////////////////////////////////////////////////////////
// Buildflow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Worker Pool
//!
//! A round-robin pool of worker execution contexts, sized to the engine's
//! concurrency.
//!
//! ## Semantics
//!
//! - Workers spawn lazily on the first module load.
//! - Module loads are broadcast: every worker must load the module before
//!   the load completes, so any worker can service any file.
//! - Per-file dispatch picks a worker round-robin. The pool never queues
//!   beyond worker selection — backpressure belongs to the step runner's
//!   concurrency gate.
//! - Disposal terminates every worker, rejects in-flight requests with the
//!   disposal error, and is idempotent.
//! - A worker exiting on its own is fatal; the fault handler installed by
//!   the engine receives the crash error.
//!
//! ## The file round trip
//!
//! A dispatched file is projected to a wire record, executed against the
//! chosen worker, and the response is merged back into the retained record
//! with `update_in_place` before being written onto the original
//! `VirtualFile` — the step runner keeps working with the same file value
//! it handed in.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

use buildflow_domain::{EngineError, FileSpec, LogEvent, LogHandle, LogLevel, RunContext, VirtualFile};

use super::executor::ModuleRegistry;
use super::messenger::RpcHandler;
use super::protocol::WorkerEvent;
use super::wire::WireValue;
use super::worker::{FaultHandler, Worker};

/// Round-robin pool of worker execution contexts.
pub struct WorkerPool {
    size: usize,
    registry: Arc<ModuleRegistry>,
    workers: tokio::sync::Mutex<Vec<Arc<Worker>>>,
    cursor: AtomicUsize,
    loaded: Mutex<HashSet<String>>,
    disposed: AtomicBool,
    disposing: Arc<AtomicBool>,
    on_fault: FaultHandler,
    log: LogHandle,
}

impl WorkerPool {
    /// Creates a pool of `size` workers. Nothing spawns until the first
    /// module load.
    pub fn new(size: usize, registry: Arc<ModuleRegistry>, log: LogHandle, on_fault: FaultHandler) -> Arc<Self> {
        Arc::new(WorkerPool {
            size: size.max(1),
            registry,
            workers: tokio::sync::Mutex::new(Vec::new()),
            cursor: AtomicUsize::new(0),
            loaded: Mutex::new(HashSet::new()),
            disposed: AtomicBool::new(false),
            disposing: Arc::new(AtomicBool::new(false)),
            on_fault,
            log,
        })
    }

    /// The shared module registry workers resolve ids against.
    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    /// Whether a module has completed its broadcast load.
    pub fn is_loaded(&self, module_id: &str) -> bool {
        self.loaded.lock().contains(module_id)
    }

    fn guard_disposed(&self) -> Result<(), EngineError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(EngineError::disposed("worker pool"));
        }
        Ok(())
    }

    fn worker_log_handler(&self) -> RpcHandler {
        let log = self.log.clone();
        Arc::new(move |_id, data| {
            let log = log.clone();
            Box::pin(async move {
                forward_worker_log(&log, &data);
                Ok(WireValue::Null)
            })
        })
    }

    async fn ensure_workers(&self) -> Result<Vec<Arc<Worker>>, EngineError> {
        self.guard_disposed()?;
        let mut workers = self.workers.lock().await;
        if workers.is_empty() {
            debug!(size = self.size, "spawning worker pool");
            for id in 0..self.size {
                let worker = Worker::spawn(id, self.registry.clone(), self.disposing.clone(), self.on_fault.clone())?;
                worker.messenger().set_handler(WorkerEvent::Log, self.worker_log_handler());
                workers.push(Arc::new(worker));
            }
            for worker in workers.iter() {
                worker.wait_ready().await?;
            }
        }
        Ok(workers.clone())
    }

    /// Loads a module into every worker. All loads must succeed.
    pub async fn load_module(&self, module_id: &str, data: Option<serde_json::Value>) -> Result<(), EngineError> {
        if self.is_loaded(module_id) {
            return Ok(());
        }
        let workers = self.ensure_workers().await?;

        let payload = WireValue::record([
            ("module", WireValue::Text(module_id.to_string())),
            (
                "data",
                data.as_ref().map(WireValue::from_json).unwrap_or(WireValue::Null),
            ),
        ]);
        let loads = workers
            .iter()
            .map(|worker| worker.messenger().request(WorkerEvent::LoadModule, payload.clone(), HashMap::new()));
        futures::future::try_join_all(loads).await?;

        self.loaded.lock().insert(module_id.to_string());
        debug!(module = module_id, workers = workers.len(), "worker module loaded");
        Ok(())
    }

    /// Executes a loaded module's per-file capability on the next worker in
    /// round-robin order, updating `file` in place and returning any extra
    /// files the module produced.
    pub async fn exec_process_file(
        &self,
        module_id: &str,
        file: &mut VirtualFile,
        run: &RunContext,
    ) -> Result<Vec<VirtualFile>, EngineError> {
        self.guard_disposed()?;
        if !self.is_loaded(module_id) {
            return Err(EngineError::internal(format!(
                "Module {} was never loaded into the worker pool",
                module_id
            )));
        }
        let workers = { self.workers.lock().await.clone() };
        if workers.is_empty() {
            return Err(EngineError::internal("Worker pool has no workers"));
        }
        let worker = workers[self.cursor.fetch_add(1, Ordering::SeqCst) % workers.len()].clone();

        let mut record = file_to_wire(file);
        let payload = WireValue::record([
            ("module", WireValue::Text(module_id.to_string())),
            ("file", record.clone()),
            ("run", run_to_wire(run)),
        ]);

        // Worker-side log calls during this execution route to the run's
        // log capability.
        let mut sub_handlers: HashMap<WorkerEvent, RpcHandler> = HashMap::new();
        let run_log = run.log().clone();
        sub_handlers.insert(
            WorkerEvent::Log,
            Arc::new(move |_id, data| {
                let log = run_log.clone();
                Box::pin(async move {
                    forward_worker_log(&log, &data);
                    Ok(WireValue::Null)
                })
            }),
        );

        let response = worker
            .messenger()
            .request(WorkerEvent::ExecCapability, payload, sub_handlers)
            .await?;

        if let Some(updated) = response.get("file") {
            record.update_in_place(updated);
        }
        apply_record_to_file(file, &record)?;

        let mut extra = Vec::new();
        if let Some(items) = response.get("extra").and_then(WireValue::as_list) {
            for item in items {
                extra.push(file_from_record(item, file)?);
            }
        }
        Ok(extra)
    }

    /// Terminates every worker and rejects in-flight requests. Idempotent.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.disposing.store(true, Ordering::SeqCst);

        let workers: Vec<Arc<Worker>> = {
            let mut guard = self.workers.lock().await;
            guard.drain(..).collect()
        };
        for worker in &workers {
            worker.messenger().reject_all(&EngineError::disposed("worker pool"));
            worker.request_shutdown();
        }
        for worker in workers {
            if let Some(handle) = worker.take_thread() {
                let _ = tokio::task::spawn_blocking(move || {
                    let _ = handle.join();
                })
                .await;
            }
        }
        debug!("worker pool disposed");
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.size)
            .field("loaded", &self.loaded.lock().len())
            .field("disposed", &self.disposed.load(Ordering::SeqCst))
            .finish()
    }
}

/// Projects a virtual file into its wire record.
pub fn file_to_wire(file: &VirtualFile) -> WireValue {
    WireValue::record([
        ("path", WireValue::Text(file.path().to_slash_string())),
        ("origin", WireValue::Text(file.origin().to_string())),
        ("created_at", WireValue::Date(file.created_at().timestamp_millis())),
        ("modified_at", WireValue::Date(file.modified_at().timestamp_millis())),
        (
            "metadata",
            WireValue::Record(
                file.metadata()
                    .iter()
                    .map(|(k, v)| (k.clone(), WireValue::from_json(v)))
                    .collect(),
            ),
        ),
        ("contents", WireValue::Bytes(file.contents().to_vec())),
    ])
}

/// Projects the run for worker consumption.
pub fn run_to_wire(run: &RunContext) -> WireValue {
    WireValue::record([
        ("run_id", WireValue::Text(run.id().to_string())),
        ("cwd", WireValue::Text(run.cwd().display().to_string())),
        ("full", WireValue::Bool(run.is_full())),
        ("dev", WireValue::Bool(run.dev())),
        ("debug", WireValue::Bool(run.debug())),
        ("concurrency", WireValue::Int(run.concurrency() as i64)),
    ])
}

/// Writes a merged wire record back onto the retained file.
fn apply_record_to_file(file: &mut VirtualFile, record: &WireValue) -> Result<(), EngineError> {
    if let Some(bytes) = record.get("contents").and_then(WireValue::as_bytes) {
        if bytes != file.contents() {
            file.set_contents(bytes.to_vec());
        }
    }
    if let Some(WireValue::Record(fields)) = record.get("metadata") {
        let metadata = file.metadata_mut();
        metadata.clear();
        for (key, value) in fields {
            metadata.insert(key.clone(), value.to_json());
        }
    }
    Ok(())
}

/// Builds an extra output file from a worker record, derived from the file
/// that produced it.
fn file_from_record(record: &WireValue, parent: &VirtualFile) -> Result<VirtualFile, EngineError> {
    let path = record
        .get("path")
        .and_then(WireValue::as_str)
        .ok_or_else(|| EngineError::protocol("Extra file record without a path"))?;
    let mut spec = FileSpec::new(path);
    if let Some(bytes) = record.get("contents").and_then(WireValue::as_bytes) {
        spec = spec.with_contents(bytes.to_vec());
    }
    if let Some(WireValue::Record(fields)) = record.get("metadata") {
        for (key, value) in fields {
            spec = spec.with_metadata(key.clone(), value.to_json());
        }
    }
    parent.derived(spec)
}

/// Re-emits a worker log record through a main-side log handle.
fn forward_worker_log(log: &LogHandle, data: &WireValue) {
    let level = data
        .get("level")
        .and_then(WireValue::as_str)
        .and_then(|s| s.parse::<LogLevel>().ok())
        .unwrap_or(LogLevel::Info);
    let message = data.get("message").and_then(WireValue::as_str).unwrap_or_default();
    log.emit(LogEvent::new(level, message));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::workers::executor::{WorkerFile, WorkerPlugin, WorkerRunInfo};
    use async_trait::async_trait;
    use buildflow_domain::Concurrency;
    use std::path::PathBuf;

    struct Stamp;

    #[async_trait]
    impl WorkerPlugin for Stamp {
        async fn process_file(&self, file: &mut WorkerFile, run: &WorkerRunInfo) -> Result<Vec<WorkerFile>, EngineError> {
            run.log().info(format!("stamping {}", file.path()));
            let stamped = format!("{}!", file.text_lossy());
            file.set_text(stamped);
            file.metadata_mut()
                .insert("thread".into(), WireValue::Text(format!("{:?}", std::thread::current().id())));
            Ok(Vec::new())
        }
    }

    struct FanOut;

    #[async_trait]
    impl WorkerPlugin for FanOut {
        async fn process_file(&self, file: &mut WorkerFile, _run: &WorkerRunInfo) -> Result<Vec<WorkerFile>, EngineError> {
            let mut extra = WorkerFile::new(format!("{}.copy", file.path()));
            extra.set_contents(file.contents().to_vec());
            Ok(vec![extra])
        }
    }

    fn run() -> RunContext {
        RunContext::full_run(
            PathBuf::from("."),
            Concurrency::new(2).unwrap(),
            false,
            false,
            LogHandle::disabled(),
        )
    }

    fn quiet_pool(size: usize, registry: Arc<ModuleRegistry>) -> Arc<WorkerPool> {
        WorkerPool::new(size, registry, LogHandle::disabled(), Arc::new(|_err| {}))
    }

    fn file(path: &str, text: &str) -> VirtualFile {
        VirtualFile::from_spec(FileSpec::new(path).with_text(text), "plugin://src").unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_exec_updates_file_in_place() {
        let registry = ModuleRegistry::new();
        registry.register("stamp", |_| Ok(Arc::new(Stamp) as Arc<dyn WorkerPlugin>));
        let pool = quiet_pool(1, registry);

        pool.load_module("stamp", None).await.unwrap();
        let mut f = file("a.txt", "hello");
        let extra = pool.exec_process_file("stamp", &mut f, &run()).await.unwrap();

        assert!(extra.is_empty());
        assert_eq!(f.text_lossy(), "hello!");
        assert!(f.metadata().contains_key("thread"));
        pool.dispose().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_round_robin_uses_every_worker() {
        let registry = ModuleRegistry::new();
        registry.register("stamp", |_| Ok(Arc::new(Stamp) as Arc<dyn WorkerPlugin>));
        let pool = quiet_pool(2, registry);
        pool.load_module("stamp", None).await.unwrap();

        let mut threads = std::collections::HashSet::new();
        for i in 0..4 {
            let mut f = file(&format!("f{}.txt", i), "x");
            pool.exec_process_file("stamp", &mut f, &run()).await.unwrap();
            threads.insert(f.metadata()["thread"].to_string());
        }
        assert_eq!(threads.len(), 2, "both workers must have executed files");
        pool.dispose().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_extra_files_are_derived_from_parent() {
        let registry = ModuleRegistry::new();
        registry.register("fan", |_| Ok(Arc::new(FanOut) as Arc<dyn WorkerPlugin>));
        let pool = quiet_pool(1, registry);
        pool.load_module("fan", None).await.unwrap();

        let mut f = file("page.md", "body");
        let extra = pool.exec_process_file("fan", &mut f, &run()).await.unwrap();

        assert_eq!(extra.len(), 1);
        assert_eq!(extra[0].path().to_slash_string(), "page.md.copy");
        assert_eq!(extra[0].contents(), b"body");
        assert_eq!(extra[0].origin(), f.origin());
        pool.dispose().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unknown_module_load_fails_everywhere() {
        let pool = quiet_pool(2, ModuleRegistry::new());
        let err = pool.load_module("ghost", None).await.unwrap_err();
        assert_eq!(err.category(), "validation");
        assert!(!pool.is_loaded("ghost"));
        pool.dispose().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_disposed_pool_rejects_operations() {
        let registry = ModuleRegistry::new();
        registry.register("stamp", |_| Ok(Arc::new(Stamp) as Arc<dyn WorkerPlugin>));
        let pool = quiet_pool(1, registry);
        pool.load_module("stamp", None).await.unwrap();
        pool.dispose().await;
        // Idempotent.
        pool.dispose().await;

        let mut f = file("a.txt", "x");
        let err = pool.exec_process_file("stamp", &mut f, &run()).await.unwrap_err();
        assert!(err.is_disposed());
        let err = pool.load_module("other", None).await.unwrap_err();
        assert!(err.is_disposed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_worker_logs_reach_the_run_log() {
        use buildflow_domain::{LogEvent, LogSink};
        use parking_lot::Mutex as PlMutex;

        #[derive(Default)]
        struct Capture(PlMutex<Vec<LogEvent>>);
        impl LogSink for Capture {
            fn emit(&self, event: LogEvent) {
                self.0.lock().push(event);
            }
        }

        let registry = ModuleRegistry::new();
        registry.register("stamp", |_| Ok(Arc::new(Stamp) as Arc<dyn WorkerPlugin>));
        let pool = quiet_pool(1, registry);
        pool.load_module("stamp", None).await.unwrap();

        let capture = Arc::new(Capture::default());
        let logged_run = RunContext::full_run(
            PathBuf::from("."),
            Concurrency::new(1).unwrap(),
            false,
            false,
            LogHandle::new(capture.clone(), false),
        );

        let mut f = file("noisy.txt", "x");
        pool.exec_process_file("stamp", &mut f, &logged_run).await.unwrap();

        // The log sub-request raced the response; give it a beat.
        for _ in 0..50 {
            if !capture.0.lock().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        let events = capture.0.lock();
        assert!(events.iter().any(|e| e.message.contains("stamping noisy.txt")));
        drop(events);
        pool.dispose().await;
    }
}
