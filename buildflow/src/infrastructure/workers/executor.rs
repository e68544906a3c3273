// /////////////////////////////////////////////////////////////////////////////
// Buildflow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Worker Executor
//!
//! The worker-side half of the pool: hosts plugin modules inside one
//! execution context and services `load-module` and `exec-capability`
//! requests against them.
//!
//! ## Module resolution
//!
//! Workers do not resolve code themselves. The host registers factories in
//! a [`ModuleRegistry`] (`module id → factory`), the registry is shared with
//! every worker, and a `load-module` request instantiates the module inside
//! the receiving worker. Loads are broadcast by the pool, so every context
//! ends up owning its own instance of every module.
//!
//! ## The worker plugin contract
//!
//! A worker-resident plugin sees a [`WorkerFile`] — the wire-side rendering
//! of a virtual file — mutates it in place, and may return extra files. It
//! logs through the [`WorkerRunInfo`]'s logger, which travels back to the
//! main side as `log` sub-requests against the in-flight execution.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Weak};

use buildflow_domain::EngineError;

use super::messenger::Messenger;
use super::protocol::WorkerEvent;
use super::wire::WireValue;

/// Factory instantiating a worker plugin from optional wire data.
pub type ModuleFactory = Arc<dyn Fn(Option<&WireValue>) -> Result<Arc<dyn WorkerPlugin>, EngineError> + Send + Sync>;

/// Host-populated table of worker plugin modules.
///
/// This is the engine's stand-in for module resolution: the host decides
/// what a module id means by registering a factory for it.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: RwLock<HashMap<String, ModuleFactory>>,
}

impl ModuleRegistry {
    /// Creates an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(ModuleRegistry::default())
    }

    /// Registers a module factory under an id. Re-registering replaces.
    pub fn register<F>(&self, module_id: impl Into<String>, factory: F)
    where
        F: Fn(Option<&WireValue>) -> Result<Arc<dyn WorkerPlugin>, EngineError> + Send + Sync + 'static,
    {
        self.modules.write().insert(module_id.into(), Arc::new(factory));
    }

    /// Whether an id is registered.
    pub fn contains(&self, module_id: &str) -> bool {
        self.modules.read().contains_key(module_id)
    }

    /// Instantiates a module.
    ///
    /// # Errors
    /// `EngineError::Validation` for an unknown id; factory failures pass
    /// through.
    pub fn create(&self, module_id: &str, data: Option<&WireValue>) -> Result<Arc<dyn WorkerPlugin>, EngineError> {
        let factory = self
            .modules
            .read()
            .get(module_id)
            .cloned()
            .ok_or_else(|| EngineError::validation(format!("Unknown worker module: {}", module_id)))?;
        factory(data)
    }
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.modules.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

/// The wire-side rendering of a virtual file, as seen by worker plugins.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerFile {
    path: String,
    origin: String,
    contents: Vec<u8>,
    metadata: BTreeMap<String, WireValue>,
}

impl WorkerFile {
    /// Creates an empty file at a path. Used for extra output files.
    pub fn new(path: impl Into<String>) -> Self {
        WorkerFile {
            path: path.into(),
            origin: String::new(),
            contents: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Rebuilds a file from its wire record.
    pub fn from_record(record: &WireValue) -> Result<Self, EngineError> {
        let path = record
            .get("path")
            .and_then(WireValue::as_str)
            .ok_or_else(|| EngineError::protocol("File record without a path"))?
            .to_string();
        let origin = record
            .get("origin")
            .and_then(WireValue::as_str)
            .unwrap_or_default()
            .to_string();
        let contents = record
            .get("contents")
            .and_then(WireValue::as_bytes)
            .map(<[u8]>::to_vec)
            .unwrap_or_default();
        let metadata = match record.get("metadata") {
            Some(WireValue::Record(fields)) => fields.clone(),
            _ => BTreeMap::new(),
        };
        Ok(WorkerFile {
            path,
            origin,
            contents,
            metadata,
        })
    }

    /// Projects the file back into its wire record.
    pub fn to_record(&self) -> WireValue {
        WireValue::record([
            ("path", WireValue::Text(self.path.clone())),
            ("origin", WireValue::Text(self.origin.clone())),
            ("contents", WireValue::Bytes(self.contents.clone())),
            ("metadata", WireValue::Record(self.metadata.clone())),
        ])
    }

    /// The file's relative path, slash-separated.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The producing plugin's origin tag.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// The file contents.
    pub fn contents(&self) -> &[u8] {
        &self.contents
    }

    /// Mutable contents.
    pub fn contents_mut(&mut self) -> &mut Vec<u8> {
        &mut self.contents
    }

    /// Replaces the contents.
    pub fn set_contents(&mut self, contents: impl Into<Vec<u8>>) {
        self.contents = contents.into();
    }

    /// Replaces the contents with UTF-8 text.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.contents = text.into().into_bytes();
    }

    /// The contents decoded as UTF-8, lossily.
    pub fn text_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.contents)
    }

    /// Read-only metadata view.
    pub fn metadata(&self) -> &BTreeMap<String, WireValue> {
        &self.metadata
    }

    /// Mutable metadata view.
    pub fn metadata_mut(&mut self) -> &mut BTreeMap<String, WireValue> {
        &mut self.metadata
    }
}

/// Logger available to worker plugins during one execution. Events travel
/// back as `log` sub-requests against the in-flight request.
#[derive(Clone)]
pub struct WorkerLogger {
    request_id: u64,
    messenger: Weak<Messenger>,
}

impl WorkerLogger {
    /// Binds a logger to an in-flight request.
    pub fn new(request_id: u64, messenger: Weak<Messenger>) -> Self {
        WorkerLogger { request_id, messenger }
    }

    fn send(&self, level: &str, message: &str) {
        if let Some(messenger) = self.messenger.upgrade() {
            messenger.sub_notify(
                self.request_id,
                WorkerEvent::Log,
                WireValue::record([
                    ("level", WireValue::Text(level.to_string())),
                    ("message", WireValue::Text(message.to_string())),
                ]),
            );
        }
    }

    /// Logs at info level.
    pub fn info(&self, message: impl AsRef<str>) {
        self.send("info", message.as_ref());
    }

    /// Logs at debug level.
    pub fn debug(&self, message: impl AsRef<str>) {
        self.send("debug", message.as_ref());
    }

    /// Logs at warning level.
    pub fn warning(&self, message: impl AsRef<str>) {
        self.send("warning", message.as_ref());
    }
}

impl fmt::Debug for WorkerLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerLogger").field("request_id", &self.request_id).finish()
    }
}

/// The run, as visible inside a worker.
#[derive(Debug, Clone)]
pub struct WorkerRunInfo {
    run_id: String,
    cwd: String,
    full: bool,
    dev: bool,
    debug: bool,
    concurrency: usize,
    logger: WorkerLogger,
}

impl WorkerRunInfo {
    /// Rebuilds run info from its wire record.
    pub fn from_record(record: &WireValue, logger: WorkerLogger) -> Result<Self, EngineError> {
        let text = |key: &str| {
            record
                .get(key)
                .and_then(WireValue::as_str)
                .map(str::to_string)
                .unwrap_or_default()
        };
        let flag = |key: &str| record.get(key).and_then(WireValue::as_bool).unwrap_or(false);
        Ok(WorkerRunInfo {
            run_id: text("run_id"),
            cwd: text("cwd"),
            full: flag("full"),
            dev: flag("dev"),
            debug: flag("debug"),
            concurrency: record.get("concurrency").and_then(WireValue::as_i64).unwrap_or(1) as usize,
            logger,
        })
    }

    /// Id of the run being executed.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Working directory of the run.
    pub fn cwd(&self) -> &str {
        &self.cwd
    }

    /// Whether the run is full.
    pub fn is_full(&self) -> bool {
        self.full
    }

    /// Whether the run is in dev mode.
    pub fn dev(&self) -> bool {
        self.dev
    }

    /// Whether the run is in debug mode.
    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Concurrency bound of the run.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// The execution's logger.
    pub fn log(&self) -> &WorkerLogger {
        &self.logger
    }
}

/// The contract a worker-resident plugin module implements.
#[async_trait]
pub trait WorkerPlugin: Send + Sync {
    /// Processes one file in place; extra output files may be returned.
    async fn process_file(&self, file: &mut WorkerFile, run: &WorkerRunInfo) -> Result<Vec<WorkerFile>, EngineError>;
}

/// Hosts loaded plugin modules inside one worker and services the
/// protocol's execution events.
pub struct WorkerExecutor {
    registry: Arc<ModuleRegistry>,
    loaded: Mutex<HashMap<String, Arc<dyn WorkerPlugin>>>,
}

impl WorkerExecutor {
    /// Creates an executor over the shared module registry.
    pub fn new(registry: Arc<ModuleRegistry>) -> Arc<Self> {
        Arc::new(WorkerExecutor {
            registry,
            loaded: Mutex::new(HashMap::new()),
        })
    }

    /// Registers this executor's handlers on the worker-side messenger.
    pub fn install(self: &Arc<Self>, messenger: &Arc<Messenger>) {
        let loader = self.clone();
        messenger.set_handler(
            WorkerEvent::LoadModule,
            Arc::new(move |_id, data| {
                let loader = loader.clone();
                Box::pin(async move { loader.load(&data) })
            }),
        );

        let executor = self.clone();
        let weak = Arc::downgrade(messenger);
        messenger.set_handler(
            WorkerEvent::ExecCapability,
            Arc::new(move |id, data| {
                let executor = executor.clone();
                let weak = weak.clone();
                Box::pin(async move { executor.exec(id, &data, weak).await })
            }),
        );
    }

    /// Services one `load-module` request.
    pub fn load(&self, data: &WireValue) -> Result<WireValue, EngineError> {
        let module_id = data
            .get("module")
            .and_then(WireValue::as_str)
            .ok_or_else(|| EngineError::protocol("load-module request without a module id"))?;
        let plugin = self.registry.create(module_id, data.get("data"))?;
        self.loaded.lock().insert(module_id.to_string(), plugin);
        Ok(WireValue::Null)
    }

    /// Services one `exec-capability` request.
    pub async fn exec(
        &self,
        request_id: u64,
        data: &WireValue,
        messenger: Weak<Messenger>,
    ) -> Result<WireValue, EngineError> {
        let module_id = data
            .get("module")
            .and_then(WireValue::as_str)
            .ok_or_else(|| EngineError::protocol("exec-capability request without a module id"))?;
        let plugin = self
            .loaded
            .lock()
            .get(module_id)
            .cloned()
            .ok_or_else(|| EngineError::protocol(format!("Module {} is not loaded in this worker", module_id)))?;

        let file_record = data
            .get("file")
            .ok_or_else(|| EngineError::protocol("exec-capability request without a file"))?;
        let run_record = data
            .get("run")
            .ok_or_else(|| EngineError::protocol("exec-capability request without a run"))?;

        let mut file = WorkerFile::from_record(file_record)?;
        let run = WorkerRunInfo::from_record(run_record, WorkerLogger::new(request_id, messenger))?;

        let extra = plugin.process_file(&mut file, &run).await?;

        Ok(WireValue::record([
            ("file", file.to_record()),
            ("extra", WireValue::List(extra.iter().map(WorkerFile::to_record).collect())),
        ]))
    }
}

impl fmt::Debug for WorkerExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerExecutor")
            .field("loaded", &self.loaded.lock().keys().collect::<Vec<_>>())
            .finish()
    }
}
