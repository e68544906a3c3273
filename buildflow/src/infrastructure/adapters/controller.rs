// /////////////////////////////////////////////////////////////////////////////
// Buildflow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Plugin Controller
//!
//! Per-plugin adapter presenting a uniform capability surface to the
//! pipeline. Every invocation is wrapped so that any failure — from the
//! plugin's own code or from validating what it produced — re-raises as a
//! plugin fault identifying the plugin and the operation.
//!
//! ## Responsibilities
//!
//! - **Error wrapping**: every capability call and every item its streams
//!   yield is wrapped with `"An error occurred in <plugin> while <op>."`
//! - **Origin tagging**: files a source yields are tagged
//!   `plugin://<name>` as their origin
//! - **Input draining**: `process_files` shares the input stream with the
//!   plugin and drains whatever the plugin leaves unread once its output
//!   completes, so a plugin that ignores its input can never deadlock the
//!   step feeding it
//! - **Watch multiplexing**: a watch plugin may return a stream, push
//!   through the provided emitter, or both; the controller merges the two
//!   and validates each loose spec into a [`WatchEvent`]
//! - **Idempotent disposal**: the second and later `dispose` calls are
//!   no-ops
//! - **Hook dispatch**: lifecycle hooks are invoked fire-and-forget, with
//!   failures tagged by hook name
//!
//! Routing — deciding whether a file goes through the plugin at all — is
//! the step runner's job; the controller only answers
//! [`PluginController::matches`].

use async_stream::stream;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_stream::wrappers::UnboundedReceiverStream;

use buildflow_domain::{
    EngineError, EngineEvent, FileStream, Plugin, RelativePath, RunContext, VirtualFile, WatchEmitter, WatchEvent,
};

use crate::infrastructure::streams::merge_streams;

/// Uniform capability surface over one normalized plugin.
pub struct PluginController {
    plugin: Plugin,
    disposed: AtomicBool,
}

impl PluginController {
    /// Wraps a normalized plugin.
    pub fn new(plugin: Plugin) -> Self {
        PluginController {
            plugin,
            disposed: AtomicBool::new(false),
        }
    }

    /// The plugin's name.
    pub fn name(&self) -> &str {
        self.plugin.name()
    }

    /// The origin tag applied to files this plugin produces.
    pub fn origin(&self) -> String {
        format!("plugin://{}", self.plugin.name())
    }

    /// Whether the plugin supplies files.
    pub fn has_read(&self) -> bool {
        self.plugin.has_read()
    }

    /// Whether the plugin processes individual files.
    pub fn has_process_file(&self) -> bool {
        self.plugin.has_process_file()
    }

    /// Whether the plugin processes the whole stream.
    pub fn has_process_files(&self) -> bool {
        self.plugin.has_process_files()
    }

    /// Whether the plugin is a processor step at all.
    pub fn is_processor(&self) -> bool {
        self.plugin.is_processor()
    }

    /// Whether the plugin watches for changes.
    pub fn has_watch(&self) -> bool {
        self.plugin.has_watch()
    }

    /// Applies the plugin's path filter.
    pub fn matches(&self, path: &RelativePath) -> bool {
        self.plugin.filter().matches(path)
    }

    fn fault(&self, operation: impl Into<String>, cause: EngineError) -> EngineError {
        EngineError::plugin_fault(self.plugin.name(), operation, cause)
    }

    /// Starts this run's source stream, tagging every yielded file with the
    /// plugin's origin. Restartable: each call asks the plugin for a fresh
    /// stream.
    pub async fn read(&self, run: &RunContext) -> Result<FileStream, EngineError> {
        const OP: &str = "reading source files";
        let source = self
            .plugin
            .read()
            .ok_or_else(|| EngineError::internal(format!("Plugin {} has no read capability", self.name())))?;
        let specs = source.read(run).await.map_err(|e| self.fault(OP, e))?;

        let name = self.plugin.name().to_string();
        let origin = self.origin();
        Ok(Box::pin(specs.map(move |item| {
            item.and_then(|spec| VirtualFile::from_spec(spec, origin.clone()))
                .map_err(|e| EngineError::plugin_fault(&name, OP, e))
        })))
    }

    /// Runs the per-file capability on one file.
    pub async fn process_file(&self, file: VirtualFile, run: &RunContext) -> Result<Vec<VirtualFile>, EngineError> {
        let processor = self
            .plugin
            .process_file()
            .ok_or_else(|| EngineError::internal(format!("Plugin {} has no processFile capability", self.name())))?;
        let operation = format!("processing {}", file.path());
        processor
            .process(file, run)
            .await
            .map_err(|e| self.fault(operation, e))
    }

    /// Hands the full input stream to the whole-stream capability and
    /// returns its output. The input is shared: once the plugin's output
    /// completes, the controller drains anything the plugin left unread.
    pub async fn process_files(&self, input: FileStream, run: &RunContext) -> Result<FileStream, EngineError> {
        const OP: &str = "processing the file stream";
        let processor = self
            .plugin
            .process_files()
            .ok_or_else(|| EngineError::internal(format!("Plugin {} has no processFiles capability", self.name())))?;

        let shared: Arc<Mutex<FileStream>> = Arc::new(Mutex::new(input));
        let plugin_view: FileStream = Box::pin(futures::stream::unfold(shared.clone(), |shared| async move {
            let item = {
                let mut guard = shared.lock().await;
                guard.next().await
            };
            item.map(|item| (item, shared))
        }));

        let output = processor.process(plugin_view, run).await.map_err(|e| self.fault(OP, e))?;

        let name = self.plugin.name().to_string();
        let drained = stream! {
            futures::pin_mut!(output);
            while let Some(item) = output.next().await {
                yield item.map_err(|e| EngineError::plugin_fault(&name, OP, e));
            }
            // The plugin is done; consume whatever input it ignored so the
            // step's writes all complete.
            loop {
                let leftover = {
                    let mut guard = shared.lock().await;
                    guard.next().await
                };
                if leftover.is_none() {
                    break;
                }
            }
        };
        Ok(Box::pin(drained))
    }

    /// Starts the plugin's watch stream, multiplexing a returned stream and
    /// emitter pushes into one validated event stream.
    pub async fn watch(&self, ctx: &RunContext) -> Result<BoxStream<'static, Result<WatchEvent, EngineError>>, EngineError> {
        const OP: &str = "watching for changes";
        let watcher = self
            .plugin
            .watch()
            .ok_or_else(|| EngineError::internal(format!("Plugin {} has no watch capability", self.name())))?;

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let emitter = WatchEmitter::new(move |spec| {
            // Receiver dropping just means the watch session ended.
            let _ = tx.send(spec);
        });

        let returned = watcher.watch(ctx, emitter).await.map_err(|e| self.fault(OP, e))?;

        let mut sources: Vec<BoxStream<'static, Result<buildflow_domain::ChangedFileSpec, EngineError>>> = Vec::new();
        sources.push(UnboundedReceiverStream::new(rx).map(Ok).boxed());
        if let Some(stream) = returned {
            sources.push(stream);
        }

        let name = self.plugin.name().to_string();
        let origin = self.origin();
        Ok(merge_streams(sources)
            .map(move |item| {
                item.and_then(|spec| WatchEvent::from_spec(spec, origin.clone()))
                    .map_err(|e| EngineError::plugin_fault(&name, OP, e))
            })
            .boxed())
    }

    /// Cleans the plugin's destination, if it has one.
    pub async fn clean(&self) -> Result<(), EngineError> {
        match self.plugin.clean() {
            Some(target) => target.clean().await.map_err(|e| self.fault("cleaning", e)),
            None => Ok(()),
        }
    }

    /// Disposes the plugin. The first call wins; later calls are no-ops.
    pub async fn dispose(&self) -> Result<(), EngineError> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        match self.plugin.dispose() {
            Some(target) => target.dispose().await.map_err(|e| self.fault("disposing", e)),
            None => Ok(()),
        }
    }

    /// Dispatches one engine event to the plugin's lifecycle hooks, if any.
    /// Failures are wrapped with the hook's name; the caller decides what to
    /// do with them (they never abort other listeners).
    pub async fn dispatch_event(&self, event: &EngineEvent) -> Result<(), EngineError> {
        let Some(hooks) = self.plugin.hooks() else {
            return Ok(());
        };
        match event {
            EngineEvent::Start(run) => hooks
                .on_start(run)
                .await
                .map_err(|e| self.fault("handling the start event", e)),
            EngineEvent::Finish(summary) => hooks
                .on_finish(summary)
                .await
                .map_err(|e| self.fault("handling the finish event", e)),
            EngineEvent::Change(change) => hooks
                .on_change(change)
                .await
                .map_err(|e| self.fault("handling the change event", e)),
            EngineEvent::Error(error) => hooks
                .on_error(error)
                .await
                .map_err(|e| self.fault("handling the error event", e)),
            EngineEvent::Log(log) => hooks
                .on_log(log)
                .await
                .map_err(|e| self.fault("handling the log event", e)),
        }
    }
}

impl std::fmt::Debug for PluginController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginController")
            .field("plugin", &self.plugin)
            .field("disposed", &self.disposed.load(Ordering::SeqCst))
            .finish()
    }
}
