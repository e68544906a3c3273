// /////////////////////////////////////////////////////////////////////////////
// Buildflow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Plugin Contract
//!
//! This module defines the plugin contract: the capability ports a plugin
//! may implement, the normalized [`Plugin`] record the engine works with,
//! and the [`PluginBuilder`] that coerces loose definitions into that
//! record.
//!
//! ## Capability model
//!
//! Incoming plugin definitions are loose bags of optional behaviors. The
//! builder normalizes them once into a record whose fields are each
//! `Option<Arc<dyn Capability>>`; from then on, dispatch is a capability
//! check, not a shape check. Absence of a capability is observable so the
//! pipeline can skip phases cleanly.
//!
//! | Capability | Input | Output |
//! |---|---|---|
//! | [`ReadSource`] | run | stream of [`FileSpec`] |
//! | [`ProcessFile`] | file, run | zero/one/many [`VirtualFile`] |
//! | [`ProcessFiles`] | file stream, run | file stream |
//! | [`WatchSource`] | run, emitter | stream of [`ChangedFileSpec`] |
//! | [`CleanTarget`] / [`DisposeTarget`] | — | — |
//! | [`LifecycleHooks`] | event arg | — |
//!
//! A capability may be supplied as a trait object, as a closure (the `_fn`
//! builder methods), or — for `ProcessFile` — as a worker-module reference
//! that the engine resolves against its worker pool before normalization
//! completes.
//!
//! ## Filtering
//!
//! Every plugin carries a [`PathFilter`] (default: accept-all). The filter
//! is part of the contract, but routing decisions belong to the pipeline
//! step, not to the plugin or its controller.

use async_trait::async_trait;
use futures::Stream;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::entities::{ChangedFileSpec, FileSpec, RunContext, RunSummary, VirtualFile};
use crate::entities::ChangedFile;
use crate::events::LogEvent;
use crate::value_objects::RelativePath;
use crate::EngineError;

/// Stream of on-wire file specs, as produced by [`ReadSource`].
pub type FileSpecStream = Pin<Box<dyn Stream<Item = Result<FileSpec, EngineError>> + Send>>;

/// Stream of constructed files, as exchanged by [`ProcessFiles`].
pub type FileStream = Pin<Box<dyn Stream<Item = Result<VirtualFile, EngineError>> + Send>>;

/// Stream of loose change specs, as produced by [`WatchSource`].
pub type WatchSpecStream = Pin<Box<dyn Stream<Item = Result<ChangedFileSpec, EngineError>> + Send>>;

/// Supplies files at the start of a full run. Called once per run; the
/// returned stream must be freshly constructed each time.
#[async_trait]
pub trait ReadSource: Send + Sync {
    /// Produces this run's file stream.
    async fn read(&self, run: &RunContext) -> Result<FileSpecStream, EngineError>;
}

/// Transforms one file into zero, one, or many files.
#[async_trait]
pub trait ProcessFile: Send + Sync {
    /// Processes one filter-matching file. The plugin owns the file and may
    /// mutate and return it, replace it, fan it out, or swallow it.
    async fn process(&self, file: VirtualFile, run: &RunContext) -> Result<Vec<VirtualFile>, EngineError>;
}

/// Observes and transforms the whole file stream arriving at a step.
#[async_trait]
pub trait ProcessFiles: Send + Sync {
    /// Receives the full stream of filter-matching files and returns the
    /// step's whole-stream output. The input need not be consumed; the
    /// engine drains whatever the plugin leaves behind.
    async fn process(&self, input: FileStream, run: &RunContext) -> Result<FileStream, EngineError>;
}

/// Supplies filesystem change events in watch mode. Long-lived.
#[async_trait]
pub trait WatchSource: Send + Sync {
    /// Starts watching. The plugin may return a stream, push through the
    /// emitter, or both; the engine multiplexes the two.
    async fn watch(&self, ctx: &RunContext, emitter: WatchEmitter) -> Result<Option<WatchSpecStream>, EngineError>;
}

/// Removes previously produced output. Idempotent.
#[async_trait]
pub trait CleanTarget: Send + Sync {
    /// Cleans the plugin's destination.
    async fn clean(&self) -> Result<(), EngineError>;
}

/// Releases resources. Idempotent; the last call a plugin receives.
#[async_trait]
pub trait DisposeTarget: Send + Sync {
    /// Disposes the plugin.
    async fn dispose(&self) -> Result<(), EngineError>;
}

/// Fire-and-forget lifecycle notifications. All methods default to no-ops;
/// failures are wrapped with the hook's name and surfaced without aborting
/// the other listeners.
#[async_trait]
pub trait LifecycleHooks: Send + Sync {
    /// A run is starting.
    async fn on_start(&self, run: &RunContext) -> Result<(), EngineError> {
        let _ = run;
        Ok(())
    }

    /// A run finished.
    async fn on_finish(&self, summary: &RunSummary) -> Result<(), EngineError> {
        let _ = summary;
        Ok(())
    }

    /// A watcher reported a change.
    async fn on_change(&self, change: &ChangedFile) -> Result<(), EngineError> {
        let _ = change;
        Ok(())
    }

    /// The engine surfaced an error.
    async fn on_error(&self, error: &EngineError) -> Result<(), EngineError> {
        let _ = error;
        Ok(())
    }

    /// A log event was emitted.
    async fn on_log(&self, event: &LogEvent) -> Result<(), EngineError> {
        let _ = event;
        Ok(())
    }
}

/// Callback handle a [`WatchSource`] may push change specs through instead
/// of (or in addition to) returning a stream.
#[derive(Clone)]
pub struct WatchEmitter {
    push: Arc<dyn Fn(ChangedFileSpec) + Send + Sync>,
}

impl WatchEmitter {
    /// Wraps a push callback. Infrastructure backs this with a channel.
    pub fn new(push: impl Fn(ChangedFileSpec) + Send + Sync + 'static) -> Self {
        WatchEmitter { push: Arc::new(push) }
    }

    /// Reports one change.
    pub fn emit(&self, spec: ChangedFileSpec) {
        (self.push)(spec);
    }
}

impl fmt::Debug for WatchEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchEmitter").finish_non_exhaustive()
    }
}

/// Path predicate deciding which files are routed through a plugin.
#[derive(Clone, Default)]
pub enum PathFilter {
    /// Accept every path. The default.
    #[default]
    All,
    /// Accept paths matching any of the glob patterns.
    Glob {
        /// The original patterns, kept for diagnostics.
        patterns: Vec<String>,
        /// The compiled matcher.
        set: Arc<GlobSet>,
    },
    /// Accept paths the predicate approves.
    Predicate(Arc<dyn Fn(&RelativePath) -> bool + Send + Sync>),
}

impl PathFilter {
    /// Accept-all filter.
    pub fn all() -> Self {
        PathFilter::All
    }

    /// Compiles a single glob pattern.
    pub fn glob(pattern: &str) -> Result<Self, EngineError> {
        Self::globs([pattern])
    }

    /// Compiles a set of glob patterns; a path matching any is accepted.
    pub fn globs<'a>(patterns: impl IntoIterator<Item = &'a str>) -> Result<Self, EngineError> {
        let mut builder = GlobSetBuilder::new();
        let mut kept = Vec::new();
        for pattern in patterns {
            let glob = Glob::new(pattern)
                .map_err(|e| EngineError::validation(format!("Invalid filter pattern {:?}: {}", pattern, e)))?;
            builder.add(glob);
            kept.push(pattern.to_string());
        }
        let set = builder
            .build()
            .map_err(|e| EngineError::validation(format!("Invalid filter patterns: {}", e)))?;
        Ok(PathFilter::Glob {
            patterns: kept,
            set: Arc::new(set),
        })
    }

    /// Wraps an arbitrary predicate.
    pub fn predicate(f: impl Fn(&RelativePath) -> bool + Send + Sync + 'static) -> Self {
        PathFilter::Predicate(Arc::new(f))
    }

    /// Whether the filter accepts the path. Globs match against the
    /// slash-normalized form so patterns behave identically on every host.
    pub fn matches(&self, path: &RelativePath) -> bool {
        match self {
            PathFilter::All => true,
            PathFilter::Glob { set, .. } => set.is_match(path.to_slash_string()),
            PathFilter::Predicate(f) => f(path),
        }
    }
}

impl fmt::Debug for PathFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathFilter::All => write!(f, "PathFilter::All"),
            PathFilter::Glob { patterns, .. } => f.debug_tuple("PathFilter::Glob").field(patterns).finish(),
            PathFilter::Predicate(_) => write!(f, "PathFilter::Predicate"),
        }
    }
}

/// A reference to plugin code resident in the worker pool: the module id to
/// load plus optional instantiation data.
#[derive(Debug, Clone)]
pub struct WorkerModuleRef {
    /// Module identifier, resolved by the host's module registry.
    pub module_id: String,
    /// Optional data handed to the module factory.
    pub data: Option<serde_json::Value>,
}

/// The normalized plugin record.
///
/// Opaque except through its capabilities; built exclusively by
/// [`PluginBuilder::normalize`].
#[derive(Clone)]
pub struct Plugin {
    name: String,
    filter: PathFilter,
    read: Option<Arc<dyn ReadSource>>,
    process_file: Option<Arc<dyn ProcessFile>>,
    process_files: Option<Arc<dyn ProcessFiles>>,
    watch: Option<Arc<dyn WatchSource>>,
    clean: Option<Arc<dyn CleanTarget>>,
    dispose: Option<Arc<dyn DisposeTarget>>,
    hooks: Option<Arc<dyn LifecycleHooks>>,
}

impl Plugin {
    /// The plugin's non-empty name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The plugin's path filter.
    pub fn filter(&self) -> &PathFilter {
        &self.filter
    }

    /// The read capability, if implemented.
    pub fn read(&self) -> Option<&Arc<dyn ReadSource>> {
        self.read.as_ref()
    }

    /// The per-file processing capability, if implemented.
    pub fn process_file(&self) -> Option<&Arc<dyn ProcessFile>> {
        self.process_file.as_ref()
    }

    /// The whole-stream processing capability, if implemented.
    pub fn process_files(&self) -> Option<&Arc<dyn ProcessFiles>> {
        self.process_files.as_ref()
    }

    /// The watch capability, if implemented.
    pub fn watch(&self) -> Option<&Arc<dyn WatchSource>> {
        self.watch.as_ref()
    }

    /// The clean capability, if implemented.
    pub fn clean(&self) -> Option<&Arc<dyn CleanTarget>> {
        self.clean.as_ref()
    }

    /// The dispose capability, if implemented.
    pub fn dispose(&self) -> Option<&Arc<dyn DisposeTarget>> {
        self.dispose.as_ref()
    }

    /// The lifecycle hooks, if implemented.
    pub fn hooks(&self) -> Option<&Arc<dyn LifecycleHooks>> {
        self.hooks.as_ref()
    }

    /// Whether the plugin can supply files.
    pub fn has_read(&self) -> bool {
        self.read.is_some()
    }

    /// Whether the plugin processes individual files.
    pub fn has_process_file(&self) -> bool {
        self.process_file.is_some()
    }

    /// Whether the plugin processes the whole stream.
    pub fn has_process_files(&self) -> bool {
        self.process_files.is_some()
    }

    /// Whether the plugin is a processor step at all.
    pub fn is_processor(&self) -> bool {
        self.has_process_file() || self.has_process_files()
    }

    /// Whether the plugin can watch for changes.
    pub fn has_watch(&self) -> bool {
        self.watch.is_some()
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("name", &self.name)
            .field("filter", &self.filter)
            .field("read", &self.read.is_some())
            .field("process_file", &self.process_file.is_some())
            .field("process_files", &self.process_files.is_some())
            .field("watch", &self.watch.is_some())
            .field("clean", &self.clean.is_some())
            .field("dispose", &self.dispose.is_some())
            .field("hooks", &self.hooks.is_some())
            .finish()
    }
}

/// Loose plugin definition, and the normalizer that turns it into a
/// [`Plugin`].
#[derive(Default)]
pub struct PluginBuilder {
    name: Option<String>,
    filter: Option<PathFilter>,
    read: Option<Arc<dyn ReadSource>>,
    process_file: Option<Arc<dyn ProcessFile>>,
    process_files: Option<Arc<dyn ProcessFiles>>,
    watch: Option<Arc<dyn WatchSource>>,
    clean: Option<Arc<dyn CleanTarget>>,
    dispose: Option<Arc<dyn DisposeTarget>>,
    hooks: Option<Arc<dyn LifecycleHooks>>,
    worker_module: Option<WorkerModuleRef>,
}

impl PluginBuilder {
    /// Starts an empty definition.
    pub fn new() -> Self {
        PluginBuilder::default()
    }

    /// Starts a named definition.
    pub fn named(name: impl Into<String>) -> Self {
        PluginBuilder {
            name: Some(name.into()),
            ..PluginBuilder::default()
        }
    }

    /// Shorthand for the most common plugin shape: a bare per-file
    /// callable.
    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(VirtualFile, RunContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<VirtualFile>, EngineError>> + Send,
    {
        PluginBuilder::new().process_file_fn(f)
    }

    /// Sets the plugin name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the path filter.
    pub fn filter(mut self, filter: PathFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Supplies the read capability.
    pub fn read(mut self, source: impl ReadSource + 'static) -> Self {
        self.read = Some(Arc::new(source));
        self
    }

    /// Supplies the read capability as a closure.
    pub fn read_fn<F, Fut>(self, f: F) -> Self
    where
        F: Fn(RunContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<FileSpecStream, EngineError>> + Send,
    {
        self.read(ReadFn(f))
    }

    /// Supplies the read capability from a fixed list of specs, yielded
    /// afresh on every run.
    pub fn read_specs(self, specs: impl IntoIterator<Item = FileSpec>) -> Self {
        let specs: Vec<FileSpec> = specs.into_iter().collect();
        self.read_fn(move |_run| {
            let specs = specs.clone();
            async move { Ok(Box::pin(futures::stream::iter(specs.into_iter().map(Ok))) as FileSpecStream) }
        })
    }

    /// Supplies the per-file processing capability.
    pub fn process_file(mut self, processor: impl ProcessFile + 'static) -> Self {
        self.process_file = Some(Arc::new(processor));
        self
    }

    /// Supplies the per-file processing capability as a closure.
    pub fn process_file_fn<F, Fut>(self, f: F) -> Self
    where
        F: Fn(VirtualFile, RunContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<VirtualFile>, EngineError>> + Send,
    {
        self.process_file(ProcessFileFn(f))
    }

    /// Supplies the per-file processing capability as an already-shared
    /// trait object (used by the engine when it wraps worker dispatch).
    pub fn process_file_arc(mut self, processor: Arc<dyn ProcessFile>) -> Self {
        self.process_file = Some(processor);
        self
    }

    /// Supplies the per-file processing capability as a worker-module
    /// reference. The engine loads the module into its worker pool and
    /// replaces this reference with a dispatch capability before
    /// normalization.
    pub fn process_file_module(mut self, module_id: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        self.worker_module = Some(WorkerModuleRef {
            module_id: module_id.into(),
            data,
        });
        self
    }

    /// Supplies the whole-stream processing capability.
    pub fn process_files(mut self, processor: impl ProcessFiles + 'static) -> Self {
        self.process_files = Some(Arc::new(processor));
        self
    }

    /// Supplies the whole-stream processing capability as a closure.
    pub fn process_files_fn<F, Fut>(self, f: F) -> Self
    where
        F: Fn(FileStream, RunContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<FileStream, EngineError>> + Send,
    {
        self.process_files(ProcessFilesFn(f))
    }

    /// Supplies the watch capability.
    pub fn watch(mut self, watcher: impl WatchSource + 'static) -> Self {
        self.watch = Some(Arc::new(watcher));
        self
    }

    /// Supplies the watch capability as a closure.
    pub fn watch_fn<F, Fut>(self, f: F) -> Self
    where
        F: Fn(RunContext, WatchEmitter) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<WatchSpecStream>, EngineError>> + Send,
    {
        self.watch(WatchFn(f))
    }

    /// Supplies the clean capability.
    pub fn clean(mut self, target: impl CleanTarget + 'static) -> Self {
        self.clean = Some(Arc::new(target));
        self
    }

    /// Supplies the dispose capability.
    pub fn dispose(mut self, target: impl DisposeTarget + 'static) -> Self {
        self.dispose = Some(Arc::new(target));
        self
    }

    /// Supplies the lifecycle hooks.
    pub fn hooks(mut self, hooks: impl LifecycleHooks + 'static) -> Self {
        self.hooks = Some(Arc::new(hooks));
        self
    }

    /// Removes and returns the worker-module reference, if any. The engine
    /// resolves it against the worker pool before calling
    /// [`PluginBuilder::normalize`].
    ///
    /// # Errors
    /// Returns `EngineError::Validation` when the definition supplies the
    /// per-file capability both as a callable and as a worker module.
    pub fn take_worker_module(&mut self) -> Result<Option<WorkerModuleRef>, EngineError> {
        if self.worker_module.is_some() && self.process_file.is_some() {
            return Err(EngineError::validation(
                "Plugin supplies processFile both as a callable and as a worker module",
            ));
        }
        Ok(self.worker_module.take())
    }

    /// Whether the definition includes a worker-module reference.
    pub fn has_worker_module(&self) -> bool {
        self.worker_module.is_some()
    }

    /// Normalizes the loose definition into the canonical record.
    ///
    /// `position` is the zero-based index the plugin will occupy in the
    /// pipeline; it feeds the defaulted name.
    ///
    /// # Errors
    /// Returns `EngineError::Validation` when the name is explicitly empty,
    /// when the definition carries no capability at all, when both a
    /// per-file callable and a worker-module reference are supplied, or
    /// when an unresolved worker-module reference is still present.
    pub fn normalize(self, position: usize) -> Result<Plugin, EngineError> {
        if self.worker_module.is_some() {
            if self.process_file.is_some() {
                return Err(EngineError::validation(
                    "Plugin supplies processFile both as a callable and as a worker module",
                ));
            }
            return Err(EngineError::validation(
                "Worker-module reference was not resolved; add the plugin through the engine",
            ));
        }

        let name = match self.name {
            Some(name) => {
                if name.trim().is_empty() {
                    return Err(EngineError::validation("Plugin name cannot be empty"));
                }
                name
            }
            None => format!("plugin-{}", position + 1),
        };

        let has_capability = self.read.is_some()
            || self.process_file.is_some()
            || self.process_files.is_some()
            || self.watch.is_some()
            || self.clean.is_some()
            || self.dispose.is_some()
            || self.hooks.is_some();
        if !has_capability {
            return Err(EngineError::validation(format!(
                "Plugin {} defines no capabilities",
                name
            )));
        }

        Ok(Plugin {
            name,
            filter: self.filter.unwrap_or_default(),
            read: self.read,
            process_file: self.process_file,
            process_files: self.process_files,
            watch: self.watch,
            clean: self.clean,
            dispose: self.dispose,
            hooks: self.hooks,
        })
    }
}

impl fmt::Debug for PluginBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginBuilder")
            .field("name", &self.name)
            .field("worker_module", &self.worker_module)
            .finish_non_exhaustive()
    }
}

// Closure adapters. Each wraps a plain async closure in the corresponding
// capability port.

struct ReadFn<F>(F);

#[async_trait]
impl<F, Fut> ReadSource for ReadFn<F>
where
    F: Fn(RunContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<FileSpecStream, EngineError>> + Send,
{
    async fn read(&self, run: &RunContext) -> Result<FileSpecStream, EngineError> {
        (self.0)(run.clone()).await
    }
}

struct ProcessFileFn<F>(F);

#[async_trait]
impl<F, Fut> ProcessFile for ProcessFileFn<F>
where
    F: Fn(VirtualFile, RunContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<VirtualFile>, EngineError>> + Send,
{
    async fn process(&self, file: VirtualFile, run: &RunContext) -> Result<Vec<VirtualFile>, EngineError> {
        (self.0)(file, run.clone()).await
    }
}

struct ProcessFilesFn<F>(F);

#[async_trait]
impl<F, Fut> ProcessFiles for ProcessFilesFn<F>
where
    F: Fn(FileStream, RunContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<FileStream, EngineError>> + Send,
{
    async fn process(&self, input: FileStream, run: &RunContext) -> Result<FileStream, EngineError> {
        (self.0)(input, run.clone()).await
    }
}

struct WatchFn<F>(F);

#[async_trait]
impl<F, Fut> WatchSource for WatchFn<F>
where
    F: Fn(RunContext, WatchEmitter) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<WatchSpecStream>, EngineError>> + Send,
{
    async fn watch(&self, ctx: &RunContext, emitter: WatchEmitter) -> Result<Option<WatchSpecStream>, EngineError> {
        (self.0)(ctx.clone(), emitter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_defaults_name_by_position() {
        let plugin = PluginBuilder::from_fn(|file, _run| async move { Ok(vec![file]) })
            .normalize(2)
            .unwrap();
        assert_eq!(plugin.name(), "plugin-3");
        assert!(plugin.has_process_file());
        assert!(!plugin.has_read());
    }

    #[test]
    fn test_normalize_rejects_empty_name() {
        let err = PluginBuilder::named("  ")
            .process_file_fn(|file, _run| async move { Ok(vec![file]) })
            .normalize(0)
            .unwrap_err();
        assert_eq!(err.category(), "validation");
    }

    #[test]
    fn test_normalize_rejects_capability_free_definitions() {
        let err = PluginBuilder::named("empty").normalize(0).unwrap_err();
        assert_eq!(err.category(), "validation");
    }

    #[test]
    fn test_normalize_rejects_unresolved_worker_module() {
        let err = PluginBuilder::named("remote")
            .process_file_module("mod-id", None)
            .normalize(0)
            .unwrap_err();
        assert_eq!(err.category(), "validation");
    }

    #[test]
    fn test_filter_defaults_to_accept_all() {
        let plugin = PluginBuilder::named("p")
            .process_file_fn(|file, _run| async move { Ok(vec![file]) })
            .normalize(0)
            .unwrap();
        let path = RelativePath::new("anything/at/all.bin").unwrap();
        assert!(plugin.filter().matches(&path));
    }

    #[test]
    fn test_glob_filter_matches_by_extension() {
        let filter = PathFilter::glob("*.html").unwrap();
        assert!(filter.matches(&RelativePath::new("index.html").unwrap()));
        assert!(filter.matches(&RelativePath::new("sub/dir/page.html").unwrap()));
        assert!(!filter.matches(&RelativePath::new("file1.txt").unwrap()));
    }

    #[test]
    fn test_glob_filter_rejects_bad_pattern() {
        assert!(PathFilter::glob("a[").is_err());
    }

    #[test]
    fn test_predicate_filter() {
        let filter = PathFilter::predicate(|p| p.extension() == Some("md"));
        assert!(filter.matches(&RelativePath::new("a.md").unwrap()));
        assert!(!filter.matches(&RelativePath::new("a.rs").unwrap()));
    }

    #[test]
    fn test_read_specs_stream_is_restartable() {
        use futures::executor::block_on;
        use futures::StreamExt;

        let plugin = PluginBuilder::named("src")
            .read_specs(vec![FileSpec::new("a.txt"), FileSpec::new("b.txt")])
            .normalize(0)
            .unwrap();
        let run = RunContext::full_run(
            std::path::PathBuf::from("."),
            crate::value_objects::Concurrency::new(1).unwrap(),
            false,
            false,
            crate::services::LogHandle::disabled(),
        );

        for _ in 0..2 {
            let stream = block_on(plugin.read().unwrap().read(&run)).unwrap();
            let specs: Vec<_> = block_on(stream.collect::<Vec<_>>());
            assert_eq!(specs.len(), 2);
        }
    }
}
