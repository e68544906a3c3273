// /////////////////////////////////////////////////////////////////////////////
// Buildflow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Worker Dispatch Capability
//!
//! The bridge between the plugin contract and the worker pool: when a
//! plugin supplies its per-file capability as a worker-module reference,
//! the engine loads the module into the pool and substitutes this adapter,
//! which round-trips each file through a pooled execution context.

use async_trait::async_trait;
use std::sync::Arc;

use buildflow_domain::{EngineError, ProcessFile, RunContext, VirtualFile};

use super::pool::WorkerPool;

/// `ProcessFile` implemented by dispatching into the worker pool.
#[derive(Debug)]
pub struct WorkerDispatch {
    pool: Arc<WorkerPool>,
    module_id: String,
}

impl WorkerDispatch {
    /// Binds a loaded module id to the pool.
    pub fn new(pool: Arc<WorkerPool>, module_id: impl Into<String>) -> Self {
        WorkerDispatch {
            pool,
            module_id: module_id.into(),
        }
    }

    /// The module this capability dispatches to.
    pub fn module_id(&self) -> &str {
        &self.module_id
    }
}

#[async_trait]
impl ProcessFile for WorkerDispatch {
    async fn process(&self, mut file: VirtualFile, run: &RunContext) -> Result<Vec<VirtualFile>, EngineError> {
        let extra = self.pool.exec_process_file(&self.module_id, &mut file, run).await?;
        let mut out = Vec::with_capacity(1 + extra.len());
        out.push(file);
        out.extend(extra);
        Ok(out)
    }
}
