// /////////////////////////////////////////////////////////////////////////////
// Buildflow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Task Gate
//!
//! A bounded tracked task set: the per-step concurrency primitive. Callers
//! acquire a slot before spawning work, so at most `limit` tracked tasks are
//! ever in flight, and every task is joined — no spawn-and-forget.
//!
//! A failure in any tracked task is remembered and surfaced at the next
//! [`TaskGate::acquire`] or at [`TaskGate::join_all`], whichever comes
//! first. The first failure wins; later ones are logged by the caller if it
//! cares.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};

use buildflow_domain::EngineError;

/// Semaphore-bounded set of tracked tasks.
pub struct TaskGate {
    semaphore: Arc<Semaphore>,
    tasks: JoinSet<Result<(), EngineError>>,
    failed: Option<EngineError>,
}

impl TaskGate {
    /// Creates a gate admitting at most `limit` concurrent tasks.
    pub fn new(limit: usize) -> Self {
        TaskGate {
            semaphore: Arc::new(Semaphore::new(limit.max(1))),
            tasks: JoinSet::new(),
            failed: None,
        }
    }

    /// Waits until fewer than `limit` tracked tasks are outstanding.
    ///
    /// # Errors
    /// Surfaces the first failure of any already-settled tracked task.
    pub async fn acquire(&mut self) -> Result<OwnedSemaphorePermit, EngineError> {
        self.reap();
        if let Some(err) = &self.failed {
            return Err(err.clone());
        }
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| EngineError::internal("Task gate semaphore closed"))
    }

    /// Registers a task holding the given slot. The slot is released when
    /// the task settles.
    pub fn spawn<F>(&mut self, permit: OwnedSemaphorePermit, task: F)
    where
        F: Future<Output = Result<(), EngineError>> + Send + 'static,
    {
        self.tasks.spawn(async move {
            let _permit = permit;
            task.await
        });
    }

    /// Waits for every tracked task to settle.
    ///
    /// # Errors
    /// Surfaces the first failure among the tracked tasks.
    pub async fn join_all(&mut self) -> Result<(), EngineError> {
        while let Some(settled) = self.tasks.join_next().await {
            self.absorb(settled);
        }
        match self.failed.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn reap(&mut self) {
        while let Some(settled) = self.tasks.try_join_next() {
            self.absorb(settled);
        }
    }

    fn absorb(&mut self, settled: Result<Result<(), EngineError>, JoinError>) {
        let outcome = match settled {
            Ok(outcome) => outcome,
            Err(join_err) => Err(EngineError::internal(format!("Tracked task panicked: {}", join_err))),
        };
        if let Err(err) = outcome {
            if self.failed.is_none() {
                self.failed = Some(err);
            }
        }
    }
}
