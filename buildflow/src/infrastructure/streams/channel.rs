// /////////////////////////////////////////////////////////////////////////////
// Buildflow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Stream Channel
//!
//! A single-producer, single-consumer async queue with end/poison
//! signalling. This is the link between pipeline steps and the carrier of
//! the engine's cancellation discipline.
//!
//! ## Guarantees
//!
//! - The bounded form holds at most one value in flight: `send` suspends
//!   until the slot is free, so an upstream producer can never read ahead of
//!   an unready consumer.
//! - `end()` after `send()`s drains every queued value before the consumer
//!   sees completion.
//! - `poison(err)` pre-empts: queued values are dropped, the error surfaces
//!   at the next consumer pull exactly once, and every pending or future
//!   `send` fails with a clone of the same error.
//! - No values are produced after `end()` or `poison()`.
//! - Dropping the reader turns subsequent sends into silent discards. This
//!   is the cancellation back-edge: when a failed step drops its input, the
//!   upstream step finishes writing into the void and completes instead of
//!   blocking forever.
//!
//! The writer side is cheaply cloneable so a step can write from many
//! concurrent per-file tasks; the ordering across those tasks is whatever
//! their completion order is.
//!
//! ## The read hook
//!
//! The consumer side accepts an `on_read` callback invoked on every pull.
//! The pipeline driver hangs its input/output metrics observers off this
//! hook-free path instead, but the hook is part of the channel contract and
//! the step runner's tests pin its cadence.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;

use buildflow_domain::EngineError;

struct ChannelState<T> {
    queue: VecDeque<T>,
    capacity: Option<usize>,
    closed: bool,
    poisoned: Option<EngineError>,
    error_delivered: bool,
    reader_gone: bool,
    on_read: Option<Box<dyn FnMut() + Send>>,
}

struct Shared<T> {
    state: Mutex<ChannelState<T>>,
    readable: Notify,
    writable: Notify,
}

/// Producer half of a stream channel. Cloneable.
pub struct StreamWriter<T> {
    shared: Arc<Shared<T>>,
}

/// Consumer half of a stream channel.
pub struct StreamReader<T> {
    shared: Arc<Shared<T>>,
}

fn with_capacity<T>(capacity: Option<usize>) -> (StreamWriter<T>, StreamReader<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(ChannelState {
            queue: VecDeque::new(),
            capacity,
            closed: false,
            poisoned: None,
            error_delivered: false,
            reader_gone: false,
            on_read: None,
        }),
        readable: Notify::new(),
        writable: Notify::new(),
    });
    (
        StreamWriter { shared: shared.clone() },
        StreamReader { shared },
    )
}

/// Creates a bounded channel holding at most one value in flight.
pub fn stream_channel<T>() -> (StreamWriter<T>, StreamReader<T>) {
    with_capacity(Some(1))
}

/// Creates an unbounded channel: sends never suspend. Used for a step's
/// secondary `processFiles` channel, where the step must be able to finish
/// feeding input even if the plugin never reads it.
pub fn stream_channel_unbounded<T>() -> (StreamWriter<T>, StreamReader<T>) {
    with_capacity(None)
}

impl<T> Clone for StreamWriter<T> {
    fn clone(&self) -> Self {
        StreamWriter {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Send> StreamWriter<T> {
    /// Sends one value, suspending while the channel is at capacity.
    ///
    /// # Errors
    /// Fails with the poison error once the channel is poisoned, or with an
    /// internal error when sending after `end()`.
    pub async fn send(&self, value: T) -> Result<(), EngineError> {
        let mut value = Some(value);
        loop {
            // Register interest before checking state so a wakeup landing
            // between the check and the await is never lost.
            let notified = self.shared.writable.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.shared.state.lock();
                if let Some(err) = &state.poisoned {
                    return Err(err.clone());
                }
                if state.closed {
                    return Err(EngineError::internal("Send on an ended stream channel"));
                }
                if state.reader_gone {
                    // Downstream abandoned the stream; discard quietly.
                    return Ok(());
                }
                let has_room = state.capacity.map_or(true, |cap| state.queue.len() < cap);
                if has_room {
                    state.queue.push_back(value.take().expect("value sent once"));
                    drop(state);
                    self.shared.readable.notify_one();
                    return Ok(());
                }
            }
            notified.await;
        }
    }

    /// Closes the channel. Queued values still drain; further sends fail.
    /// Idempotent; a no-op after poisoning.
    pub fn end(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.closed || state.poisoned.is_some() {
                return;
            }
            state.closed = true;
        }
        self.shared.readable.notify_waiters();
        self.shared.writable.notify_waiters();
    }

    /// Poisons the channel with an error. Queued values are dropped; the
    /// error surfaces at the next consumer pull; pending and future sends
    /// fail. First poison wins.
    pub fn poison(&self, error: EngineError) {
        {
            let mut state = self.shared.state.lock();
            if state.poisoned.is_some() {
                return;
            }
            state.queue.clear();
            state.poisoned = Some(error);
            state.closed = true;
        }
        self.shared.readable.notify_waiters();
        self.shared.writable.notify_waiters();
    }
}

impl<T: Send> StreamReader<T> {
    /// Pulls the next value.
    ///
    /// Yields `Some(Err(_))` exactly once when the channel was poisoned,
    /// then `None`. Yields `None` once the channel has ended and drained.
    pub async fn next(&mut self) -> Option<Result<T, EngineError>> {
        {
            let mut state = self.shared.state.lock();
            if let Some(hook) = state.on_read.as_mut() {
                hook();
            }
        }
        loop {
            let notified = self.shared.readable.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.shared.state.lock();
                if let Some(err) = state.poisoned.clone() {
                    if state.error_delivered {
                        return None;
                    }
                    state.error_delivered = true;
                    return Some(Err(err));
                }
                if let Some(value) = state.queue.pop_front() {
                    drop(state);
                    self.shared.writable.notify_one();
                    return Some(Ok(value));
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Installs a callback invoked on every consumer pull.
    pub fn set_on_read(&mut self, hook: impl FnMut() + Send + 'static) {
        self.shared.state.lock().on_read = Some(Box::new(hook));
    }

    /// Adapts the reader into a [`futures::Stream`].
    pub fn into_stream(self) -> impl futures::Stream<Item = Result<T, EngineError>> + Send
    where
        T: 'static,
    {
        futures::stream::unfold(self, |mut reader| async move {
            reader.next().await.map(|item| (item, reader))
        })
    }
}

impl<T> Drop for StreamReader<T> {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.reader_gone = true;
            state.queue.clear();
        }
        self.shared.writable.notify_waiters();
    }
}
