// /////////////////////////////////////////////////////////////////////////////
// Buildflow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Stream Primitives
//!
//! The small set of async building blocks the pipeline is assembled from:
//!
//! - [`stream_channel`] — single-producer, single-consumer queue with
//!   end/poison signalling and backpressure; the links between steps
//! - [`merge_streams`] — first-available fan-in of several streams
//! - [`debounce`] — quiet-window batching, used by the watch coordinator
//! - [`TaskGate`] — semaphore-bounded tracked task set; the per-step
//!   concurrency bound
//! - [`prefetch`] — bounded consumer-side read-ahead, used by the final
//!   drain
//!
//! Everything here is domain-agnostic; the pipeline layers meaning on top.

mod channel;
mod debounce;
mod gate;
mod merge;
mod prefetch;

pub use channel::{stream_channel, stream_channel_unbounded, StreamReader, StreamWriter};
pub use debounce::debounce;
pub use gate::TaskGate;
pub use merge::merge_streams;
pub use prefetch::prefetch;
