// /////////////////////////////////////////////////////////////////////////////
// Buildflow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Prefetch
//!
//! Consumer-side read-ahead: a filler task pulls from the inner stream into
//! a bounded channel while the consumer is still busy with earlier items.
//! The pipeline's final drain wraps its stream with this so trailing
//! processor steps keep their concurrency busy even though nothing
//! downstream consumes their output.

use futures::{Stream, StreamExt};
use tokio_stream::wrappers::ReceiverStream;

/// Wraps `stream`, prefetching up to `depth` items ahead of the consumer.
/// Dropping the returned stream stops the filler task.
pub fn prefetch<T, S>(stream: S, depth: usize) -> ReceiverStream<T>
where
    T: Send + 'static,
    S: Stream<Item = T> + Send + 'static,
{
    let (tx, rx) = tokio::sync::mpsc::channel(depth.max(1));
    tokio::spawn(async move {
        futures::pin_mut!(stream);
        while let Some(item) = stream.next().await {
            if tx.send(item).await.is_err() {
                // Consumer went away; stop pulling.
                break;
            }
        }
    });
    ReceiverStream::new(rx)
}
