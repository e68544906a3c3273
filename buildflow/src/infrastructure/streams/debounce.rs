// /////////////////////////////////////////////////////////////////////////////
// Buildflow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Debounce
//!
//! Batches a stream by quiet window: items are buffered while the source
//! keeps producing, and whenever the source stays quiet for the configured
//! duration, the buffer flushes as one batch. The watch coordinator uses
//! this to collapse a burst of filesystem events into one rebuild.
//!
//! - Source end flushes the final non-empty batch before completion.
//! - An error item cuts through: the buffered batch is discarded, the error
//!   is yielded, and the stream terminates. Errors are the cancellation
//!   signal here as everywhere else in the engine.

use async_stream::stream;
use futures::{Stream, StreamExt};
use std::mem;
use std::time::Duration;

use buildflow_domain::EngineError;

/// Batches `source` by quiet window `quiet`.
pub fn debounce<T, S>(source: S, quiet: Duration) -> impl Stream<Item = Result<Vec<T>, EngineError>> + Send
where
    T: Send + 'static,
    S: Stream<Item = Result<T, EngineError>> + Send + 'static,
{
    stream! {
        futures::pin_mut!(source);
        let mut buffer: Vec<T> = Vec::new();
        loop {
            if buffer.is_empty() {
                // Nothing pending; wait for the next item without a timer.
                match source.next().await {
                    Some(Ok(item)) => buffer.push(item),
                    Some(Err(err)) => {
                        yield Err(err);
                        return;
                    }
                    None => break,
                }
            } else {
                match tokio::time::timeout(quiet, source.next()).await {
                    Ok(Some(Ok(item))) => buffer.push(item),
                    Ok(Some(Err(err))) => {
                        yield Err(err);
                        return;
                    }
                    Ok(None) => {
                        yield Ok(mem::take(&mut buffer));
                        break;
                    }
                    Err(_elapsed) => {
                        yield Ok(mem::take(&mut buffer));
                    }
                }
            }
        }
        if !buffer.is_empty() {
            yield Ok(mem::take(&mut buffer));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::pin_mut;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    fn feed() -> (
        mpsc::UnboundedSender<Result<u32, EngineError>>,
        UnboundedReceiverStream<Result<u32, EngineError>>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, UnboundedReceiverStream::new(rx))
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiet_window_flushes_batch() {
        let (tx, rx) = feed();
        let batches = debounce(rx, Duration::from_millis(300));
        pin_mut!(batches);

        tx.send(Ok(1)).unwrap();
        tx.send(Ok(2)).unwrap();

        let batch = batches.next().await.unwrap().unwrap();
        assert_eq!(batch, vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_items_within_window_share_a_batch() {
        let (tx, rx) = feed();
        let batches = debounce(rx, Duration::from_millis(300));
        pin_mut!(batches);

        tx.send(Ok(1)).unwrap();
        let feeder = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            tx.send(Ok(2)).unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
            tx.send(Ok(3)).unwrap();
            // Hold the sender so the stream stays open past the flush.
            tokio::time::sleep(Duration::from_millis(1000)).await;
            drop(tx);
        });

        let batch = batches.next().await.unwrap().unwrap();
        assert_eq!(batch, vec![1, 2, 3]);
        feeder.await.unwrap();
        assert!(batches.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_source_end_flushes_final_batch() {
        let (tx, rx) = feed();
        let batches = debounce(rx, Duration::from_millis(300));
        pin_mut!(batches);

        tx.send(Ok(9)).unwrap();
        drop(tx);

        assert_eq!(batches.next().await.unwrap().unwrap(), vec![9]);
        assert!(batches.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_terminates() {
        let (tx, rx) = feed();
        let batches = debounce(rx, Duration::from_millis(300));
        pin_mut!(batches);

        tx.send(Ok(1)).unwrap();
        tx.send(Err(EngineError::internal("watch failed"))).unwrap();

        assert!(batches.next().await.unwrap().is_err());
        assert!(batches.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_bursts_form_separate_batches() {
        let (tx, rx) = feed();
        let batches = debounce(rx, Duration::from_millis(300));
        pin_mut!(batches);

        tx.send(Ok(1)).unwrap();
        assert_eq!(batches.next().await.unwrap().unwrap(), vec![1]);

        tx.send(Ok(2)).unwrap();
        tx.send(Ok(3)).unwrap();
        assert_eq!(batches.next().await.unwrap().unwrap(), vec![2, 3]);
    }
}
