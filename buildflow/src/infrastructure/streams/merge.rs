// /////////////////////////////////////////////////////////////////////////////
// Buildflow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Stream Merge
//!
//! First-available fan-in over a set of streams: every live source is raced
//! and the first to resolve yields. Within one source, order is preserved;
//! across sources it is unspecified. Completed sources are dropped and the
//! merged stream ends when all sources are done.
//!
//! `futures::stream::select_all` is exactly this machine; the wrapper exists
//! so call sites read in pipeline vocabulary.

use futures::stream::{BoxStream, SelectAll};

/// Merges streams in first-available order.
pub fn merge_streams<T>(streams: Vec<BoxStream<'static, T>>) -> SelectAll<BoxStream<'static, T>> {
    futures::stream::select_all(streams)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_within_source_order_is_preserved() {
        let a = futures::stream::iter(vec![1, 2, 3]).boxed();
        let b = futures::stream::iter(vec![10, 20]).boxed();

        let merged: Vec<i32> = merge_streams(vec![a, b]).collect().await;

        assert_eq!(merged.len(), 5);
        let a_order: Vec<_> = merged.iter().filter(|v| **v < 10).collect();
        let b_order: Vec<_> = merged.iter().filter(|v| **v >= 10).collect();
        assert_eq!(a_order, vec![&1, &2, &3]);
        assert_eq!(b_order, vec![&10, &20]);
    }

    #[tokio::test]
    async fn test_empty_input_completes_immediately() {
        let merged: Vec<i32> = merge_streams::<i32>(Vec::new()).collect().await;
        assert!(merged.is_empty());
    }

    #[tokio::test]
    async fn test_slow_source_does_not_block_fast_source() {
        use std::time::Duration;

        let fast = futures::stream::iter(vec!["fast1", "fast2"]).boxed();
        let slow = futures::stream::once(async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            "slow"
        })
        .boxed();

        let merged: Vec<&str> = merge_streams(vec![slow, fast]).collect().await;
        // The fast items arrive before the delayed one despite source order.
        assert_eq!(&merged[..2], &["fast1", "fast2"]);
        assert_eq!(merged[2], "slow");
    }
}
