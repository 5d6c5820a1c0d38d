// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use async_trait::async_trait;
use bytes::Bytes;

/// Bounded FIFO of outbound payload buffers.
///
/// One producer side (application sends, server responses) and exactly one
/// consumer (the transport's sender loop). The bound is the transport's
/// backpressure: `push` suspends while the queue is full.
#[async_trait]
pub trait SendQueue: Send + Sync {
    /// Blocking insert. Fails only once the queue is closed.
    async fn push(&self, payload: Bytes) -> anyhow::Result<()>;

    /// Blocking dequeue. `None` means the queue was closed and drained.
    async fn pop(&self) -> Option<Bytes>;

    /// Non-blocking drain used during graceful shutdown. Must not discard
    /// items; returns `None` once nothing is immediately available.
    async fn try_pop(&self) -> Option<Bytes>;

    /// Close the queue. Blocked producers fail, the consumer drains what is
    /// left and then observes `None`.
    async fn close(&self);
}
