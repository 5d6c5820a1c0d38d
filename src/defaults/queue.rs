// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{Mutex, mpsc};

use crate::{contract::SendQueue, error::TransportError};

/// Default queue capacity when none is configured.
pub const DEFAULT_QUEUE_CAP: usize = 1 << 7;
/// Upper bound a configured capacity is clamped to.
pub const MAX_QUEUE_CAP: usize = 1 << 12;

/// Bounded FIFO over a tokio mpsc pair. Producers share the sender half;
/// the transport's sender loop is the single consumer of the receiver half.
pub struct BoundedQueue {
    tx: mpsc::Sender<Bytes>,
    rx: Mutex<mpsc::Receiver<Bytes>>,
}

impl BoundedQueue {
    pub fn new(cap: usize) -> Self {
        let (tx, rx) = mpsc::channel(cap.clamp(1, MAX_QUEUE_CAP));
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }
}

impl Default for BoundedQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAP)
    }
}

#[async_trait]
impl SendQueue for BoundedQueue {
    async fn push(&self, payload: Bytes) -> anyhow::Result<()> {
        self.tx
            .send(payload)
            .await
            .map_err(|_| TransportError::QueueClosed.into())
    }

    async fn pop(&self) -> Option<Bytes> {
        self.rx.lock().await.recv().await
    }

    async fn try_pop(&self) -> Option<Bytes> {
        self.rx.lock().await.try_recv().ok()
    }

    async fn close(&self) {
        // Buffered payloads stay poppable; only further pushes fail.
        self.rx.lock().await.close();
    }
}
