// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{any::Any, fmt::Debug, io, sync::Arc};

use async_trait::async_trait;

/// Opaque peer identity. Two keys address the same transport iff their
/// canonical strings are equal. `Any` lets channel-factory constructors
/// dispatch on the concrete key variant.
pub trait TransportKey: Any + Send + Sync + Debug {
    /// Canonical string form, e.g. `ip:port`. Multi-endpoint keys use the
    /// first endpoint's canonical string as the identity.
    fn key(&self) -> &str;
}

/// A bidirectional byte stream to one peer.
///
/// The transport gives the sender loop and the receiver loop the same
/// channel; implementations must allow a concurrent `recv` and `send`
/// (byte-stream duplex). Partial reads and writes are permitted, the packet
/// codec loops until a frame is complete.
#[async_trait]
pub trait Channel: Send + Sync + Debug {
    /// Read up to `buf.len()` bytes. `Ok(0)` signals end of stream.
    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write up to `buf.len()` bytes, returning how many went out.
    async fn send(&self, buf: &[u8]) -> io::Result<usize>;

    /// Whether the peer is still reachable through this channel.
    fn is_active(&self) -> bool;

    /// Printable peer descriptor for logs.
    fn peer_info(&self) -> String;

    /// Release the underlying stream. Idempotent.
    async fn shutdown(&self);
}

/// Supplies and replaces channels for one transport key.
#[async_trait]
pub trait ChannelFactory: Send + Sync {
    /// Produce a fresh channel to the peer.
    async fn next(&self) -> anyhow::Result<Arc<dyn Channel>>;

    /// Given the latest failure, decide whether failover should be attempted.
    fn is_try(&self, err: &anyhow::Error) -> bool;

    /// Idempotent release of a channel produced by this factory.
    async fn gc(&self, ch: Arc<dyn Channel>);
}
