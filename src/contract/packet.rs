// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use async_trait::async_trait;
use bytes::Bytes;

use crate::contract::Channel;

/// Frames a byte payload on a channel and recovers it on the peer.
///
/// The default implementation prefixes each payload with a 4-byte big-endian
/// length; see [`crate::defaults::packet::LengthPrefixCodec`].
#[async_trait]
pub trait PacketCodec: Send + Sync {
    /// Write one complete frame. Short writes of the payload are retried
    /// until it is drained or an error occurs.
    async fn encode_packet(&self, ch: &dyn Channel, payload: &[u8]) -> anyhow::Result<()>;

    /// Read one complete frame, blocking until it is available.
    async fn decode_packet(&self, ch: &dyn Channel) -> anyhow::Result<Bytes>;
}
