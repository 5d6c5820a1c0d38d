// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use thiserror::Error;

/// Error kinds the runtime needs to branch on. Everything else travels as
/// plain `anyhow` context on top of the underlying I/O or codec failure.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Per-request deadline elapsed before a reply was correlated.
    #[error("response timeout")]
    ResponseTimeout,

    /// The pool handed back a transport whose runloop has already died.
    #[error("client transport is invalid")]
    TransportDown,

    /// Send was attempted on a transport that has been closed.
    #[error("closed transport: {key}")]
    TransportClosed { key: String },

    /// The send queue was closed while a producer was pushing.
    #[error("send queue is closed")]
    QueueClosed,

    /// Fewer than the 4 header bytes went out in one write.
    #[error("write packet header incomplete, wrote {written} bytes")]
    ShortHeader { written: usize },

    /// Stream ended inside the 4-byte length header.
    #[error("decode packet header incomplete, read {got} of {wanted} bytes")]
    ShortRead { wanted: usize, got: usize },

    /// Stream ended inside the payload body.
    #[error("read packet body expected {wanted} bytes, have {got}")]
    ShortBody { wanted: usize, got: usize },

    /// Every endpoint of an HA key is marked exception.
    #[error("no available channel found")]
    NoAvailableChannel,

    /// `wait` was called on a sync state machine that never fired.
    #[error("sync state machine is not being used correctly")]
    SyncMisuse,

    /// A protocol was registered without the piece this operation needs.
    #[error("protocol is missing {what}")]
    ProtocolIncomplete { what: &'static str },
}
