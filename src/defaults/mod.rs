// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Default implementations of the plug points: length-prefixed framing, a
//! bounded in-memory queue, a task-per-message executor, a map-backed
//! pending table and TCP channel factories (single endpoint, HA, acceptor).

pub mod executor;
pub mod packet;
pub mod pending;
pub mod queue;
pub mod tcp;

pub use executor::SpawnExecutor;
pub use packet::LengthPrefixCodec;
pub use pending::MapPendingTable;
pub use queue::BoundedQueue;
pub use tcp::{
    HaTcpChannelFactory, HaTcpTransportKey, TcpChannel, TcpClientChannelFactory,
    TcpEndpoint, TcpServerChannelFactory, client_channel_factory, server_channel_factory,
};
