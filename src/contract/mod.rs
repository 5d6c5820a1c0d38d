// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The narrow interfaces the transport core consumes. Default
//! implementations live under [`crate::defaults`]; applications may swap any
//! of them per registered protocol.

/// Byte-stream channels, channel factories and peer keys.
pub mod channel;
/// Per-message task dispatch.
pub mod executor;
/// Application message contract and message codec.
pub mod message;
/// Frame-level packet codec.
pub mod packet;
/// Correlation-id to state-machine table.
pub mod pending;
/// Bounded outbound payload queue.
pub mod queue;
/// Caller-supplied request state machines.
pub mod state_machine;

pub use channel::{Channel, ChannelFactory, TransportKey};
pub use executor::{Executor, ProcessRunner};
pub use message::{Message, MessageCodec};
pub use packet::PacketCodec;
pub use pending::PendingTable;
pub use queue::SendQueue;
pub use state_machine::StateMachine;
