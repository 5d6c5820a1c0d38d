// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The transport runtimes: client and server loop pairs, the per-request
//! timer, the single-flight pool and the synchronous request adapter.

pub mod client;
pub mod pool;
pub mod server;
pub mod sync;
pub(crate) mod timer;

pub use client::ClientTransport;
pub use pool::{DefaultTransportPool, TransportPool};
pub use server::{Responder, ServerRouter, ServerTransport};
pub use sync::SyncWaiter;
