// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{any::Any, fmt::Debug};

use bytes::Bytes;

/// An application message travelling through the framework.
///
/// The core never inspects the concrete type; it only carries the boxed
/// object between codec, pending table and state machine. Server routers may
/// additionally dispatch on [`Message::cmd`] when the message exposes one.
pub trait Message: Any + Send + Debug {
    /// Numeric command the server router dispatches on, when the message
    /// carries one. `None` for messages without a command concept.
    fn cmd(&self) -> Option<i32> {
        None
    }
}

impl dyn Message {
    /// Recover the concrete message type. The box is lost on a type
    /// mismatch, which callers treat as a protocol violation anyway.
    pub fn downcast<T: Message>(self: Box<Self>) -> Option<Box<T>> {
        let raw: Box<dyn Any> = self;
        raw.downcast::<T>().ok()
    }
}

/// Maps an application message to and from (payload bytes, correlation id).
///
/// Correlation ids are opaque strings; the framework treats them as unique
/// keys pairing a request with its reply.
pub trait MessageCodec: Send + Sync {
    /// Serialize `msg`, returning the payload and the correlation id.
    fn encode(&self, msg: Box<dyn Message>) -> anyhow::Result<(Bytes, String)>;

    /// Parse a payload back into a message and its correlation id.
    fn decode(&self, payload: &[u8]) -> anyhow::Result<(Box<dyn Message>, String)>;
}
