// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use crate::contract::StateMachine;

/// Map from correlation id to the state machine awaiting its reply.
///
/// Thread-safe; `pop` removes. Implementations must not hold internal locks
/// across I/O or task dispatch.
pub trait PendingTable: Send + Sync {
    fn put(&self, msg_id: String, sm: Arc<dyn StateMachine>);

    /// Remove and return the entry for `msg_id`, if it is still pending.
    fn pop(&self, msg_id: &str) -> Option<Arc<dyn StateMachine>>;
}
