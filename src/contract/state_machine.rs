// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use crate::contract::Message;

/// Caller-supplied handler for one in-flight request.
///
/// Exactly one of `process` / `timeout` is invoked per request; a registered
/// state machine whose reply never arrives and whose deadline never fires is
/// leaked, the pending table does not reap on its own.
pub trait StateMachine: Send + Sync {
    /// The correlated reply arrived.
    fn process(&self, msg_id: &str, msg: Box<dyn Message>);

    /// The per-request deadline elapsed first.
    fn timeout(&self, msg_id: &str);
}
