// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::contract::StateMachine;

/// Implemented by the transports; handles one decoded inbound frame.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn process(&self, payload: Bytes);
}

/// Dispatches per-message handling tasks.
///
/// The transports make no assumption about the order scheduled tasks run in.
/// The default spawns one task per call; bounded pools are legal as long as
/// they do not run the task inline on the receiver loop.
pub trait Executor: Send + Sync {
    /// Schedule `runner.process(payload)` for a decoded inbound frame.
    fn process(&self, runner: Arc<dyn ProcessRunner>, payload: Bytes);

    /// Schedule `sm.timeout(msg_id)` for an expired request.
    fn timeout(&self, sm: Arc<dyn StateMachine>, msg_id: String);
}
