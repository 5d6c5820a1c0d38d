// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use bytes::Bytes;

use crate::contract::{Executor, ProcessRunner, StateMachine};

/// Fire-and-forget executor: one task per dispatched call.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpawnExecutor;

impl Executor for SpawnExecutor {
    fn process(&self, runner: Arc<dyn ProcessRunner>, payload: Bytes) {
        tokio::spawn(async move {
            runner.process(payload).await;
        });
    }

    fn timeout(&self, sm: Arc<dyn StateMachine>, msg_id: String) {
        tokio::spawn(async move {
            sm.timeout(&msg_id);
        });
    }
}
