// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Mutex;

use anyhow::Result;
use tokio::{sync::Notify, time::Instant};
use tracing::warn;

use crate::{
    contract::{Message, StateMachine},
    error::TransportError,
};

enum SyncState {
    Init,
    Succ(Box<dyn Message>),
    TimedOut,
}

/// Bridges the asynchronous correlation pool to a call/return interface: a
/// state machine that parks the caller on a one-shot signal until the reply
/// is correlated or the deadline fires.
///
/// Each request gets a fresh waiter; the signal is single-shot on purpose, a
/// stale reply to a timed-out request can never bleed into a later one.
pub struct SyncWaiter {
    start: Instant,
    state: Mutex<SyncState>,
    done: Notify,
}

impl SyncWaiter {
    /// Arm a waiter for one request, recording its start time.
    pub fn fire() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self {
            start: Instant::now(),
            state: Mutex::new(SyncState::Init),
            done: Notify::new(),
        })
    }

    /// Block until the request is resolved and map the terminal state.
    pub async fn wait(&self) -> Result<Box<dyn Message>> {
        self.done.notified().await;
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("sync waiter state poisoned"))?;
        match std::mem::replace(&mut *state, SyncState::Init) {
            SyncState::Succ(v) => Ok(v),
            SyncState::TimedOut => Err(TransportError::ResponseTimeout.into()),
            SyncState::Init => Err(TransportError::SyncMisuse.into()),
        }
    }

    /// Release the waiter on error paths where the request never queued.
    pub fn shut_down(&self) {
        self.done.notify_one();
    }
}

impl StateMachine for SyncWaiter {
    fn process(&self, _msg_id: &str, msg: Box<dyn Message>) {
        if let Ok(mut state) = self.state.lock() {
            *state = SyncState::Succ(msg);
        }
        self.done.notify_one();
    }

    fn timeout(&self, msg_id: &str) {
        warn!(
            "msg_id:{msg_id} timed out after {:?}",
            self.start.elapsed()
        );
        if let Ok(mut state) = self.state.lock() {
            *state = SyncState::TimedOut;
        }
        self.done.notify_one();
    }
}
