// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Per-transport deadline wheel: a min-heap of (correlation id, deadline)
//! entries fed by an arm channel, drained on a 100 ms tick through a
//! fixed-size staging buffer.

use std::{
    cmp::{Ordering, Reverse},
    collections::BinaryHeap,
    sync::Weak,
    time::Duration,
};

use tokio::{
    sync::mpsc,
    time::{Instant, interval},
};
use tokio_util::sync::CancellationToken;

/// Tick period of the driver loop.
pub(crate) const TIMER_TICK: Duration = Duration::from_millis(100);
/// Capacity of the arm channel carrying ids of just-sent messages.
pub(crate) const TIMER_ARM_CAP: usize = 128;
/// Entries drained per pass; more due entries set the overflow flag and the
/// pass repeats.
const STAGE_SIZE: usize = 16;

/// Receives expirations from the driver. Implemented by the client
/// transport; firing must not block.
pub(crate) trait TimeoutSink: Send + Sync + 'static {
    fn fire_timeout(&self, msg_id: &str);
}

#[derive(Debug, PartialEq, Eq)]
struct TimerEntry {
    deadline: Instant,
    msg_id: String,
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then_with(|| self.msg_id.cmp(&other.msg_id))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Single-threaded driver loop. Exits when the close token fires, the arm
/// channel is dropped, or the owning transport is gone.
pub(crate) async fn drive<S: TimeoutSink>(
    sink: Weak<S>,
    mut arm_rx: mpsc::Receiver<String>,
    deadline_for: std::sync::Arc<dyn Fn() -> Duration + Send + Sync>,
    closed: CancellationToken,
) {
    let mut heap: BinaryHeap<Reverse<TimerEntry>> = BinaryHeap::new();
    let mut staging: Vec<TimerEntry> = Vec::with_capacity(STAGE_SIZE);
    let mut ticker = interval(TIMER_TICK);

    loop {
        tokio::select! {
            _ = closed.cancelled() => break,
            _ = ticker.tick() => {
                let now = Instant::now();
                loop {
                    while staging.len() < STAGE_SIZE {
                        match heap.peek() {
                            Some(Reverse(e)) if e.deadline <= now => {
                                if let Some(Reverse(e)) = heap.pop() {
                                    staging.push(e);
                                }
                            },
                            _ => break,
                        }
                    }
                    let overflow = heap
                        .peek()
                        .is_some_and(|Reverse(e)| e.deadline <= now);

                    if staging.is_empty() {
                        break;
                    }
                    let Some(sink) = sink.upgrade() else { return };
                    for entry in staging.drain(..) {
                        sink.fire_timeout(&entry.msg_id);
                    }
                    if !overflow {
                        break;
                    }
                }
            },
            armed = arm_rx.recv() => {
                let Some(msg_id) = armed else { break };
                heap.push(Reverse(TimerEntry {
                    deadline: Instant::now() + deadline_for(),
                    msg_id,
                }));
            },
        }
    }
}
