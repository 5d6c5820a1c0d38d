// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    fmt::Write,
    sync::atomic::{AtomicU64, Ordering},
};

use rand::RngExt;

static MSG_SEQ: AtomicU64 = AtomicU64::new(0);

/// Generates a process-unique correlation id: 6 random bytes rendered as
/// hex, plus a monotonically increasing sequence number. Random prefix keeps
/// ids from colliding across processes sharing one server.
pub fn generate_msg_id() -> String {
    let mut tag = [0u8; 6];
    rand::rng().fill(&mut tag);

    let seq = MSG_SEQ.fetch_add(1, Ordering::Relaxed);

    let mut id = String::with_capacity(12 + 21);
    for byte in &tag {
        write!(&mut id, "{byte:02x}").expect("Writing to String cannot fail");
    }
    write!(&mut id, "-{seq}").expect("Writing to String cannot fail");

    id
}
