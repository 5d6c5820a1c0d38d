// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use dashmap::DashMap;

use crate::contract::{PendingTable, StateMachine};

/// Map-backed pending table. Sharded locking keeps `put`/`pop` short and
/// never held across an await point.
#[derive(Default)]
pub struct MapPendingTable {
    entries: DashMap<String, Arc<dyn StateMachine>>,
}

impl MapPendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl PendingTable for MapPendingTable {
    fn put(&self, msg_id: String, sm: Arc<dyn StateMachine>) {
        self.entries.insert(msg_id, sm);
    }

    fn pop(&self, msg_id: &str) -> Option<Arc<dyn StateMachine>> {
        self.entries.remove(msg_id).map(|(_, sm)| sm)
    }
}
