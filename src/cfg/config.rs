// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::defaults::queue::{DEFAULT_QUEUE_CAP, MAX_QUEUE_CAP};

/// Runtime tuning for the transport stack, loaded from YAML. Every field
/// has a sensible default so a partial (or absent) file is fine.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct Config {
    /// Client transport knobs.
    #[serde(default)]
    pub client: ClientTuning,
    /// Server transport knobs.
    #[serde(default)]
    pub server: ServerTuning,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ClientTuning {
    /// Outbound queue bound; push blocks once it is full.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Per-request deadline in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ServerTuning {
    /// Response queue bound per accepted connection.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Display label used in accept-loop logs.
    #[serde(default)]
    pub name: String,
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAP
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for ClientTuning {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for ServerTuning {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            name: String::new(),
        }
    }
}

impl ClientTuning {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let cfg: Self = serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            self.client.queue_capacity > 0 && self.client.queue_capacity <= MAX_QUEUE_CAP,
            "client.queue_capacity must be within 1..={MAX_QUEUE_CAP}"
        );
        ensure!(
            self.server.queue_capacity > 0 && self.server.queue_capacity <= MAX_QUEUE_CAP,
            "server.queue_capacity must be within 1..={MAX_QUEUE_CAP}"
        );
        ensure!(
            self.client.request_timeout_ms > 0,
            "client.request_timeout_ms must be positive"
        );
        Ok(())
    }
}
