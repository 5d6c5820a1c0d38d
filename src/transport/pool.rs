// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Single-flight transport cache: one live client transport per canonical
//! peer key, concurrent establishment collapsed to one dial.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::OnceCell;

use crate::{contract::TransportKey, framework::Protocol, transport::ClientTransport};

#[async_trait]
pub trait TransportPool: Send + Sync {
    /// Return the cached transport for `key`, establishing it if needed.
    /// Concurrent calls for one key share a single establishment.
    async fn get(
        &self,
        key: &dyn TransportKey,
        pt: &Arc<Protocol>,
    ) -> Result<Arc<ClientTransport>>;

    /// Remove the mapping. Existing holders keep using their instance until
    /// they release it.
    fn drop_key(&self, key: &dyn TransportKey);
}

type Guard = Arc<OnceCell<Arc<ClientTransport>>>;

#[derive(Default)]
pub struct DefaultTransportPool {
    transports: DashMap<String, Arc<ClientTransport>>,
    inflight: DashMap<String, Guard>,
}

impl DefaultTransportPool {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransportPool for DefaultTransportPool {
    async fn get(
        &self,
        key: &dyn TransportKey,
        pt: &Arc<Protocol>,
    ) -> Result<Arc<ClientTransport>> {
        let k = key.key();
        if let Some(t) = self.transports.get(k) {
            return Ok(Arc::clone(&t));
        }

        let guard: Guard = Arc::clone(
            &self
                .inflight
                .entry(k.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new())),
        );

        let built = guard
            .get_or_try_init(|| async {
                // Re-check under the guard: another caller may have published
                // between our fast-path miss and winning the init slot.
                if let Some(t) = self.transports.get(k) {
                    return Ok(Arc::clone(&t));
                }
                ClientTransport::connect(key, pt).await
            })
            .await;

        match built {
            Ok(t) => {
                let t = Arc::clone(t);
                self.transports.insert(k.to_string(), Arc::clone(&t));
                self.inflight.remove(k);
                Ok(t)
            },
            Err(e) => {
                // Waiters parked on this guard retry their own establishment.
                self.inflight.remove(k);
                Err(e)
            },
        }
    }

    fn drop_key(&self, key: &dyn TransportKey) {
        self.transports.remove(key.key());
    }
}
