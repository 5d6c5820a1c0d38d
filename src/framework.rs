// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The framework façade: protocol registration plus the three public
//! operations, asynchronous `send`, blocking `sync_send` and the server
//! accept loop `listen`.

use std::{
    sync::{Arc, RwLock},
    time::Duration,
};

use anyhow::{Result, ensure};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::{
    contract::{
        ChannelFactory, Executor, Message, MessageCodec, PacketCodec, PendingTable,
        SendQueue, StateMachine, TransportKey,
    },
    defaults::{
        BoundedQueue, LengthPrefixCodec, MapPendingTable, SpawnExecutor,
        tcp::{client_channel_factory, server_channel_factory},
    },
    error::TransportError,
    transport::{
        ClientTransport, DefaultTransportPool, ServerRouter, ServerTransport, SyncWaiter,
        TransportPool,
    },
};

/// Per-request deadline applied when a protocol does not configure one.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Delay before a transport dropped from the pool is actually closed, so
/// in-flight replies can still land.
const DROP_RELEASE_GRACE: Duration = Duration::from_secs(10);

pub type TimeoutFn = Arc<dyn Fn() -> Duration + Send + Sync>;
pub type ChannelFactoryCtor =
    Arc<dyn Fn(&dyn TransportKey) -> Result<Arc<dyn ChannelFactory>> + Send + Sync>;
pub type QueueCtor = Arc<dyn Fn(&dyn TransportKey) -> Result<Arc<dyn SendQueue>> + Send + Sync>;
pub type ExecutorCtor = Arc<dyn Fn(&dyn TransportKey) -> Result<Arc<dyn Executor>> + Send + Sync>;
pub type PendingCtor =
    Arc<dyn Fn(&dyn TransportKey) -> Result<Arc<dyn PendingTable>> + Send + Sync>;

/// Everything one registered protocol binds together: codecs, per-request
/// timeout provider, plug-point constructors and, on the server side, the
/// router plus a display name.
pub struct Protocol {
    pub message: Arc<dyn MessageCodec>,
    pub packet: Arc<dyn PacketCodec>,
    pub timeout: TimeoutFn,
    pub channel_factory: ChannelFactoryCtor,
    pub queue: QueueCtor,
    pub executor: ExecutorCtor,
    pub pending: Option<PendingCtor>,
    pub router: Option<Arc<dyn ServerRouter>>,
    pub name: String,
}

impl Protocol {
    /// Client-side protocol over the default TCP stack: length-prefixed
    /// frames, bounded queue, task-per-message executor, map pending table.
    pub fn client(message: Arc<dyn MessageCodec>) -> Self {
        Self {
            message,
            packet: Arc::new(LengthPrefixCodec::new()),
            timeout: Arc::new(|| DEFAULT_REQUEST_TIMEOUT),
            channel_factory: Arc::new(client_channel_factory),
            queue: Arc::new(|_| Ok(Arc::new(BoundedQueue::default()) as Arc<dyn SendQueue>)),
            executor: Arc::new(|_| Ok(Arc::new(SpawnExecutor) as Arc<dyn Executor>)),
            pending: Some(Arc::new(|_| {
                Ok(Arc::new(MapPendingTable::new()) as Arc<dyn PendingTable>)
            })),
            router: None,
            name: String::new(),
        }
    }

    /// Server-side protocol over the default TCP acceptor.
    pub fn server(
        message: Arc<dyn MessageCodec>,
        router: Arc<dyn ServerRouter>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            message,
            packet: Arc::new(LengthPrefixCodec::new()),
            timeout: Arc::new(|| DEFAULT_REQUEST_TIMEOUT),
            channel_factory: Arc::new(server_channel_factory),
            queue: Arc::new(|_| Ok(Arc::new(BoundedQueue::default()) as Arc<dyn SendQueue>)),
            executor: Arc::new(|_| Ok(Arc::new(SpawnExecutor) as Arc<dyn Executor>)),
            pending: None,
            router: Some(router),
            name: name.into(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Arc::new(move || timeout);
        self
    }

    pub fn with_packet(mut self, packet: Arc<dyn PacketCodec>) -> Self {
        self.packet = packet;
        self
    }

    pub fn with_channel_factory(mut self, ctor: ChannelFactoryCtor) -> Self {
        self.channel_factory = ctor;
        self
    }

    pub fn with_queue(mut self, ctor: QueueCtor) -> Self {
        self.queue = ctor;
        self
    }

    /// Bounded default queue with an explicit capacity.
    pub fn with_queue_capacity(self, cap: usize) -> Self {
        self.with_queue(Arc::new(move |_| {
            Ok(Arc::new(BoundedQueue::new(cap)) as Arc<dyn SendQueue>)
        }))
    }

    pub fn with_executor(mut self, ctor: ExecutorCtor) -> Self {
        self.executor = ctor;
        self
    }

    pub fn with_pending(mut self, ctor: PendingCtor) -> Self {
        self.pending = Some(ctor);
        self
    }
}

/// Handle returned by registration, used to address the protocol in
/// `send` / `sync_send` / `listen`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolHandle(usize);

pub struct Framework {
    protocols: RwLock<Vec<Arc<Protocol>>>,
    pool: Arc<dyn TransportPool>,
}

impl Default for Framework {
    fn default() -> Self {
        Self::new(Arc::new(DefaultTransportPool::new()))
    }
}

impl Framework {
    pub fn new(pool: Arc<dyn TransportPool>) -> Self {
        Self {
            protocols: RwLock::new(Vec::with_capacity(5)),
            pool,
        }
    }

    /// Register a client protocol. Must carry a pending-table constructor.
    pub fn register_protocol(&self, protocol: Protocol) -> Result<ProtocolHandle> {
        ensure!(
            protocol.pending.is_some(),
            TransportError::ProtocolIncomplete {
                what: "pending-table constructor"
            }
        );
        self.push(protocol)
    }

    /// Register a server protocol. Must carry a router.
    pub fn register_server_protocol(&self, protocol: Protocol) -> Result<ProtocolHandle> {
        ensure!(
            protocol.router.is_some(),
            TransportError::ProtocolIncomplete {
                what: "server router"
            }
        );
        self.push(protocol)
    }

    fn push(&self, protocol: Protocol) -> Result<ProtocolHandle> {
        let mut protocols = self
            .protocols
            .write()
            .map_err(|_| anyhow::anyhow!("protocol registry poisoned"))?;
        protocols.push(Arc::new(protocol));
        Ok(ProtocolHandle(protocols.len() - 1))
    }

    fn protocol(&self, handle: ProtocolHandle) -> Result<Arc<Protocol>> {
        let protocols = self
            .protocols
            .read()
            .map_err(|_| anyhow::anyhow!("protocol registry poisoned"))?;
        protocols
            .get(handle.0)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown protocol handle {}", handle.0))
    }

    /// Asynchronous send: the reply or the deadline is delivered to `sm`.
    pub async fn send(
        &self,
        handle: ProtocolHandle,
        sm: Arc<dyn StateMachine>,
        key: &dyn TransportKey,
        msg: Box<dyn Message>,
    ) -> Result<()> {
        let transport = self.healthy_transport(handle, key).await?;
        transport.send(sm, key, msg).await
    }

    /// Blocking request/response round trip.
    pub async fn sync_send(
        &self,
        handle: ProtocolHandle,
        key: &dyn TransportKey,
        msg: Box<dyn Message>,
    ) -> Result<Box<dyn Message>> {
        let transport = self.healthy_transport(handle, key).await?;

        let waiter = SyncWaiter::fire();
        if let Err(e) = transport
            .send(Arc::clone(&waiter) as Arc<dyn StateMachine>, key, msg)
            .await
        {
            waiter.shut_down();
            return Err(e);
        }
        waiter.wait().await
    }

    /// Accept loop: one server transport per accepted channel. Returns only
    /// when the channel factory reports an unrecoverable accept failure.
    pub async fn listen(&self, handle: ProtocolHandle, key: &dyn TransportKey) -> Result<()> {
        let pt = self.protocol(handle)?;
        let factory: Arc<dyn ChannelFactory> = (pt.channel_factory)(key)?;

        loop {
            let channel = match factory.next().await {
                Ok(ch) => ch,
                Err(e) => {
                    warn!("[{}] accept failed: {e:#}", pt.name);
                    if !factory.is_try(&e) {
                        return Err(e);
                    }
                    continue;
                },
            };

            if !channel.is_active() {
                warn!("[{}] accepted channel is not active", pt.name);
                factory.gc(channel).await;
                continue;
            }

            let transport = match ServerTransport::new(Arc::clone(&channel), key, &pt) {
                Ok(t) => t,
                Err(e) => {
                    warn!("[{}] new server transport failed: {e:#}", pt.name);
                    factory.gc(channel).await;
                    continue;
                },
            };

            let factory = Arc::clone(&factory);
            let name = pt.name.clone();
            tokio::spawn(async move {
                debug!("[{name}] transport for {} started", channel.peer_info());
                if let Err(e) = transport.run_loop().await {
                    warn!(
                        "[{name}] transport(peer:{}) runloop over: {e:#}",
                        channel.peer_info()
                    );
                }
                factory.gc(channel).await;
            });
        }
    }

    /// Pool lookup plus the observed-down policy: a dead transport is
    /// dropped from the pool and released after a grace delay, so a fresh
    /// one is established on the next call.
    async fn healthy_transport(
        &self,
        handle: ProtocolHandle,
        key: &dyn TransportKey,
    ) -> Result<Arc<ClientTransport>> {
        let pt = self.protocol(handle)?;
        let transport = self.pool.get(key, &pt).await?;
        if transport.is_down() {
            self.pool.drop_key(key);
            tokio::spawn(async move {
                sleep(DROP_RELEASE_GRACE).await;
                transport.close().await;
            });
            return Err(TransportError::TransportDown.into());
        }
        Ok(transport)
    }
}
