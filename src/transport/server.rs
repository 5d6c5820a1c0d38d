// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Server transport: one instance per accepted channel, a receiver loop
//! routing decoded requests and a sender loop draining queued responses.
//! No failover and no request timer on this side.

use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use bytes::Bytes;
use once_cell::sync::OnceCell;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    contract::{
        Channel, Executor, Message, MessageCodec, PacketCodec, ProcessRunner, SendQueue,
        TransportKey,
    },
    error::TransportError,
    framework::Protocol,
};

/// Handed to the router so a handler can answer on the transport the
/// request arrived on.
#[async_trait]
pub trait Responder: Send + Sync {
    /// Encode `msg` and queue it for the sender loop.
    async fn respond(&self, msg: Box<dyn Message>) -> Result<()>;

    /// Close the transport this responder belongs to.
    fn close(&self);
}

/// Application dispatch for one decoded request. `cmd` is present when the
/// message exposes a command number. Errors are logged, the request is not
/// retried.
#[async_trait]
pub trait ServerRouter: Send + Sync {
    async fn route(
        &self,
        responder: Arc<dyn Responder>,
        msg_id: &str,
        cmd: Option<i32>,
        msg: Box<dyn Message>,
    ) -> Result<()>;
}

pub struct ServerTransport {
    channel: Arc<dyn Channel>,
    packet: Arc<dyn PacketCodec>,
    message: Arc<dyn MessageCodec>,
    queue: Arc<dyn SendQueue>,
    executor: Arc<dyn Executor>,
    router: Arc<dyn ServerRouter>,
    closed: CancellationToken,
    last_err: Mutex<Option<Arc<anyhow::Error>>>,
    self_ref: OnceCell<std::sync::Weak<ServerTransport>>,
}

impl ServerTransport {
    pub fn new(
        channel: Arc<dyn Channel>,
        key: &dyn TransportKey,
        pt: &Arc<Protocol>,
    ) -> Result<Arc<Self>> {
        let queue = (pt.queue)(key)?;
        let executor = (pt.executor)(key)?;
        let router = pt
            .router
            .clone()
            .ok_or(TransportError::ProtocolIncomplete {
                what: "server router",
            })?;

        let transport = Arc::new(Self {
            channel,
            packet: Arc::clone(&pt.packet),
            message: Arc::clone(&pt.message),
            queue,
            executor,
            router,
            closed: CancellationToken::new(),
            last_err: Mutex::new(None),
            self_ref: OnceCell::new(),
        });
        let _ = transport.self_ref.set(Arc::downgrade(&transport));
        Ok(transport)
    }

    /// Run both loops until the channel dies or the transport is closed.
    pub async fn run_loop(self: Arc<Self>) -> Result<()> {
        let recv_done = Arc::new(Notify::new());
        let ((), ()) = tokio::join!(
            Arc::clone(&self).receive_loop(Arc::clone(&recv_done)),
            self.send_loop(recv_done),
        );

        match self.take_error() {
            Some(err) => Err(anyhow!(err)),
            None => Ok(()),
        }
    }

    async fn receive_loop(self: Arc<Self>, done: Arc<Notify>) {
        loop {
            let decoded = tokio::select! {
                _ = self.closed.cancelled() => break,
                decoded = self.packet.decode_packet(self.channel.as_ref()) => decoded,
            };
            if self.closed.is_cancelled() || self.has_error() {
                break;
            }
            match decoded {
                Ok(payload) => {
                    self.executor.process(Arc::clone(&self) as Arc<dyn ProcessRunner>, payload);
                },
                Err(e) => {
                    self.store_error(e);
                    // Wake the sender so the transport winds down instead of
                    // leaving it parked on an empty queue.
                    self.closed.cancel();
                    break;
                },
            }
        }
        done.notify_one();
    }

    async fn send_loop(&self, recv_done: Arc<Notify>) {
        loop {
            let popped = tokio::select! {
                _ = self.closed.cancelled() => break,
                popped = self.queue.pop() => popped,
            };
            let Some(payload) = popped else { break };
            if let Err(e) = self
                .packet
                .encode_packet(self.channel.as_ref(), &payload)
                .await
            {
                self.store_error(e);
                // Wake the receiver as well; the channel is done for.
                self.closed.cancel();
            }
            if self.closed.is_cancelled() || self.has_error() {
                break;
            }
        }

        if self.closed.is_cancelled() {
            recv_done.notified().await;
            while let Some(payload) = self.queue.try_pop().await {
                if let Err(e) = self
                    .packet
                    .encode_packet(self.channel.as_ref(), &payload)
                    .await
                {
                    warn!(
                        "server transport encode packet to {} failed: {e:#}",
                        self.channel.peer_info()
                    );
                }
            }
        }
    }

    /// Automatic response timeout is not implemented; requests the handler
    /// never answers simply expire on the client.
    pub fn timeout(&self, _msg_id: &str) {}

    fn has_error(&self) -> bool {
        self.last_err.lock().map(|e| e.is_some()).unwrap_or(true)
    }

    fn store_error(&self, err: anyhow::Error) {
        if let Ok(mut slot) = self.last_err.lock()
            && slot.is_none()
        {
            *slot = Some(Arc::new(err));
        }
    }

    fn take_error(&self) -> Option<Arc<anyhow::Error>> {
        self.last_err.lock().ok().and_then(|mut e| e.take())
    }
}

#[async_trait]
impl ProcessRunner for ServerTransport {
    /// Decode one request and hand it to the router. Message-level decode
    /// failures drop the frame without touching the loops.
    async fn process(&self, payload: Bytes) {
        let (msg, msg_id) = match self.message.decode(&payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("server transport message decode failed: {e:#}");
                return;
            },
        };

        let Some(responder) = self.self_ref.get().and_then(|w| w.upgrade()) else {
            return;
        };
        let cmd = msg.cmd();
        if let Err(e) = self.router.route(responder, &msg_id, cmd, msg).await {
            warn!("server transport router failed for msg_id:{msg_id}: {e:#}");
        }
    }
}

#[async_trait]
impl Responder for ServerTransport {
    async fn respond(&self, msg: Box<dyn Message>) -> Result<()> {
        if self.closed.is_cancelled() {
            bail!("channel to [{}] is closed", self.channel.peer_info());
        }
        let (payload, msg_id) = self.message.encode(msg)?;
        debug!("server transport queueing response msg_id:{msg_id}");
        self.queue.push(payload).await
    }

    fn close(&self) {
        self.closed.cancel();
    }
}

impl std::fmt::Debug for ServerTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerTransport")
            .field("peer", &self.channel.peer_info())
            .field("closed", &self.closed.is_cancelled())
            .finish()
    }
}
