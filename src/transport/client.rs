// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Client transport: owns one active channel, runs a sender loop and a
//! receiver loop against it, correlates replies through the pending table
//! and swaps the channel on failover-eligible errors.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::{
    sync::{Notify, mpsc},
    task::JoinHandle,
    time::{sleep, timeout},
};
use tracing::{debug, info, warn};

use crate::{
    contract::{
        Channel, ChannelFactory, Executor, Message, MessageCodec, PacketCodec,
        PendingTable, ProcessRunner, SendQueue, StateMachine, TransportKey,
    },
    error::TransportError,
    framework::Protocol,
    transport::timer::{self, TIMER_ARM_CAP, TimeoutSink},
};
use tokio_util::sync::CancellationToken;

/// Read deadline used while draining in-flight frames after close.
const DRAIN_READ_TIMEOUT: Duration = Duration::from_millis(50);

pub struct ClientTransport {
    packet: Arc<dyn PacketCodec>,
    message: Arc<dyn MessageCodec>,
    factory: Arc<dyn ChannelFactory>,
    queue: Arc<dyn SendQueue>,
    pending: Arc<dyn PendingTable>,
    executor: Arc<dyn Executor>,
    arm_tx: mpsc::Sender<String>,
    /// Receiver-side settle window after close, half the request timeout.
    grace: Duration,
    closed: CancellationToken,
    down: AtomicBool,
    last_err: Mutex<Option<Arc<anyhow::Error>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    key: String,
}

impl ClientTransport {
    /// Build the plug points from the protocol descriptor, dial the first
    /// channel and start the runloop and the timer driver.
    pub async fn connect(key: &dyn TransportKey, pt: &Arc<Protocol>) -> Result<Arc<Self>> {
        let queue = (pt.queue)(key)?;
        let factory = (pt.channel_factory)(key)?;
        let executor = (pt.executor)(key)?;
        let pending_ctor =
            pt.pending
                .as_ref()
                .ok_or(TransportError::ProtocolIncomplete {
                    what: "pending-table constructor",
                })?;
        let pending = pending_ctor(key)?;

        let channel = factory.next().await?;
        if !channel.is_active() {
            factory.gc(channel).await;
            return Err(anyhow!("channel is not active"));
        }

        let (arm_tx, arm_rx) = mpsc::channel(TIMER_ARM_CAP);
        let transport = Arc::new(Self {
            packet: Arc::clone(&pt.packet),
            message: Arc::clone(&pt.message),
            factory,
            queue,
            pending,
            executor,
            arm_tx,
            grace: (pt.timeout)() / 2,
            closed: CancellationToken::new(),
            down: AtomicBool::new(false),
            last_err: Mutex::new(None),
            tasks: Mutex::new(Vec::with_capacity(2)),
            key: key.key().to_string(),
        });

        let runner = tokio::spawn(Arc::clone(&transport).run_loop(channel));
        let driver = tokio::spawn(timer::drive(
            Arc::downgrade(&transport),
            arm_rx,
            Arc::clone(&pt.timeout),
            transport.closed.clone(),
        ));
        if let Ok(mut tasks) = transport.tasks.lock() {
            tasks.push(runner);
            tasks.push(driver);
        }

        Ok(transport)
    }

    /// Register the state machine, queue the encoded payload and arm the
    /// per-request timer.
    pub async fn send(
        &self,
        sm: Arc<dyn StateMachine>,
        key: &dyn TransportKey,
        msg: Box<dyn Message>,
    ) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(TransportError::TransportClosed {
                key: key.key().to_string(),
            }
            .into());
        }

        let (payload, msg_id) = self.message.encode(msg)?;
        self.pending.put(msg_id.clone(), sm);
        if let Err(e) = self.queue.push(payload).await {
            self.pending.pop(&msg_id);
            return Err(e);
        }
        if self.arm_tx.send(msg_id.clone()).await.is_err() {
            self.pending.pop(&msg_id);
            return Err(anyhow!("timer arm channel is closed"));
        }
        Ok(())
    }

    /// Whether the runloop has died; the façade drops such transports from
    /// the pool.
    pub fn is_down(&self) -> bool {
        self.down.load(Ordering::Acquire)
    }

    pub fn last_error(&self) -> Option<Arc<anyhow::Error>> {
        self.last_err.lock().ok().and_then(|e| e.clone())
    }

    /// Cooperative shutdown: stop both loops, drain best-effort, release the
    /// channel. Safe to call more than once.
    pub async fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();
        self.queue.close().await;

        let handles: Vec<JoinHandle<()>> = match self.tasks.lock() {
            Ok(mut tasks) => tasks.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for handle in handles {
            let _ = handle.await;
        }
    }

    async fn run_loop(self: Arc<Self>, mut channel: Arc<dyn Channel>) {
        let mut held: Option<Bytes> = None;
        loop {
            let sender_done = Arc::new(Notify::new());
            let (unsent, ()) = tokio::join!(
                self.sender_loop(Arc::clone(&channel), held.take(), Arc::clone(&sender_done)),
                Arc::clone(&self).receiver_loop(Arc::clone(&channel), sender_done),
            );
            held = unsent;

            if self.closed.is_cancelled() {
                self.factory.gc(channel).await;
                return;
            }

            let Some(err) = self.take_error() else {
                // Loops only exit on close or a latched error.
                self.shut_down_for(anyhow!("transport loops exited unexpectedly"));
                self.factory.gc(channel).await;
                return;
            };

            if !self.factory.is_try(&err) {
                self.shut_down_keeping(err);
                self.factory.gc(channel).await;
                return;
            }

            match self.factory.next().await {
                Ok(next) if next.is_active() => {
                    debug!("transport {} failing over to {}", self.key, next.peer_info());
                    self.factory.gc(channel).await;
                    channel = next;
                },
                Ok(next) => {
                    self.shut_down_for(anyhow!("client channel is not active"));
                    self.factory.gc(next).await;
                    self.factory.gc(channel).await;
                    return;
                },
                Err(dial_err) => {
                    warn!("transport {} failover dial failed: {dial_err:#}", self.key);
                    self.shut_down_for(dial_err);
                    self.factory.gc(channel).await;
                    return;
                },
            }
        }
    }

    /// Pop payloads and encode them onto the channel. Returns the payload
    /// that was popped but not yet written, so failover can retry it.
    async fn sender_loop(
        &self,
        channel: Arc<dyn Channel>,
        mut held: Option<Bytes>,
        done: Arc<Notify>,
    ) -> Option<Bytes> {
        loop {
            if self.closed.is_cancelled() || self.has_error() {
                break;
            }
            if held.is_none() {
                held = tokio::select! {
                    _ = self.closed.cancelled() => break,
                    popped = self.queue.pop() => match popped {
                        Some(payload) => Some(payload),
                        None => break,
                    },
                };
            }
            if let Some(payload) = held.as_ref() {
                match self.packet.encode_packet(channel.as_ref(), payload).await {
                    Ok(()) => held = None,
                    Err(e) => {
                        self.store_error(e);
                        break;
                    },
                }
            }
        }

        if self.closed.is_cancelled() {
            // Flush whatever was queued before the close, best-effort.
            if let Some(payload) = held.take()
                && let Err(e) = self.packet.encode_packet(channel.as_ref(), &payload).await
            {
                warn!(
                    "client transport encode packet to {} failed: {e:#}",
                    channel.peer_info()
                );
            }
            while let Some(payload) = self.queue.try_pop().await {
                if let Err(e) = self.packet.encode_packet(channel.as_ref(), &payload).await {
                    warn!(
                        "client transport encode packet to {} failed: {e:#}",
                        channel.peer_info()
                    );
                }
            }
        }

        done.notify_one();
        held
    }

    /// Decode frames and hand them to the executor until close or error.
    async fn receiver_loop(self: Arc<Self>, channel: Arc<dyn Channel>, sender_done: Arc<Notify>) {
        loop {
            let decoded = tokio::select! {
                _ = self.closed.cancelled() => break,
                decoded = self.packet.decode_packet(channel.as_ref()) => decoded,
            };
            if self.closed.is_cancelled() || self.has_error() {
                break;
            }
            match decoded {
                Ok(payload) => {
                    self.executor.process(Arc::clone(&self) as Arc<dyn ProcessRunner>, payload);
                },
                Err(e) => {
                    warn!(
                        "client transport decode packet from {} failed: {e:#}",
                        channel.peer_info()
                    );
                    self.store_error(e);
                    break;
                },
            }
        }

        if self.closed.is_cancelled() {
            // Let the sender finish flushing, give the peer a settle window,
            // then pick up whatever replies are already in flight.
            sender_done.notified().await;
            sleep(self.grace).await;
            loop {
                match timeout(
                    DRAIN_READ_TIMEOUT,
                    self.packet.decode_packet(channel.as_ref()),
                )
                .await
                {
                    Ok(Ok(payload)) => {
                        self.executor.process(Arc::clone(&self) as Arc<dyn ProcessRunner>, payload);
                    },
                    Ok(Err(e)) => {
                        debug!(
                            "client transport drain from {} stopped: {e:#}",
                            channel.peer_info()
                        );
                        break;
                    },
                    Err(_) => break,
                }
            }
        }
    }

    fn has_error(&self) -> bool {
        self.last_err.lock().map(|e| e.is_some()).unwrap_or(true)
    }

    /// Latch the first error; both loops exit once one is stored.
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

    fn shut_down_for(&self, err: anyhow::Error) {
        self.store_error(err);
        self.down.store(true, Ordering::Release);
        self.closed.cancel();
    }

    fn shut_down_keeping(&self, err: Arc<anyhow::Error>) {
        if let Ok(mut slot) = self.last_err.lock() {
            slot.get_or_insert(err);
        }
        self.down.store(true, Ordering::Release);
        self.closed.cancel();
    }
}

#[async_trait]
impl ProcessRunner for ClientTransport {
    /// Decode one inbound frame and resolve its pending state machine.
    async fn process(&self, payload: Bytes) {
        let (msg, msg_id) = match self.message.decode(&payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                // The orphaned pending entry is reaped by its timer.
                warn!("inbound message decode failed: {e:#}");
                return;
            },
        };

        match self.pending.pop(&msg_id) {
            Some(sm) => sm.process(&msg_id, msg),
            None => info!("msg_id:{msg_id} has no pending state machine, reply after timeout"),
        }
    }
}

impl TimeoutSink for ClientTransport {
    fn fire_timeout(&self, msg_id: &str) {
        let Some(sm) = self.pending.pop(msg_id) else {
            // Already delivered; the race is benign.
            return;
        };
        info!("msg_id:{msg_id} deadline elapsed");
        self.executor.timeout(sm, msg_id.to_string());
    }
}

impl std::fmt::Debug for ClientTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientTransport")
            .field("key", &self.key)
            .field("closed", &self.closed.is_cancelled())
            .field("down", &self.is_down())
            .finish()
    }
}
