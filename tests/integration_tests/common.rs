// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Shared fixture protocol: JSON-encoded demo messages over the default
//! length-prefixed framing, an echo router and small helpers.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use bytes::Bytes;
use plexrpc::{
    contract::{Executor, Message, MessageCodec, ProcessRunner, StateMachine},
    framework::Framework,
    transport::{Responder, ServerRouter},
    utils::generate_msg_id,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, mpsc};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DemoMessage {
    pub id: String,
    pub cmd: i32,
    pub body: Vec<u8>,
}

impl DemoMessage {
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            id: generate_msg_id(),
            cmd: 1,
            body,
        }
    }

    pub fn with_id(id: &str, body: Vec<u8>) -> Self {
        Self {
            id: id.to_string(),
            cmd: 1,
            body,
        }
    }
}

impl Message for DemoMessage {
    fn cmd(&self) -> Option<i32> {
        Some(self.cmd)
    }
}

pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn encode(&self, msg: Box<dyn Message>) -> Result<(Bytes, String)> {
        let msg = msg
            .downcast::<DemoMessage>()
            .ok_or_else(|| anyhow!("unexpected message type"))?;
        let payload = serde_json::to_vec(&*msg)?;
        Ok((Bytes::from(payload), msg.id))
    }

    fn decode(&self, payload: &[u8]) -> Result<(Box<dyn Message>, String)> {
        let msg: DemoMessage = serde_json::from_slice(payload)?;
        let id = msg.id.clone();
        Ok((Box::new(msg), id))
    }
}

/// Router that answers every request with its own payload.
pub struct EchoRouter;

#[async_trait]
impl ServerRouter for EchoRouter {
    async fn route(
        &self,
        responder: Arc<dyn Responder>,
        _msg_id: &str,
        _cmd: Option<i32>,
        msg: Box<dyn Message>,
    ) -> Result<()> {
        responder.respond(msg).await
    }
}

/// Router that swallows every request without answering.
pub struct SilentRouter;

#[async_trait]
impl ServerRouter for SilentRouter {
    async fn route(
        &self,
        _responder: Arc<dyn Responder>,
        _msg_id: &str,
        _cmd: Option<i32>,
        _msg: Box<dyn Message>,
    ) -> Result<()> {
        Ok(())
    }
}

/// Router that records request bodies and optionally replies after a delay.
pub struct RecordingRouter {
    pub seen: std::sync::Mutex<Vec<Vec<u8>>>,
    pub arrived: Notify,
    pub reply_after: Option<Duration>,
}

impl RecordingRouter {
    pub fn silent() -> Arc<Self> {
        Arc::new(Self {
            seen: std::sync::Mutex::new(Vec::new()),
            arrived: Notify::new(),
            reply_after: None,
        })
    }

    pub fn replying_after(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            seen: std::sync::Mutex::new(Vec::new()),
            arrived: Notify::new(),
            reply_after: Some(delay),
        })
    }

    pub fn bodies(&self) -> Vec<Vec<u8>> {
        self.seen.lock().expect("seen lock poisoned").clone()
    }
}

#[async_trait]
impl ServerRouter for RecordingRouter {
    async fn route(
        &self,
        responder: Arc<dyn Responder>,
        _msg_id: &str,
        _cmd: Option<i32>,
        msg: Box<dyn Message>,
    ) -> Result<()> {
        let msg = msg
            .downcast::<DemoMessage>()
            .ok_or_else(|| anyhow!("unexpected message type"))?;
        self.seen
            .lock()
            .expect("seen lock poisoned")
            .push(msg.body.clone());
        self.arrived.notify_waiters();

        if let Some(delay) = self.reply_after {
            tokio::time::sleep(delay).await;
            responder.respond(msg).await?;
        }
        Ok(())
    }
}

enum Job {
    Process(Arc<dyn ProcessRunner>, Bytes),
    Timeout(Arc<dyn StateMachine>, String),
}

/// Executor funnelling every dispatch through one worker task, so router
/// observation order equals frame decode order. Used by tests that assert
/// wire FIFO.
pub struct SequentialExecutor {
    tx: mpsc::UnboundedSender<Job>,
}

impl SequentialExecutor {
    pub fn spawn() -> Arc<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                match job {
                    Job::Process(runner, payload) => runner.process(payload).await,
                    Job::Timeout(sm, msg_id) => sm.timeout(&msg_id),
                }
            }
        });
        Arc::new(Self { tx })
    }
}

impl Executor for SequentialExecutor {
    fn process(&self, runner: Arc<dyn ProcessRunner>, payload: Bytes) {
        let _ = self.tx.send(Job::Process(runner, payload));
    }

    fn timeout(&self, sm: Arc<dyn StateMachine>, msg_id: String) {
        let _ = self.tx.send(Job::Timeout(sm, msg_id));
    }
}

/// State machine counting terminal transitions, for delivery-exactly-once
/// assertions.
#[derive(Default)]
pub struct CountingStateMachine {
    pub processed: AtomicUsize,
    pub timed_out: AtomicUsize,
    pub done: Notify,
}

impl StateMachine for CountingStateMachine {
    fn process(&self, _msg_id: &str, _msg: Box<dyn Message>) {
        self.processed.fetch_add(1, Ordering::SeqCst);
        self.done.notify_waiters();
    }

    fn timeout(&self, _msg_id: &str) {
        self.timed_out.fetch_add(1, Ordering::SeqCst);
        self.done.notify_waiters();
    }
}

/// Reserve a loopback port. The listener is dropped, leaving a tiny window
/// before the server rebinds; good enough for tests.
pub fn free_port() -> u16 {
    let listener =
        std::net::TcpListener::bind("127.0.0.1:0").expect("failed to bind probe listener");
    listener.local_addr().expect("no local addr").port()
}

/// Spawn `listen` for a registered server protocol and wait until the port
/// accepts connections.
pub async fn spawn_server(
    framework: Arc<Framework>,
    handle: plexrpc::framework::ProtocolHandle,
    port: u16,
) {
    let key = plexrpc::defaults::TcpEndpoint::new("127.0.0.1", port);
    tokio::spawn(async move {
        let _ = framework.listen(handle, &key).await;
    });
    wait_listening(port).await;
}

pub async fn wait_listening(port: u16) {
    for _ in 0..50 {
        if tokio::net::TcpStream::connect(("127.0.0.1", port))
            .await
            .is_ok()
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("server on port {port} never came up");
}
