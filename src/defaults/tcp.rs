// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! TCP plug-ins: single-endpoint and HA transport keys, the channel over a
//! split socket, the client dialer factories and the server acceptor
//! factory.

use std::{
    io,
    sync::{
        Arc, Mutex as StdMutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::Mutex,
    time::timeout,
};
use tracing::{debug, warn};

use crate::contract::{Channel, ChannelFactory, TransportKey};

/// Dial deadline for outbound connections.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(10);
/// Transient accept failures tolerated before the acceptor gives up.
pub const ACCEPT_MAX_ERROR_RETRY: u32 = 3;

/// One `ip:port` peer address.
#[derive(Debug, Clone)]
pub struct TcpEndpoint {
    ip: String,
    port: u16,
    key: OnceCell<String>,
}

impl TcpEndpoint {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
            key: OnceCell::new(),
        }
    }

    fn address(&self) -> &str {
        self.key.get_or_init(|| format!("{}:{}", self.ip, self.port))
    }
}

impl TransportKey for TcpEndpoint {
    fn key(&self) -> &str {
        self.address()
    }
}

/// Ordered endpoint list for transparent failover. The first endpoint is the
/// identity the pool caches under; the rest are standbys tried in order once
/// the active one misbehaves.
#[derive(Debug, Clone)]
pub struct HaTcpTransportKey {
    endpoints: Vec<TcpEndpoint>,
}

impl HaTcpTransportKey {
    pub fn new(active: TcpEndpoint) -> Self {
        Self {
            endpoints: vec![active],
        }
    }

    pub fn standby(mut self, endpoint: TcpEndpoint) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    pub fn endpoints(&self) -> &[TcpEndpoint] {
        &self.endpoints
    }
}

impl TransportKey for HaTcpTransportKey {
    fn key(&self) -> &str {
        self.endpoints[0].address()
    }
}

/// Byte-duplex over a split TCP stream. Reader and writer halves sit behind
/// independent mutexes so the receiver loop and the sender loop can run
/// concurrently against the same channel.
#[derive(Debug)]
pub struct TcpChannel {
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    peer: String,
    active: AtomicBool,
}

impl TcpChannel {
    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        stream.set_nodelay(true)?;
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let (r, w) = stream.into_split();
        Ok(Self {
            reader: Mutex::new(r),
            writer: Mutex::new(w),
            peer,
            active: AtomicBool::new(true),
        })
    }

    async fn dial(address: &str) -> Result<Self> {
        let stream = timeout(DIAL_TIMEOUT, TcpStream::connect(address))
            .await
            .with_context(|| format!("dial {address} timeout"))??;
        Self::from_stream(stream)
    }
}

#[async_trait]
impl Channel for TcpChannel {
    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.lock().await.read(buf).await
    }

    async fn send(&self, buf: &[u8]) -> io::Result<usize> {
        self.writer.lock().await.write(buf).await
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn peer_info(&self) -> String {
        format!("tcp:{}", self.peer)
    }

    async fn shutdown(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            // FIN is best-effort; the peer may already be gone.
            let _ = self.writer.lock().await.shutdown().await;
        }
    }
}

/// Dialer for a single fixed endpoint. Failover always retries the same
/// address.
pub struct TcpClientChannelFactory {
    address: String,
}

impl TcpClientChannelFactory {
    pub fn new(key: &TcpEndpoint) -> Self {
        Self {
            address: key.address().to_string(),
        }
    }
}

#[async_trait]
impl ChannelFactory for TcpClientChannelFactory {
    async fn next(&self) -> Result<Arc<dyn Channel>> {
        let ch = TcpChannel::dial(&self.address).await?;
        Ok(Arc::new(ch))
    }

    fn is_try(&self, err: &anyhow::Error) -> bool {
        warn!("tcp channel to {} failed: {err:#}", self.address);
        true
    }

    async fn gc(&self, ch: Arc<dyn Channel>) {
        debug!("gc tcp channel peer:{}", ch.peer_info());
        ch.shutdown().await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndpointHealth {
    Normal,
    Exception,
}

struct HaState {
    health: Vec<EndpointHealth>,
    /// Index of the endpoint the latest dial went to.
    cursor: Option<usize>,
}

/// Round-robin dialer over an [`HaTcpTransportKey`]. Endpoints observed to
/// refuse connections are marked exception and skipped; once every endpoint
/// is exception, failover stops.
pub struct HaTcpChannelFactory {
    addresses: Vec<String>,
    state: StdMutex<HaState>,
}

impl HaTcpChannelFactory {
    pub fn new(key: &HaTcpTransportKey) -> Self {
        let addresses: Vec<String> = key
            .endpoints()
            .iter()
            .map(|e| e.address().to_string())
            .collect();
        let health = vec![EndpointHealth::Normal; addresses.len()];
        Self {
            addresses,
            state: StdMutex::new(HaState {
                health,
                cursor: None,
            }),
        }
    }

    /// Pick the next healthy endpoint after the cursor, advancing it.
    fn pick(&self) -> Result<usize> {
        let mut state = self.state.lock().map_err(|_| {
            anyhow::anyhow!("ha endpoint state poisoned")
        })?;
        let len = self.addresses.len();
        let start = state.cursor.map_or(0, |c| (c + 1) % len);
        for step in 0..len {
            let idx = (start + step) % len;
            if state.health[idx] == EndpointHealth::Normal {
                state.cursor = Some(idx);
                return Ok(idx);
            }
        }
        bail!(crate::error::TransportError::NoAvailableChannel)
    }
}

#[async_trait]
impl ChannelFactory for HaTcpChannelFactory {
    async fn next(&self) -> Result<Arc<dyn Channel>> {
        let idx = self.pick()?;
        let ch = TcpChannel::dial(&self.addresses[idx]).await?;
        Ok(Arc::new(ch))
    }

    fn is_try(&self, err: &anyhow::Error) -> bool {
        warn!("ha tcp channel failed: {err:#}");
        let text = format!("{err:#}").to_lowercase();
        if !(text.contains("connection") && text.contains("refuse")) {
            return true;
        }

        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        if let Some(idx) = state.cursor {
            state.health[idx] = EndpointHealth::Exception;
            debug!("endpoint {} marked exception", self.addresses[idx]);
        }
        state
            .health
            .iter()
            .any(|h| *h == EndpointHealth::Normal)
    }

    async fn gc(&self, ch: Arc<dyn Channel>) {
        debug!("gc ha tcp channel peer:{}", ch.peer_info());
        ch.shutdown().await;
    }
}

/// Accept-side factory: `next` yields one channel per accepted connection.
/// The listener binds lazily on the first call so construction stays
/// synchronous.
pub struct TcpServerChannelFactory {
    address: String,
    listener: tokio::sync::OnceCell<TcpListener>,
}

impl TcpServerChannelFactory {
    pub fn new(key: &TcpEndpoint) -> Self {
        Self {
            address: key.address().to_string(),
            listener: tokio::sync::OnceCell::new(),
        }
    }
}

#[async_trait]
impl ChannelFactory for TcpServerChannelFactory {
    async fn next(&self) -> Result<Arc<dyn Channel>> {
        let listener = self
            .listener
            .get_or_try_init(|| async {
                TcpListener::bind(&self.address)
                    .await
                    .with_context(|| format!("bind {}", self.address))
            })
            .await?;

        let mut retry = 0;
        loop {
            match listener.accept().await {
                Ok((stream, _)) => return Ok(Arc::new(TcpChannel::from_stream(stream)?)),
                Err(e) if retry < ACCEPT_MAX_ERROR_RETRY && is_transient_accept(&e) => {
                    retry += 1;
                    warn!("accept on {} retry {retry}: {e}", self.address);
                },
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn is_try(&self, _err: &anyhow::Error) -> bool {
        false
    }

    async fn gc(&self, ch: Arc<dyn Channel>) {
        debug!("gc accepted channel peer:{}", ch.peer_info());
        ch.shutdown().await;
    }
}

/// Pick the dialer matching the concrete key variant.
pub fn client_channel_factory(key: &dyn TransportKey) -> Result<Arc<dyn ChannelFactory>> {
    let any: &dyn std::any::Any = key;
    if let Some(endpoint) = any.downcast_ref::<TcpEndpoint>() {
        return Ok(Arc::new(TcpClientChannelFactory::new(endpoint)));
    }
    if let Some(ha) = any.downcast_ref::<HaTcpTransportKey>() {
        return Ok(Arc::new(HaTcpChannelFactory::new(ha)));
    }
    bail!("no supported tcp transport key type")
}

/// Acceptor factory for a listen key.
pub fn server_channel_factory(key: &dyn TransportKey) -> Result<Arc<dyn ChannelFactory>> {
    let any: &dyn std::any::Any = key;
    match any.downcast_ref::<TcpEndpoint>() {
        Some(endpoint) => Ok(Arc::new(TcpServerChannelFactory::new(endpoint))),
        None => bail!("no supported tcp transport key type"),
    }
}

fn is_transient_accept(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}
