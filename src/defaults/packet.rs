// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Length-prefixed framing: 4 bytes of big-endian payload length, then the
//! payload. Length 0 is legal and decodes to an empty payload.

use std::{io, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};

use crate::{contract::{Channel, PacketCodec}, error::TransportError};

/// Size of the length prefix on the wire.
pub const PACKET_HEAD_BYTES: usize = 4;

/// Produces the buffer a decoded payload is read into. The default heap
/// allocates; pooling allocators plug in through
/// [`LengthPrefixCodec::with_allocator`].
pub type AllocateFn = Arc<dyn Fn(u32) -> Result<BytesMut> + Send + Sync>;

pub struct LengthPrefixCodec {
    allocate: AllocateFn,
}

impl LengthPrefixCodec {
    pub fn new() -> Self {
        Self {
            allocate: Arc::new(|size| Ok(BytesMut::zeroed(size as usize))),
        }
    }

    pub fn with_allocator(allocate: AllocateFn) -> Self {
        Self { allocate }
    }
}

impl Default for LengthPrefixCodec {
    fn default() -> Self {
        Self::new()
    }
}

enum FillError {
    Io(io::Error),
    Eof { got: usize },
}

/// Read exactly `buf.len()` bytes, tolerating partial reads.
async fn fill(ch: &dyn Channel, buf: &mut [u8]) -> Result<(), FillError> {
    let mut got = 0;
    while got < buf.len() {
        match ch.recv(&mut buf[got..]).await {
            Ok(0) => return Err(FillError::Eof { got }),
            Ok(n) => got += n,
            Err(e) => return Err(FillError::Io(e)),
        }
    }
    Ok(())
}

#[async_trait]
impl PacketCodec for LengthPrefixCodec {
    async fn encode_packet(&self, ch: &dyn Channel, payload: &[u8]) -> Result<()> {
        let head = (payload.len() as u32).to_be_bytes();
        let written = ch.send(&head).await?;
        if written < PACKET_HEAD_BYTES {
            return Err(TransportError::ShortHeader { written }.into());
        }

        let mut offset = 0;
        while offset < payload.len() {
            let n = ch.send(&payload[offset..]).await?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "channel accepted no payload bytes",
                )
                .into());
            }
            offset += n;
        }
        Ok(())
    }

    async fn decode_packet(&self, ch: &dyn Channel) -> Result<Bytes> {
        let mut head = [0u8; PACKET_HEAD_BYTES];
        match fill(ch, &mut head).await {
            Ok(()) => {},
            Err(FillError::Io(e)) => return Err(e.into()),
            Err(FillError::Eof { got: 0 }) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream closed before packet header",
                )
                .into());
            },
            Err(FillError::Eof { got }) => {
                return Err(TransportError::ShortRead {
                    wanted: PACKET_HEAD_BYTES,
                    got,
                }
                .into());
            },
        }

        let size = u32::from_be_bytes(head);
        if size == 0 {
            return Ok(Bytes::new());
        }

        let mut body = (self.allocate)(size)?;
        debug_assert_eq!(body.len(), size as usize);
        match fill(ch, &mut body).await {
            Ok(()) => Ok(body.freeze()),
            Err(FillError::Io(e)) => Err(e.into()),
            Err(FillError::Eof { got }) => Err(TransportError::ShortBody {
                wanted: size as usize,
                got,
            }
            .into()),
        }
    }
}
