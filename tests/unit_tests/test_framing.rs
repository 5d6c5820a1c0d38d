// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use plexrpc::{
    contract::{Channel, PacketCodec},
    defaults::LengthPrefixCodec,
    error::TransportError,
};

use crate::unit_tests::MemoryChannel;

#[tokio::test]
async fn round_trip_payloads() {
    let codec = LengthPrefixCodec::new();
    let (left, right) = MemoryChannel::pair(64 * 1024);

    let payloads: Vec<Vec<u8>> = vec![
        vec![0x01, 0x02, 0x03],
        vec![],
        vec![0xff; 4096],
        b"correlated reply".to_vec(),
    ];

    for payload in &payloads {
        codec
            .encode_packet(left.as_ref(), payload)
            .await
            .expect("encode failed");
        let decoded = codec
            .decode_packet(right.as_ref())
            .await
            .expect("decode failed");
        assert_eq!(&decoded[..], &payload[..]);
    }
}

#[tokio::test]
async fn frames_keep_send_order() {
    let codec = LengthPrefixCodec::new();
    let (left, right) = MemoryChannel::pair(64 * 1024);

    codec
        .encode_packet(left.as_ref(), b"first")
        .await
        .expect("encode failed");
    codec
        .encode_packet(left.as_ref(), b"second")
        .await
        .expect("encode failed");

    let a = codec
        .decode_packet(right.as_ref())
        .await
        .expect("decode failed");
    let b = codec
        .decode_packet(right.as_ref())
        .await
        .expect("decode failed");
    assert_eq!(&a[..], b"first");
    assert_eq!(&b[..], b"second");
}

#[tokio::test]
async fn zero_length_frame_is_legal() {
    let codec = LengthPrefixCodec::new();
    let (left, right) = MemoryChannel::pair(1024);

    codec
        .encode_packet(left.as_ref(), &[])
        .await
        .expect("encode failed");
    let decoded = codec
        .decode_packet(right.as_ref())
        .await
        .expect("decode failed");
    assert!(decoded.is_empty());
}

#[tokio::test]
async fn eof_inside_header_is_short_read() {
    let codec = LengthPrefixCodec::new();
    let (left, right) = MemoryChannel::pair(1024);

    // Two header bytes, then FIN.
    left.send(&[0x00, 0x00]).await.expect("raw send failed");
    left.shutdown().await;

    let err = codec
        .decode_packet(right.as_ref())
        .await
        .expect_err("decode should fail");
    match err.downcast_ref::<TransportError>() {
        Some(TransportError::ShortRead { wanted: 4, got: 2 }) => {},
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn eof_inside_body_is_short_body() {
    let codec = LengthPrefixCodec::new();
    let (left, right) = MemoryChannel::pair(1024);

    // Header promises ten bytes, only four arrive.
    left.send(&[0x00, 0x00, 0x00, 0x0a]).await.expect("raw send failed");
    left.send(&[1, 2, 3, 4]).await.expect("raw send failed");
    left.shutdown().await;

    let err = codec
        .decode_packet(right.as_ref())
        .await
        .expect_err("decode should fail");
    match err.downcast_ref::<TransportError>() {
        Some(TransportError::ShortBody { wanted: 10, got: 4 }) => {},
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn clean_eof_before_header_is_io_error() {
    let codec = LengthPrefixCodec::new();
    let (left, right) = MemoryChannel::pair(1024);
    left.shutdown().await;

    let err = codec
        .decode_packet(right.as_ref())
        .await
        .expect_err("decode should fail");
    let io = err
        .downcast_ref::<std::io::Error>()
        .expect("expected io error");
    assert_eq!(io.kind(), std::io::ErrorKind::UnexpectedEof);
}
