// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    sync::{Arc, atomic::Ordering},
    time::Duration,
};

use plexrpc::{
    contract::StateMachine,
    defaults::TcpEndpoint,
    error::TransportError,
    framework::{Framework, Protocol},
};
use tokio::time::Instant;

use crate::integration_tests::common::{
    CountingStateMachine, DemoMessage, JsonCodec, SilentRouter, free_port, spawn_server,
};

#[tokio::test(flavor = "multi_thread")]
async fn sync_send_reports_the_deadline() {
    let framework = Arc::new(Framework::default());
    let server = framework
        .register_server_protocol(Protocol::server(
            Arc::new(JsonCodec),
            Arc::new(SilentRouter),
            "blackhole",
        ))
        .expect("server registration failed");
    let client = framework
        .register_protocol(
            Protocol::client(Arc::new(JsonCodec)).with_timeout(Duration::from_millis(200)),
        )
        .expect("client registration failed");

    let port = free_port();
    spawn_server(Arc::clone(&framework), server, port).await;
    let key = TcpEndpoint::new("127.0.0.1", port);

    let started = Instant::now();
    let err = framework
        .sync_send(client, &key, Box::new(DemoMessage::new(vec![9])))
        .await
        .expect_err("request should time out");
    let elapsed = started.elapsed();

    assert!(matches!(
        err.downcast_ref::<TransportError>(),
        Some(TransportError::ResponseTimeout)
    ));
    // Deadline plus one timer tick of slack, nowhere near the 10 s default.
    assert!(elapsed >= Duration::from_millis(190), "fired early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "fired late: {elapsed:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn timeout_is_delivered_exactly_once() {
    let framework = Arc::new(Framework::default());
    let server = framework
        .register_server_protocol(Protocol::server(
            Arc::new(JsonCodec),
            Arc::new(SilentRouter),
            "blackhole",
        ))
        .expect("server registration failed");
    let client = framework
        .register_protocol(
            Protocol::client(Arc::new(JsonCodec)).with_timeout(Duration::from_millis(200)),
        )
        .expect("client registration failed");

    let port = free_port();
    spawn_server(Arc::clone(&framework), server, port).await;
    let key = TcpEndpoint::new("127.0.0.1", port);

    let sm = Arc::new(CountingStateMachine::default());
    framework
        .send(client, Arc::clone(&sm) as Arc<dyn StateMachine>, &key, Box::new(DemoMessage::new(vec![7])))
        .await
        .expect("send failed");

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(sm.processed.load(Ordering::SeqCst), 0);
    assert_eq!(sm.timed_out.load(Ordering::SeqCst), 1);
}
