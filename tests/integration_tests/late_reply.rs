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
    transport::ServerRouter,
};

use crate::integration_tests::common::{
    CountingStateMachine, DemoMessage, JsonCodec, RecordingRouter, free_port, spawn_server,
};

/// Server answers 500 ms after a 200 ms deadline: the caller sees a timeout
/// and the late frame is discarded without reaching the state machine.
#[tokio::test(flavor = "multi_thread")]
async fn late_reply_is_dropped_after_timeout() {
    let framework = Arc::new(Framework::default());
    let router = RecordingRouter::replying_after(Duration::from_millis(500));
    let server = framework
        .register_server_protocol(Protocol::server(
            Arc::new(JsonCodec),
            Arc::clone(&router) as Arc<dyn ServerRouter>,
            "slowpoke",
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
        .send(client, Arc::clone(&sm) as Arc<dyn StateMachine>, &key, Box::new(DemoMessage::new(vec![5])))
        .await
        .expect("send failed");

    // Past the deadline, past the late reply, past a settling margin.
    tokio::time::sleep(Duration::from_millis(1200)).await;

    assert_eq!(sm.timed_out.load(Ordering::SeqCst), 1);
    assert_eq!(sm.processed.load(Ordering::SeqCst), 0);
    assert_eq!(router.bodies(), vec![vec![5]]);
}

#[tokio::test(flavor = "multi_thread")]
async fn sync_send_surfaces_timeout_before_late_reply() {
    let framework = Arc::new(Framework::default());
    let router = RecordingRouter::replying_after(Duration::from_millis(500));
    let server = framework
        .register_server_protocol(Protocol::server(
            Arc::new(JsonCodec),
            Arc::clone(&router) as Arc<dyn ServerRouter>,
            "slowpoke",
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

    let err = framework
        .sync_send(client, &key, Box::new(DemoMessage::new(vec![6])))
        .await
        .expect_err("request should time out");
    assert!(matches!(
        err.downcast_ref::<TransportError>(),
        Some(TransportError::ResponseTimeout)
    ));
}
