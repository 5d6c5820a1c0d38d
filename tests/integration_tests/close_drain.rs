// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{sync::Arc, time::Duration};

use plexrpc::{
    defaults::TcpEndpoint,
    framework::{Framework, Protocol},
    transport::{ClientTransport, ServerRouter},
};

use crate::integration_tests::common::{
    CountingStateMachine, DemoMessage, JsonCodec, RecordingRouter, SequentialExecutor,
    free_port, spawn_server,
};

/// Everything pushed before close still reaches the peer: the sender flushes
/// the queue best-effort before the channel is released.
#[tokio::test(flavor = "multi_thread")]
async fn close_flushes_queued_sends() {
    let framework = Arc::new(Framework::default());
    let router = RecordingRouter::silent();
    let server = framework
        .register_server_protocol(
            Protocol::server(
                Arc::new(JsonCodec),
                Arc::clone(&router) as Arc<dyn ServerRouter>,
                "recorder",
            )
            .with_executor(Arc::new(|_| {
                Ok(SequentialExecutor::spawn() as Arc<dyn plexrpc::contract::Executor>)
            })),
        )
        .expect("server registration failed");
    let port = free_port();
    spawn_server(framework, server, port).await;

    let protocol = Arc::new(
        Protocol::client(Arc::new(JsonCodec)).with_timeout(Duration::from_millis(400)),
    );
    let key = TcpEndpoint::new("127.0.0.1", port);
    let transport = ClientTransport::connect(&key, &protocol)
        .await
        .expect("connect failed");

    for i in 1u8..=3 {
        transport
            .send(
                Arc::new(CountingStateMachine::default()),
                &key,
                Box::new(DemoMessage::new(vec![i])),
            )
            .await
            .expect("send failed");
    }
    transport.close().await;

    for _ in 0..100 {
        if router.bodies().len() == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(router.bodies(), vec![vec![1], vec![2], vec![3]]);

    // The transport refuses work after close.
    let err = transport
        .send(
            Arc::new(CountingStateMachine::default()),
            &key,
            Box::new(DemoMessage::new(vec![4])),
        )
        .await
        .expect_err("send after close should fail");
    assert!(err.to_string().contains("closed transport"));
}
