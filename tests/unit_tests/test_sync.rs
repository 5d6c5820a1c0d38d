// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use plexrpc::{
    contract::{Message, StateMachine},
    error::TransportError,
    transport::SyncWaiter,
};

#[derive(Debug, PartialEq, Eq)]
struct Reply(u64);

impl Message for Reply {}

#[tokio::test]
async fn wait_returns_the_processed_value() {
    let waiter = SyncWaiter::fire();

    let notifier = Arc::clone(&waiter);
    tokio::spawn(async move {
        notifier.process("id-1", Box::new(Reply(42)));
    });

    let value = waiter.wait().await.expect("wait failed");
    let reply = value.downcast::<Reply>().expect("wrong reply type");
    assert_eq!(*reply, Reply(42));
}

#[tokio::test]
async fn wait_maps_timeout_to_error() {
    let waiter = SyncWaiter::fire();
    waiter.timeout("id-1");

    let err = waiter.wait().await.expect_err("wait should fail");
    assert!(matches!(
        err.downcast_ref::<TransportError>(),
        Some(TransportError::ResponseTimeout)
    ));
}

#[tokio::test]
async fn shut_down_unblocks_as_misuse() {
    let waiter = SyncWaiter::fire();
    waiter.shut_down();

    let err = waiter.wait().await.expect_err("wait should fail");
    assert!(matches!(
        err.downcast_ref::<TransportError>(),
        Some(TransportError::SyncMisuse)
    ));
}

#[tokio::test]
async fn signal_before_wait_is_not_lost() {
    let waiter = SyncWaiter::fire();
    waiter.process("id-1", Box::new(Reply(7)));

    // The reply landed before anyone waited; the permit must be stored.
    let value = waiter.wait().await.expect("wait failed");
    assert!(value.downcast::<Reply>().is_some());
}
