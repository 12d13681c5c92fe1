//! Keep-alive tests
//!
//! Sweeps touch every connector, a failing connector never stops the sweep,
//! and the scheduler starts and stops cleanly.

use std::time::Duration;

use pretty_assertions::assert_eq;
use sessionmux_core::backend::ops;
use sessionmux_core::{FailureKind, GatewayEvent};
use tests::fixtures::context;
use tests::mocks::failure;
use tests::services::test_config;
use tests::{events, GatewayTestHarness};

#[tokio::test]
async fn test_sweep_touches_every_connector() {
    let harness = GatewayTestHarness::new();
    harness.login(&[context(1), context(2), context(3)]).await;

    let report = harness.gateway.keep_alive_now().await;

    assert_eq!(report.total(), 3);
    assert!(report.all_ok());
    assert_eq!(harness.backend.calls(ops::GET_EVENT_CONTEXT), 3);

    let connector = harness.pool().find(&context(2)).await.unwrap();
    assert!(connector.stats().last_keep_alive.is_some());
}

#[tokio::test]
async fn test_one_failure_does_not_stop_sweep() {
    let mut harness = GatewayTestHarness::new();
    harness.login(&[context(1), context(2), context(3)]).await;
    harness.collect_events();
    harness
        .backend
        .fail_invoke(ops::GET_EVENT_CONTEXT, failure(FailureKind::ConnectionLost));

    let report = harness.gateway.keep_alive_now().await;

    assert_eq!(report.total(), 3);
    assert_eq!(report.touched.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(harness.backend.calls(ops::GET_EVENT_CONTEXT), 3);

    let events = harness.collect_events();
    assert_eq!(events::count(&events, "keep_alive_failed"), 1);
    let failed_ctx = events.iter().find_map(|e| match e {
        GatewayEvent::KeepAliveFailed { context, .. } => Some(context.clone()),
        _ => None,
    });
    assert_eq!(failed_ctx.as_ref(), Some(&report.failed[0].0));
}

#[tokio::test]
async fn test_sweep_with_no_connectors_is_empty() {
    let harness = GatewayTestHarness::new();

    let report = harness.gateway.keep_alive_now().await;

    assert_eq!(report.total(), 0);
    assert_eq!(harness.backend.sessions_created(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_sweeps_each_interval() {
    let harness = GatewayTestHarness::with_config(test_config().with_keep_alive_secs(60));
    harness.login(&[context(1)]).await;

    assert!(harness.gateway.start_keep_alive());
    assert!(!harness.gateway.start_keep_alive());

    // No sweep before the first interval elapses
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(harness.backend.calls(ops::GET_EVENT_CONTEXT), 0);

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(harness.backend.calls(ops::GET_EVENT_CONTEXT), 1);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(harness.backend.calls(ops::GET_EVENT_CONTEXT), 2);

    harness.gateway.stop_keep_alive().await;
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(harness.backend.calls(ops::GET_EVENT_CONTEXT), 2);
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let harness = GatewayTestHarness::logged_in().await;

    harness.gateway.stop_keep_alive().await;
    assert!(harness.gateway.start_keep_alive());
    harness.gateway.stop_keep_alive().await;
    harness.gateway.stop_keep_alive().await;

    assert!(harness.gateway.start_keep_alive());
    harness.gateway.stop_keep_alive().await;
}
