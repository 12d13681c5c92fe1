//! Facade operation tests
//!
//! Scripts, cached lookups, file descriptors and pool statistics.

use pretty_assertions::assert_eq;
use serde_json::json;
use sessionmux_core::backend::ops;
use sessionmux_core::{FailureKind, GatewayError, RemoteDescriptor, ServiceKind};
use sessionmux_gateway::classifier::STORAGE_BUSY_MESSAGE;
use sessionmux_gateway::facade::{SCRIPT_FAILED_MESSAGE, SCRIPT_NOT_FOUND_MESSAGE};
use tests::fixtures::context;
use tests::mocks::{failure, SERVER_VERSION};
use tests::GatewayTestHarness;

// ============================================================================
// Scripts
// ============================================================================

#[tokio::test]
async fn test_run_script_returns_job() {
    let harness = GatewayTestHarness::logged_in().await;

    let job = harness
        .gateway
        .run_script(&context(1), "Batch_Image_Export", json!({ "ids": [1, 2] }))
        .await
        .unwrap();

    assert_eq!(job, Some(json!({ "job_id": 7, "status": "queued" })));
    assert_eq!(harness.backend.calls(ops::GET_SCRIPT_ID), 1);
    assert_eq!(harness.backend.calls(ops::RUN_SCRIPT), 1);
}

#[tokio::test]
async fn test_unknown_script_is_process_error() {
    let harness = GatewayTestHarness::logged_in().await;
    harness.backend.reply(ops::GET_SCRIPT_ID, json!(-1));

    let err = harness
        .gateway
        .run_script(&context(1), "Missing_Script", json!({}))
        .await
        .unwrap_err();

    match err {
        GatewayError::Process { job, message, .. } => {
            assert_eq!(job, "Missing_Script");
            assert_eq!(message, SCRIPT_NOT_FOUND_MESSAGE);
        }
        other => panic!("Expected Process error, got {:?}", other),
    }
    assert_eq!(harness.backend.calls(ops::RUN_SCRIPT), 0);
}

#[tokio::test]
async fn test_failed_script_launch_is_process_error() {
    let harness = GatewayTestHarness::logged_in().await;
    harness
        .backend
        .fail_invoke(ops::RUN_SCRIPT, failure(FailureKind::ServerError));

    let err = harness
        .gateway
        .run_script(&context(1), "Batch_Image_Export", json!({}))
        .await
        .unwrap_err();

    assert_eq!(err.kind_name(), "process");
    assert_eq!(err.message(), SCRIPT_FAILED_MESSAGE);
    assert_eq!(
        err.remote_cause().map(|f| f.kind.clone()),
        Some(FailureKind::ServerError)
    );
}

// ============================================================================
// Lookups
// ============================================================================

#[tokio::test]
async fn test_server_version_is_cached() {
    let harness = GatewayTestHarness::logged_in().await;
    // Login already asked once
    assert_eq!(harness.backend.calls(ops::GET_VERSION), 1);

    let version = harness.gateway.server_version(&context(1)).await.unwrap();

    assert_eq!(version.as_deref(), Some(SERVER_VERSION));
    assert_eq!(harness.backend.calls(ops::GET_VERSION), 1);
}

#[tokio::test]
async fn test_lookups_refetched_after_relogin() {
    let harness = GatewayTestHarness::logged_in().await;
    harness.gateway.logout().await;

    harness.login(&[context(1)]).await;

    assert_eq!(harness.backend.calls(ops::GET_VERSION), 2);
}

#[tokio::test]
async fn test_system_groups_keep_only_builtin_groups() {
    let harness = GatewayTestHarness::logged_in().await;
    harness.backend.reply(
        ops::LIST_SYSTEM_GROUPS,
        json!([
            { "id": 0, "name": "system" },
            { "id": 1, "name": "user" },
            { "id": 2, "name": "guest" },
            { "id": 53, "name": "lab" },
        ]),
    );

    let groups = harness.gateway.system_groups(&context(1)).await.unwrap().unwrap();
    let again = harness.gateway.system_groups(&context(1)).await.unwrap().unwrap();

    let names: Vec<_> = groups.iter().map(|g| g.name.as_str()).collect();
    assert_eq!(names, vec!["system", "user", "guest"]);
    assert!(groups[0].is_system());
    assert_eq!(groups, again);
    assert_eq!(harness.backend.calls(ops::LIST_SYSTEM_GROUPS), 1);
}

#[tokio::test]
async fn test_enumerations_cached_per_kind() {
    let harness = GatewayTestHarness::logged_in().await;

    let pixel_types = harness
        .gateway
        .enumerations(&context(1), "PixelsType")
        .await
        .unwrap()
        .unwrap();
    harness
        .gateway
        .enumerations(&context(1), "PixelsType")
        .await
        .unwrap();
    harness
        .gateway
        .enumerations(&context(1), "DimensionOrder")
        .await
        .unwrap();

    assert_eq!(pixel_types, vec![json!("uint8"), json!("uint16"), json!("float")]);
    assert_eq!(harness.backend.calls(ops::GET_ENUMERATIONS), 2);
}

#[tokio::test]
async fn test_unexpected_reply_is_access_error() {
    let harness = GatewayTestHarness::logged_in().await;
    harness.backend.reply(ops::GET_ENUMERATIONS, json!({ "not": "a list" }));

    let err = harness
        .gateway
        .enumerations(&context(1), "PixelsType")
        .await
        .unwrap_err();

    assert!(err.is_access());
    assert!(harness.pool().lookups().enumerations("PixelsType").is_none());
}

// ============================================================================
// Files and status
// ============================================================================

#[tokio::test]
async fn test_file_descriptor_lookup() {
    let harness = GatewayTestHarness::logged_in().await;
    harness.backend.put_file(21, vec![0u8; 40]);

    let descriptor = harness
        .gateway
        .file_descriptor(&context(1), 21)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(descriptor, RemoteDescriptor::new(21, "file-21", 40));

    let err = harness.gateway.file_descriptor(&context(1), 22).await.unwrap_err();
    assert!(err.is_access());
}

#[tokio::test]
async fn test_busy_storage_surfaces_backoff() {
    let harness = GatewayTestHarness::logged_in().await;
    harness
        .backend
        .fail_invoke("getPlane", failure(FailureKind::LockTimeout { backoff_ms: 250 }));

    let err = harness
        .gateway
        .invoke(&context(1), ServiceKind::Pixels, "getPlane", json!({}))
        .await
        .unwrap_err();

    assert_eq!(err.message(), STORAGE_BUSY_MESSAGE);
    assert_eq!(err.backoff(), Some(std::time::Duration::from_millis(250)));
}

#[tokio::test]
async fn test_stats_reflect_pool_state() {
    let harness = GatewayTestHarness::new();
    harness.login(&[context(1), context(2)]).await;
    harness.gateway.rendering_engine(&context(2), 4).await.unwrap();

    let stats = harness.gateway.stats().await;

    assert!(stats.connected);
    assert!(!stats.reconnecting);
    assert_eq!(stats.total_connectors, 2);
    assert_eq!(stats.active_connectors, 2);
    assert_eq!(stats.stateful_handles, 1);
    assert_eq!(stats.rendering_engines, 1);
    assert!(harness.gateway.is_server_running(&context(1)).await);
}
