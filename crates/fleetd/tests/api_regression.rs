//! API regression tests.
//!
//! Drives the full router over an in-memory store: cluster and node
//! admission, the virtual-IP rule, bootstrap election, onboarding, and the
//! status and capability views.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use fleet_api::build_router;
use fleet_cluster::Coordinator;
use fleet_core::FeatureCatalog;
use fleet_state::StateStore;

fn test_router() -> Router {
    let store = StateStore::open_in_memory().unwrap();
    let coordinator = Coordinator::new(store, Arc::new(FeatureCatalog::standard()));
    build_router(Arc::new(coordinator))
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(v) => {
            req = req.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&v).unwrap())
        }
        None => Body::empty(),
    };
    let resp = router.clone().oneshot(req.body(body).unwrap()).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn create_cluster(router: &Router, id: &str, virtual_ip: Option<&str>) {
    let (status, _) = send(
        router,
        "POST",
        "/api/v1/clusters",
        Some(json!({
            "id": id,
            "tenantId": "tenant-a",
            "name": id,
            "virtualIp": virtual_ip,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

async fn create_node(router: &Router, cluster_id: &str, serial: &str, master: bool) -> (StatusCode, Value) {
    send(
        router,
        "POST",
        "/api/v1/nodes",
        Some(json!({
            "clusterId": cluster_id,
            "serialNumber": serial,
            "ipAddress": "192.168.1.20",
            "role": { "master": master, "worker": !master },
        })),
    )
    .await
}

#[tokio::test]
async fn unknown_cluster_is_not_found() {
    let router = test_router();
    let (status, body) = send(&router, "GET", "/api/v1/clusters/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(body["retryable"], false);
}

#[tokio::test]
async fn first_node_takes_cluster_id() {
    let router = test_router();
    create_cluster(&router, "site-1", None).await;

    let (status, body) = create_node(&router, "site-1", "SN-100", true).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["id"], "site-1");

    let (status, body) = send(&router, "GET", "/api/v1/nodes/site-1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["serialNumber"], "SN-100");
}

#[tokio::test]
async fn virtual_ip_gates_second_node() {
    let router = test_router();
    create_cluster(&router, "site-2", None).await;
    create_node(&router, "site-2", "SN-200", true).await;

    let (status, body) = create_node(&router, "site-2", "SN-201", true).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("Virtual IP"));

    let (status, _) = send(
        &router,
        "PUT",
        "/api/v1/clusters/site-2/virtual-ip",
        Some(json!({ "virtualIp": "10.2.0.100" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = create_node(&router, "site-2", "SN-201", true).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = send(
        &router,
        "PUT",
        "/api/v1/clusters/site-2/virtual-ip",
        Some(json!({ "virtualIp": null })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn duplicate_serial_conflicts() {
    let router = test_router();
    create_cluster(&router, "site-3", Some("10.3.0.100")).await;
    create_node(&router, "site-3", "SN-300", true).await;

    let (status, _) = create_node(&router, "site-3", "sn-300", true).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn election_and_onboarding_flow() {
    let router = test_router();
    create_cluster(&router, "site-4", Some("10.4.0.100")).await;
    let (_, master) = create_node(&router, "site-4", "M-400", true).await;
    let master_id = master["data"]["id"].as_str().unwrap().to_string();
    create_node(&router, "site-4", "W-400", false).await;

    let identify = |serial: &str| json!({ "serialNumber": serial });

    let (status, body) = send(&router, "POST", "/api/v1/nodes/identify", Some(identify("W-400"))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["retryable"], true);

    let (status, body) = send(&router, "POST", "/api/v1/nodes/identify", Some(identify("M-400"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["node"]["isBootstrapMaster"], true);

    let onboard = json!({
        "nodeId": master_id,
        "sshPublicKey": "ssh-ed25519 AAAAsite4",
        "nodeVersion": "v1.15.0",
    });
    let (status, _) = send(&router, "POST", "/api/v1/nodes/onboarded", Some(onboard.clone())).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&router, "POST", "/api/v1/nodes/onboarded", Some(onboard)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(&router, "POST", "/api/v1/nodes/identify", Some(identify("w-400"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["data"]["bootstrapMasterSshPublicKey"],
        "ssh-ed25519 AAAAsite4"
    );
}

#[tokio::test]
async fn malformed_onboarding_version_is_rejected() {
    let router = test_router();
    create_cluster(&router, "site-5", None).await;
    create_node(&router, "site-5", "SN-500", true).await;

    let (status, _) = send(
        &router,
        "POST",
        "/api/v1/nodes/onboarded",
        Some(json!({
            "nodeId": "site-5",
            "sshPublicKey": "ssh-rsa AAAA",
            "nodeVersion": "1.15",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn features_follow_reported_version() {
    let router = test_router();
    create_cluster(&router, "site-6", None).await;
    create_node(&router, "site-6", "SN-600", true).await;

    let (status, body) = send(&router, "GET", "/api/v1/nodes/site-6/features", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"].is_null());

    let (status, _) = send(
        &router,
        "PUT",
        "/api/v1/nodes/site-6/info",
        Some(json!({ "nodeVersion": "v1.15.0", "healthBits": { "Ready": true } })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(&router, "GET", "/api/v1/nodes/site-6/features", None).await;
    assert_eq!(body["data"]["multiNodeAware"], true);

    let (_, body) = send(&router, "GET", "/api/v1/features?version=v1.0.0", None).await;
    assert_eq!(body["data"]["multiNodeAware"], false);
}

#[tokio::test]
async fn status_reflects_onboarding_and_telemetry() {
    let router = test_router();
    create_cluster(&router, "site-7", None).await;
    create_node(&router, "site-7", "SN-700", true).await;

    let (status, body) = send(&router, "GET", "/api/v1/nodes/site-7/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["connected"], false);
    assert_eq!(body["data"]["onboarded"], false);

    send(
        &router,
        "POST",
        "/api/v1/nodes/onboarded",
        Some(json!({
            "nodeId": "site-7",
            "sshPublicKey": "ssh-rsa CCCC",
            "nodeVersion": "v1.15.0",
        })),
    )
    .await;

    let (_, body) = send(&router, "GET", "/api/v1/clusters/site-7/status", None).await;
    assert_eq!(body["data"]["nodes"][0]["status"]["onboarded"], true);
    assert_eq!(body["data"]["nodes"][0]["status"]["connected"], true);
}

#[tokio::test]
async fn upgrade_must_move_forward() {
    let router = test_router();
    create_cluster(&router, "site-8", None).await;
    create_node(&router, "site-8", "SN-800", true).await;
    send(
        &router,
        "PUT",
        "/api/v1/nodes/site-8/info",
        Some(json!({ "nodeVersion": "v1.15.0" })),
    )
    .await;

    let (status, _) = send(
        &router,
        "POST",
        "/api/v1/upgrades/eligibility",
        Some(json!({ "clusterIds": ["site-8"], "targetVersion": "v1.14.2" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &router,
        "POST",
        "/api/v1/upgrades/eligibility",
        Some(json!({ "clusterIds": ["site-8"], "targetVersion": "v1.16.0" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], "v1.16.0");
}

#[tokio::test]
async fn delete_node_then_cluster() {
    let router = test_router();
    create_cluster(&router, "site-9", None).await;
    create_node(&router, "site-9", "SN-900", true).await;

    let (status, body) = send(&router, "DELETE", "/api/v1/nodes/site-9", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["wasOnboarded"], false);

    let (status, _) = send(&router, "DELETE", "/api/v1/clusters/site-9", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&router, "DELETE", "/api/v1/clusters/site-9", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn wire_fields_are_camel_case() {
    let router = test_router();
    create_cluster(&router, "site-10", None).await;
    create_node(&router, "site-10", "SN-1000", true).await;

    let (_, body) = send(&router, "GET", "/api/v1/nodes/site-10", None).await;
    assert_eq!(body["data"]["serialNumber"], "SN-1000");
    assert_eq!(body["data"]["clusterId"], "site-10");
    assert_eq!(body["data"]["isBootstrapMaster"], false);
    assert!(body["data"].get("serial_number").is_none());

    let (status, body) = send(
        &router,
        "POST",
        "/api/v1/nodes/onboarded",
        Some(json!({ "nodeId": "site-10", "sshPublicKey": " ", "nodeVersion": "v1.15.0" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("sshPublicKey"));

    let (_, body) = send(&router, "GET", "/api/v1/clusters/site-10/status", None).await;
    assert_eq!(body["data"]["clusterId"], "site-10");
    assert_eq!(body["data"]["nodes"][0]["nodeId"], "site-10");
}

#[tokio::test]
async fn node_info_report_returns_status() {
    let router = test_router();
    create_cluster(&router, "site-11", None).await;
    create_node(&router, "site-11", "SN-1100", true).await;

    let (status, body) = send(
        &router,
        "PUT",
        "/api/v1/nodes/site-11/info",
        Some(json!({ "nodeVersion": "v1.15.0", "healthBits": { "Ready": false } })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["nodeVersion"], "v1.15.0");
    assert_eq!(body["data"]["healthBits"]["Ready"], false);
    assert_eq!(body["data"]["status"]["connected"], true);
    assert_eq!(body["data"]["status"]["healthy"], false);
    assert_eq!(body["data"]["status"]["healthStatus"], "unhealthy");
}
