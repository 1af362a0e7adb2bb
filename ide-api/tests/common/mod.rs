//! Common test utilities and helpers for ide-api tests

#![allow(dead_code)]

use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, Response},
    Router,
};
use ide_api::{create_app, AppState};
use ide_operator::{
    memory::MemoryCluster,
    messages::{QueryOption, ResourceLimit, WorkspaceInfo},
    ReadinessPoller, RetryPolicy, WorkspaceService,
};
use k8s_openapi::api::core::v1::{Container, ContainerPort, Pod, PodSpec, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tower::ServiceExt;

/// App over an empty in-memory cluster. Readiness polling is shortened to
/// two 1ms attempts so failing starts return quickly.
pub fn create_test_app() -> (MemoryCluster, Router) {
    let fake = MemoryCluster::new();
    let cluster = fake.cluster();
    let poller = ReadinessPoller::new(&cluster).with_policy(RetryPolicy {
        delays: vec![1, 1],
        unit: Duration::from_millis(1),
    });
    let service = WorkspaceService::new(&cluster).with_poller(poller);
    (fake, create_app(AppState::with_service(service)))
}

pub fn workspace_info(name: &str) -> WorkspaceInfo {
    WorkspaceInfo {
        name: name.to_string(),
        namespace: "team-a".to_string(),
        image: "codercom/code-server:latest".to_string(),
        port: 8080,
        volume_mount_path: "/home/coder".to_string(),
        resource_limit: ResourceLimit {
            cpu: "2".to_string(),
            memory: "4Gi".to_string(),
            storage: "10Gi".to_string(),
        },
    }
}

pub fn query(name: &str) -> QueryOption {
    QueryOption {
        name: name.to_string(),
        namespace: "team-a".to_string(),
    }
}

pub fn running_pod(name: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("team-a".to_string()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_name: Some("node-1".to_string()),
            containers: vec![Container {
                name: name.to_string(),
                ports: Some(vec![ContainerPort {
                    container_port: 8080,
                    ..Default::default()
                }]),
                ..Default::default()
            }],
            ..Default::default()
        }),
        status: Some(PodStatus {
            phase: Some("Running".to_string()),
            pod_ip: Some("10.0.0.12".to_string()),
            ..Default::default()
        }),
    }
}

/// POST `body` as JSON to a service method.
pub async fn call<B: serde::Serialize>(app: Router, method: &str, body: &B) -> Response<Body> {
    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/v1/CloudIdeService/{method}"))
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(body).unwrap()))
        .unwrap();

    app.oneshot(request).await.unwrap()
}

pub async fn extract_json_body<T>(response: axum::response::Response) -> T
where
    T: serde::de::DeserializeOwned,
{
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read response body");

    serde_json::from_slice(&body).expect("Failed to deserialize JSON")
}
