//! End-to-end workspace lifecycle against the in-memory cluster
//!
//! Runs the controller the way the binary does (workers plus periodic
//! resync) next to a fake kubelet that marks every Pod as running, and
//! drives it through the workspace service.

use std::{sync::Arc, time::Duration};

use ide_operator::{
    cluster::ResourceApi,
    error::{ServiceError, WORKSPACE_START_FAILED},
    memory::{MemoryApi, MemoryCluster, Verb},
    messages::{QueryOption, ResourceLimit, WorkspaceInfo, POD_NOT_EXIST},
    Controller, ObjectKey, Operation, OperatorConfig, Phase, RuntimeMode, WorkspaceService,
};
use k8s_openapi::api::core::v1::{Pod, PodStatus};
use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;

const TICK: Duration = Duration::from_millis(100);

fn info(name: &str) -> WorkspaceInfo {
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

fn query(name: &str) -> QueryOption {
    QueryOption {
        name: name.to_string(),
        namespace: "team-a".to_string(),
    }
}

fn start_controller(fake: &MemoryCluster, cancel: &CancellationToken) -> JoinHandle<()> {
    let config = OperatorConfig {
        mode: RuntimeMode::Release,
        concurrency: 8,
        resync_period: Duration::from_millis(200),
    };
    let controller = Controller::new(fake.cluster(), config);
    let cancel = cancel.clone();
    tokio::spawn(async move { controller.run(cancel).await })
}

/// Marks every Pod as running on `node-1`, the way a kubelet eventually would.
fn start_kubelet(pods: Arc<MemoryApi<Pod>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(TICK).await;
            let keys = pods.list_keys().await.unwrap_or_default();
            for key in keys {
                pods.modify(&key, |pod| {
                    pod.spec.get_or_insert_with(Default::default).node_name = Some("node-1".to_string());
                    pod.status = Some(PodStatus {
                        phase: Some("Running".to_string()),
                        pod_ip: Some("10.0.0.12".to_string()),
                        ..Default::default()
                    });
                });
            }
        }
    })
}

async fn settle() {
    tokio::time::sleep(Duration::from_secs(1)).await;
}

#[tokio::test(start_paused = true)]
async fn test_create_space_runs_workspace() {
    let fake = MemoryCluster::new();
    let cancel = CancellationToken::new();
    let controller = start_controller(&fake, &cancel);
    start_kubelet(fake.pods.clone());
    let service = WorkspaceService::new(&fake.cluster());
    let key = ObjectKey::new("team-a", "dev-1");

    let running = service.create_space(&info("dev-1"), &CancellationToken::new()).await.unwrap();

    assert_eq!(running.node_name, "node-1");
    assert_eq!(running.ip, "10.0.0.12");
    assert_eq!(running.port, 8080);
    assert!(fake.pvcs.contains(&key));

    let workspace = fake.workspaces.snapshot(&key).unwrap();
    assert_eq!(workspace.spec.hardware, "2C4G10G");
    assert_eq!(workspace.phase(), Some(Phase::Running));

    // creating it again is refused
    let err = service.create_space(&info("dev-1"), &CancellationToken::new()).await.unwrap_err();
    assert_eq!(err, ServiceError::AlreadyExists);

    cancel.cancel();
    controller.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stop_keeps_volume_and_start_reuses_it() {
    let fake = MemoryCluster::new();
    let cancel = CancellationToken::new();
    start_controller(&fake, &cancel);
    start_kubelet(fake.pods.clone());
    let service = WorkspaceService::new(&fake.cluster());
    let key = ObjectKey::new("team-a", "dev-1");

    service.create_space(&info("dev-1"), &CancellationToken::new()).await.unwrap();
    service.stop_space(&query("dev-1")).await.unwrap();
    settle().await;

    assert!(!fake.pods.contains(&key));
    assert!(fake.pvcs.contains(&key));
    assert_eq!(fake.workspaces.snapshot(&key).unwrap().phase(), Some(Phase::Stopped));
    assert_eq!(
        service.get_pod_space_status(&query("dev-1")).await.unwrap().status,
        POD_NOT_EXIST
    );

    let running = service.start_space(&info("dev-1"), &CancellationToken::new()).await.unwrap();
    assert_eq!(running.ip, "10.0.0.12");
    assert_eq!(fake.pvcs.calls(Verb::Create), 1);
    assert_eq!(fake.pods.calls(Verb::Create), 2);

    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_delete_space_cascades_to_children() {
    let fake = MemoryCluster::new();
    let cancel = CancellationToken::new();
    start_controller(&fake, &cancel);
    start_kubelet(fake.pods.clone());
    let service = WorkspaceService::new(&fake.cluster());

    service.create_space(&info("dev-1"), &CancellationToken::new()).await.unwrap();
    service.delete_space(&query("dev-1")).await.unwrap();
    settle().await;

    assert!(fake.workspaces.is_empty());
    assert!(fake.pods.is_empty());
    assert!(fake.pvcs.is_empty());

    // deleting again is still fine
    service.delete_space(&query("dev-1")).await.unwrap();
    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_unready_workspace_is_rolled_back() {
    let fake = MemoryCluster::new();
    let cancel = CancellationToken::new();
    start_controller(&fake, &cancel);
    // no kubelet: the pod is created but never runs
    let service = WorkspaceService::new(&fake.cluster());
    let key = ObjectKey::new("team-a", "dev-1");
    let started = Instant::now();

    let err = service.create_space(&info("dev-1"), &CancellationToken::new()).await.unwrap_err();

    assert_eq!(err, ServiceError::Internal(WORKSPACE_START_FAILED));
    assert!(started.elapsed() >= Duration::from_secs(29));
    settle().await;

    let workspace = fake.workspaces.snapshot(&key).unwrap();
    assert_eq!(workspace.spec.operation, Some(Operation::Stop));
    assert_eq!(workspace.phase(), Some(Phase::Stopped));
    assert!(!fake.pods.contains(&key));
    assert!(fake.pvcs.contains(&key));
    cancel.cancel();
}
