//! The operations remote callers use to manage workspaces.
//!
//! The service only ever writes the `WorkSpace` object; Pods and PVCs are
//! left to the reconciler. Create and start block until the Pod runs or the
//! readiness poller gives up and rolls the workspace back to `Stop`.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::{
    cluster::{with_timeout, Cluster, ObjectKey, ResourceApi, CREATE_TIMEOUT, GET_TIMEOUT, REQUEST_TIMEOUT},
    crd::{Operation, Workspace, WorkspaceSpec},
    error::{
        ClusterError, ServiceError, WORKSPACE_CREATE_FAILED, WORKSPACE_DELETE_FAILED, WORKSPACE_QUERY_FAILED,
        WORKSPACE_START_FAILED,
    },
    messages::{EmptyResponse, PodSpaceStatus, QueryOption, WorkspaceInfo, WorkspaceRunningInfo, POD_EXIST, POD_NOT_EXIST},
    poller::{endpoint, ReadinessPoller},
    status::{retry_on_conflict, ConflictRetry},
};

/// Sets `spec.operation` on the workspace, re-reading it on every conflict.
/// `Ok(false)` when the workspace does not exist.
pub(crate) async fn set_operation(
    api: &dyn ResourceApi<Workspace>,
    retry: ConflictRetry,
    key: &ObjectKey,
    operation: Operation,
) -> Result<bool, ClusterError> {
    retry_on_conflict(retry, move || {
        let operation = operation.clone();
        async move {
            let Some(mut current) = with_timeout("get workspace", GET_TIMEOUT, api.get_opt(key)).await? else {
                return Ok(false);
            };
            current.spec.operation = Some(operation);
            with_timeout("update workspace", REQUEST_TIMEOUT, api.replace(&current)).await?;
            Ok::<_, ClusterError>(true)
        }
    })
    .await
}

/// Desired-state object for a new workspace, set to start right away.
pub fn workspace_from(info: &WorkspaceInfo) -> Workspace {
    let limits = &info.resource_limit;
    Workspace::with_key(
        &info.key(),
        WorkspaceSpec {
            cpu: limits.cpu.clone(),
            memory: limits.memory.clone(),
            storage: limits.storage.clone(),
            hardware: WorkspaceSpec::hardware_label(&limits.cpu, &limits.memory, &limits.storage),
            image: info.image.clone(),
            port: info.port,
            mount_path: info.volume_mount_path.clone(),
            operation: Some(Operation::Start),
        },
    )
}

#[derive(Clone)]
pub struct WorkspaceService {
    workspaces: Arc<dyn ResourceApi<Workspace>>,
    pods: Arc<dyn ResourceApi<Pod>>,
    poller: ReadinessPoller,
    conflict: ConflictRetry,
}

impl WorkspaceService {
    pub fn new(cluster: &Cluster) -> Self {
        Self {
            workspaces: cluster.workspaces.clone(),
            pods: cluster.pods.clone(),
            poller: ReadinessPoller::new(cluster),
            conflict: ConflictRetry::default(),
        }
    }

    pub fn with_poller(mut self, poller: ReadinessPoller) -> Self {
        self.poller = poller;
        self
    }

    #[instrument(skip_all, fields(workspace = %info.key()))]
    pub async fn create_space(
        &self,
        info: &WorkspaceInfo,
        cancel: &CancellationToken,
    ) -> Result<WorkspaceRunningInfo, ServiceError> {
        let key = info.key();
        match with_timeout("get workspace", GET_TIMEOUT, self.workspaces.get_opt(&key)).await {
            Ok(Some(_)) => return Err(ServiceError::AlreadyExists),
            Ok(None) => {}
            Err(e) => {
                error!(error = %e, "failed to look up workspace");
                return Err(ServiceError::Internal(WORKSPACE_CREATE_FAILED));
            }
        }

        let workspace = workspace_from(info);
        match with_timeout("create workspace", CREATE_TIMEOUT, self.workspaces.create(&workspace)).await {
            Ok(_) => info!(hardware = %workspace.spec.hardware, "workspace created"),
            Err(e) if e.is_already_exists() => return Err(ServiceError::AlreadyExists),
            Err(e) => {
                error!(error = %e, "failed to create workspace");
                return Err(ServiceError::Internal(WORKSPACE_CREATE_FAILED));
            }
        }

        self.poller.wait_for_running(&key, info.port, cancel).await
    }

    /// Starts an existing workspace, or creates it when there is none.
    #[instrument(skip_all, fields(workspace = %info.key()))]
    pub async fn start_space(
        &self,
        info: &WorkspaceInfo,
        cancel: &CancellationToken,
    ) -> Result<WorkspaceRunningInfo, ServiceError> {
        let key = info.key();
        let existing = match with_timeout("get workspace", GET_TIMEOUT, self.workspaces.get_opt(&key)).await {
            Ok(Some(workspace)) => workspace,
            Ok(None) => return self.create_space(info, cancel).await,
            Err(e) => {
                error!(error = %e, "failed to look up workspace");
                return Err(ServiceError::Internal(WORKSPACE_START_FAILED));
            }
        };

        match set_operation(self.workspaces.as_ref(), self.conflict, &key, Operation::Start).await {
            Ok(true) => info!("workspace set to start"),
            Ok(false) => return self.create_space(info, cancel).await,
            Err(e) => {
                error!(error = %e, "failed to set workspace to start");
                return Err(ServiceError::Internal(WORKSPACE_START_FAILED));
            }
        }

        self.poller.wait_for_running(&key, existing.spec.port, cancel).await
    }

    #[instrument(skip_all, fields(workspace = %query.key()))]
    pub async fn stop_space(&self, query: &QueryOption) -> Result<EmptyResponse, ServiceError> {
        match set_operation(self.workspaces.as_ref(), self.conflict, &query.key(), Operation::Stop).await {
            Ok(true) => {
                info!("workspace set to stop");
                Ok(EmptyResponse {})
            }
            Ok(false) => Err(ServiceError::NotFound),
            Err(e) => {
                error!(error = %e, "failed to set workspace to stop");
                Err(ServiceError::Unknown(e.to_string()))
            }
        }
    }

    /// Deleting a workspace that is already gone succeeds. The reconciler
    /// removes the Pod and PVC once it sees the workspace disappear.
    #[instrument(skip_all, fields(workspace = %query.key()))]
    pub async fn delete_space(&self, query: &QueryOption) -> Result<EmptyResponse, ServiceError> {
        let key = query.key();
        match with_timeout("delete workspace", REQUEST_TIMEOUT, self.workspaces.delete(&key)).await {
            Ok(()) => {
                info!("workspace deleted");
                Ok(EmptyResponse {})
            }
            Err(e) if e.is_not_found() => Ok(EmptyResponse {}),
            Err(e) => {
                error!(error = %e, "failed to delete workspace");
                Err(ServiceError::Internal(WORKSPACE_DELETE_FAILED))
            }
        }
    }

    /// Pod view of an existing workspace. A stopped workspace has no Pod
    /// and reports [`POD_NOT_EXIST`]; an unknown workspace is `NotFound`.
    #[instrument(skip_all, fields(workspace = %query.key()))]
    pub async fn get_pod_space_status(&self, query: &QueryOption) -> Result<PodSpaceStatus, ServiceError> {
        let key = query.key();
        match with_timeout("get workspace", GET_TIMEOUT, self.workspaces.get_opt(&key)).await {
            Ok(Some(_)) => {}
            Ok(None) => return Err(ServiceError::NotFound),
            Err(e) => {
                error!(error = %e, "failed to look up workspace");
                return Err(ServiceError::Internal(WORKSPACE_QUERY_FAILED));
            }
        }

        Ok(match self.read_pod(&key).await? {
            Some(pod) => {
                let status = pod.status.unwrap_or_default();
                PodSpaceStatus {
                    status: POD_EXIST,
                    phase: status.phase.unwrap_or_default(),
                    message: status.message.unwrap_or_default(),
                }
            }
            None => PodSpaceStatus {
                status: POD_NOT_EXIST,
                ..Default::default()
            },
        })
    }

    #[instrument(skip_all, fields(workspace = %query.key()))]
    pub async fn get_pod_space_info(&self, query: &QueryOption) -> Result<WorkspaceRunningInfo, ServiceError> {
        match self.read_pod(&query.key()).await? {
            Some(pod) => Ok(endpoint(&pod, 0)),
            None => Err(ServiceError::NotFound),
        }
    }

    async fn read_pod(&self, key: &ObjectKey) -> Result<Option<Pod>, ServiceError> {
        with_timeout("get pod", GET_TIMEOUT, self.pods.get_opt(key))
            .await
            .map_err(|e| {
                error!(error = %e, "failed to read pod");
                ServiceError::Internal(WORKSPACE_QUERY_FAILED)
            })
    }
}
