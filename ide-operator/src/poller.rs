//! Synchronous "is it up yet" wait used by the service after it asks for a
//! workspace to start. Talks to the cluster directly, not through the
//! reconciler's queue.

use std::{sync::Arc, time::Duration};

use k8s_openapi::api::core::v1::Pod;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    cluster::{with_timeout, Cluster, ObjectKey, ResourceApi, GET_TIMEOUT},
    crd::{Operation, Workspace},
    error::{ServiceError, WORKSPACE_START_FAILED},
    messages::WorkspaceRunningInfo,
    service::set_operation,
    status::ConflictRetry,
};

/// Fixed wait schedule: attempt `n` sleeps `delays[n] * unit` before
/// looking at the Pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delays: Vec<u32>,
    pub unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delays: vec![1, 3, 5, 8, 12],
            unit: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> usize {
        self.delays.len()
    }

    pub fn delay(&self, attempt: usize) -> Duration {
        self.unit * self.delays.get(attempt).copied().unwrap_or_default()
    }

    pub fn total(&self) -> Duration {
        (0..self.max_attempts()).map(|attempt| self.delay(attempt)).sum()
    }
}

pub fn is_running(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.phase.as_deref())
        == Some("Running")
}

/// Node, IP and port of `pod`. The port is the first one the first container
/// declares, or `spec_port` when it declares none.
pub fn endpoint(pod: &Pod, spec_port: i32) -> WorkspaceRunningInfo {
    let spec = pod.spec.as_ref();
    let port = spec
        .and_then(|spec| spec.containers.first())
        .and_then(|container| container.ports.as_ref())
        .and_then(|ports| ports.first())
        .map(|port| port.container_port)
        .unwrap_or(spec_port);

    WorkspaceRunningInfo {
        node_name: spec.and_then(|spec| spec.node_name.clone()).unwrap_or_default(),
        ip: pod
            .status
            .as_ref()
            .and_then(|status| status.pod_ip.clone())
            .unwrap_or_default(),
        port,
    }
}

#[derive(Clone)]
pub struct ReadinessPoller {
    pods: Arc<dyn ResourceApi<Pod>>,
    workspaces: Arc<dyn ResourceApi<Workspace>>,
    policy: RetryPolicy,
    conflict: ConflictRetry,
}

impl ReadinessPoller {
    pub fn new(cluster: &Cluster) -> Self {
        Self {
            pods: cluster.pods.clone(),
            workspaces: cluster.workspaces.clone(),
            policy: RetryPolicy::default(),
            conflict: ConflictRetry::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Waits for the workspace Pod to reach `Running`. When the schedule runs
    /// out or `cancel` fires, the workspace is switched back to `Stop` and the
    /// start is reported as failed.
    #[instrument(skip_all, fields(workspace = %key))]
    pub async fn wait_for_running(
        &self,
        key: &ObjectKey,
        spec_port: i32,
        cancel: &CancellationToken,
    ) -> Result<WorkspaceRunningInfo, ServiceError> {
        for attempt in 0..self.policy.max_attempts() {
            let cancelled = tokio::select! {
                biased;
                _ = cancel.cancelled() => true,
                _ = tokio::time::sleep(self.policy.delay(attempt)) => false,
            };
            if cancelled {
                info!(attempt, "readiness wait cancelled");
                break;
            }

            match with_timeout("get pod", GET_TIMEOUT, self.pods.get(key)).await {
                Ok(pod) if is_running(&pod) => {
                    let info = endpoint(&pod, spec_port);
                    info!(attempt, node = %info.node_name, ip = %info.ip, "workspace running");
                    return Ok(info);
                }
                Ok(_) => debug!(attempt, "pod not running yet"),
                Err(e) if e.is_not_found() => debug!(attempt, "pod not created yet"),
                Err(e) => warn!(attempt, error = %e, "failed to read pod"),
            }
        }

        self.roll_back(key).await;
        Err(ServiceError::Internal(WORKSPACE_START_FAILED))
    }

    async fn roll_back(&self, key: &ObjectKey) {
        match set_operation(self.workspaces.as_ref(), self.conflict, key, Operation::Stop).await {
            Ok(true) => warn!("workspace did not become ready, stopped"),
            Ok(false) => debug!("workspace gone, nothing to roll back"),
            Err(e) => error!(error = %e, "rollback to Stop failed"),
        }
    }
}
