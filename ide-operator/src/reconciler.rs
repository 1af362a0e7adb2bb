//! Drives the Pod and PVC of one workspace toward its declared operation.

use std::time::Duration;

use tracing::{debug, info, instrument};

use crate::{
    cluster::{with_timeout, Cluster, ObjectKey, GET_TIMEOUT},
    config::RuntimeMode,
    crd::{Operation, Phase, Workspace},
    error::ReconcileError,
    provision::{PodProvisioner, PvcProvisioner},
    status::StatusUpdater,
};

/// Delay before retrying a pass whose phase could not be recorded.
pub const STATUS_RETRY_AFTER: Duration = Duration::from_secs(10);

/// What the controller should do with a key after a successful pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Done,
    Requeue(Duration),
}

#[derive(Clone)]
pub struct Reconciler {
    cluster: Cluster,
    pods: PodProvisioner,
    pvcs: PvcProvisioner,
    status: StatusUpdater,
}

impl Reconciler {
    pub fn new(cluster: Cluster, mode: RuntimeMode) -> Self {
        Self {
            pods: PodProvisioner::new(cluster.pods.clone(), mode),
            pvcs: PvcProvisioner::new(cluster.pvcs.clone()),
            status: StatusUpdater::new(cluster.workspaces.clone()),
            cluster,
        }
    }

    #[instrument(skip_all, fields(workspace = %key))]
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Action, ReconcileError> {
        let workspace = with_timeout("get workspace", GET_TIMEOUT, self.cluster.workspaces.get_opt(key))
            .await
            .map_err(|source| ReconcileError::Fetch {
                key: key.clone(),
                source,
            })?;

        let Some(workspace) = workspace else {
            return self.clean_up(key).await;
        };

        match &workspace.spec.operation {
            Some(Operation::Start) => self.start(key, &workspace).await,
            Some(Operation::Stop) => self.stop(key).await,
            Some(Operation::Unknown(raw)) => {
                debug!(operation = %raw, "unrecognized operation, nothing to do");
                Ok(Action::Done)
            }
            None => {
                debug!("no operation set, nothing to do");
                Ok(Action::Done)
            }
        }
    }

    /// The workspace is gone: remove whatever it left behind.
    async fn clean_up(&self, key: &ObjectKey) -> Result<Action, ReconcileError> {
        self.pods.delete(key).await.map_err(|source| ReconcileError::DeletePod {
            key: key.clone(),
            source,
        })?;
        self.pvcs.delete(key).await.map_err(|source| ReconcileError::DeletePvc {
            key: key.clone(),
            source,
        })?;
        info!("workspace deleted, pod and pvc removed");
        Ok(Action::Done)
    }

    async fn start(&self, key: &ObjectKey, workspace: &Workspace) -> Result<Action, ReconcileError> {
        let pvc_missing = !self
            .pvcs
            .exists(key)
            .await
            .map_err(|source| ReconcileError::CreatePvc {
                key: key.clone(),
                source,
            })?;
        if pvc_missing {
            self.pvcs
                .create(workspace)
                .await
                .map_err(|source| ReconcileError::CreatePvc {
                    key: key.clone(),
                    source,
                })?;
        }

        let pod_missing = !self
            .pods
            .exists(key)
            .await
            .map_err(|source| ReconcileError::CreatePod {
                key: key.clone(),
                source,
            })?;
        if pod_missing {
            self.pods
                .create(workspace)
                .await
                .map_err(|source| ReconcileError::CreatePod {
                    key: key.clone(),
                    source,
                })?;
            info!("workspace started");
        }

        Ok(self.record(key, Phase::Running).await)
    }

    /// Stopping removes the Pod only; the PVC keeps the user's files.
    async fn stop(&self, key: &ObjectKey) -> Result<Action, ReconcileError> {
        self.pods.delete(key).await.map_err(|source| ReconcileError::DeletePod {
            key: key.clone(),
            source,
        })?;
        info!("workspace stopped");
        Ok(self.record(key, Phase::Stopped).await)
    }

    /// A failed status write never fails the pass; the key comes back later
    /// so the phase catches up with the children.
    async fn record(&self, key: &ObjectKey, phase: Phase) -> Action {
        if self.status.set_phase(key, phase).await {
            Action::Done
        } else {
            Action::Requeue(STATUS_RETRY_AFTER)
        }
    }
}
