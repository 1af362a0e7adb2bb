//! Best-effort writes of `status.phase`.

use std::{future::Future, sync::Arc, time::Duration};

use tracing::{debug, warn};

use crate::{
    cluster::{with_timeout, ObjectKey, ResourceApi, GET_TIMEOUT},
    crd::{Phase, Workspace, WorkspaceStatus},
    error::ClusterError,
};

/// How many times a write that lost an optimistic-concurrency race is
/// attempted, and how long to wait between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictRetry {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for ConflictRetry {
    fn default() -> Self {
        Self {
            attempts: 5,
            interval: Duration::from_millis(10),
        }
    }
}

/// Runs `op` until it succeeds, fails with something other than a conflict,
/// or the attempts run out. `op` must re-read the object it writes.
pub async fn retry_on_conflict<T, F, Fut>(retry: ConflictRetry, mut op: F) -> Result<T, ClusterError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClusterError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(e) if e.is_conflict() && attempt < retry.attempts => {
                debug!(attempt, error = %e, "write conflicted, retrying");
                attempt += 1;
                tokio::time::sleep(retry.interval).await;
            }
            result => return result,
        }
    }
}

#[derive(Clone)]
pub struct StatusUpdater {
    api: Arc<dyn ResourceApi<Workspace>>,
    retry: ConflictRetry,
}

impl StatusUpdater {
    pub fn new(api: Arc<dyn ResourceApi<Workspace>>) -> Self {
        Self::with_retry(api, ConflictRetry::default())
    }

    pub fn with_retry(api: Arc<dyn ResourceApi<Workspace>>, retry: ConflictRetry) -> Self {
        Self { api, retry }
    }

    /// Records `phase` on the workspace. Returns whether it was persisted;
    /// failures are logged and never propagated. A workspace that no longer
    /// exists has nothing to record and returns `false`.
    pub async fn set_phase(&self, key: &ObjectKey, phase: Phase) -> bool {
        let api = &self.api;
        let result = retry_on_conflict(self.retry, move || async move {
            let Some(mut current) = with_timeout("get workspace", GET_TIMEOUT, api.get_opt(key)).await? else {
                return Ok(false);
            };
            if current.phase() == Some(phase) {
                return Ok(true);
            }
            current.status = Some(WorkspaceStatus { phase: Some(phase) });
            with_timeout("update workspace status", GET_TIMEOUT, api.replace_status(&current)).await?;
            Ok::<_, ClusterError>(true)
        })
        .await;

        match result {
            Ok(persisted) => persisted,
            Err(e) => {
                warn!(workspace = %key, %phase, error = %e, "status_update_failed");
                false
            }
        }
    }
}
