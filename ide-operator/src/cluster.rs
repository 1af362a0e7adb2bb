//! Narrow view of the cluster API used by the operator.
//!
//! Everything that talks to Kubernetes goes through [`ResourceApi`], keyed by
//! [`ObjectKey`]. Errors are classified once, here, into [`ClusterError`] so
//! the callers can match on not-found / already-exists / conflict without
//! inspecting HTTP status codes.

use std::{fmt, future::Future, marker::PhantomData, sync::Arc, time::Duration};

use async_trait::async_trait;
use k8s_openapi::{
    api::core::v1::{PersistentVolumeClaim, Pod},
    NamespaceResourceScope,
};
use kube::{
    api::{DeleteParams, ListParams, PostParams},
    Api, Client, Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};

use crate::{crd::Workspace, error::ClusterError};

pub const CREATE_TIMEOUT: Duration = Duration::from_secs(30);
pub const POD_DELETE_TIMEOUT: Duration = Duration::from_secs(35);
pub const PVC_DELETE_TIMEOUT: Duration = Duration::from_secs(1);
/// Bound on workspace writes made on behalf of a remote caller.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Bound on reads, status writes and lists.
pub const GET_TIMEOUT: Duration = Duration::from_secs(10);

/// Namespace + name. The same key addresses a Workspace, its Pod and its PVC.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn of<K: Resource>(obj: &K) -> Self {
        Self::new(obj.namespace().unwrap_or_default(), obj.name_any())
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Resource kinds the operator reads and writes.
pub trait ManagedResource:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + fmt::Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    const KIND: &'static str;

    /// Copy only the status stanza, as a write to the status subresource does.
    fn copy_status_from(&mut self, other: &Self);
}

impl ManagedResource for Workspace {
    const KIND: &'static str = "WorkSpace";

    fn copy_status_from(&mut self, other: &Self) {
        self.status = other.status.clone();
    }
}

impl ManagedResource for Pod {
    const KIND: &'static str = "Pod";

    fn copy_status_from(&mut self, other: &Self) {
        self.status = other.status.clone();
    }
}

impl ManagedResource for PersistentVolumeClaim {
    const KIND: &'static str = "PersistentVolumeClaim";

    fn copy_status_from(&mut self, other: &Self) {
        self.status = other.status.clone();
    }
}

/// CRUD on one namespaced resource kind.
#[async_trait]
pub trait ResourceApi<K: Send + Sync + 'static>: Send + Sync {
    async fn get(&self, key: &ObjectKey) -> Result<K, ClusterError>;

    async fn create(&self, obj: &K) -> Result<K, ClusterError>;

    /// Full update, guarded by the object's resource version.
    async fn replace(&self, obj: &K) -> Result<K, ClusterError>;

    /// Update of the status subresource, guarded by the resource version.
    async fn replace_status(&self, obj: &K) -> Result<K, ClusterError>;

    async fn delete(&self, key: &ObjectKey) -> Result<(), ClusterError>;

    /// Keys of every object of this kind in all namespaces.
    async fn list_keys(&self) -> Result<Vec<ObjectKey>, ClusterError>;

    /// `get` with not-found mapped to `None`.
    async fn get_opt(&self, key: &ObjectKey) -> Result<Option<K>, ClusterError> {
        match self.get(key).await {
            Ok(obj) => Ok(Some(obj)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Bound a cluster call so it can never block a worker indefinitely.
pub async fn with_timeout<T, F>(operation: &'static str, after: Duration, fut: F) -> Result<T, ClusterError>
where
    F: Future<Output = Result<T, ClusterError>>,
{
    tokio::time::timeout(after, fut)
        .await
        .map_err(|_| ClusterError::Timeout { operation, after })?
}

/// [`ResourceApi`] backed by the real API server.
pub struct KubeApi<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeApi<K> {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }
}

impl<K: ManagedResource> KubeApi<K> {
    fn namespaced(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn classify<K: ManagedResource>(err: kube::Error, key: &ObjectKey) -> ClusterError {
    match err {
        kube::Error::Api(resp) if resp.code == 404 => ClusterError::NotFound {
            kind: K::KIND,
            key: key.clone(),
        },
        kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
            ClusterError::AlreadyExists {
                kind: K::KIND,
                key: key.clone(),
            }
        }
        kube::Error::Api(resp) if resp.code == 409 => ClusterError::Conflict {
            kind: K::KIND,
            key: key.clone(),
            message: resp.message,
        },
        other => ClusterError::Api(other.to_string()),
    }
}

#[async_trait]
impl<K: ManagedResource> ResourceApi<K> for KubeApi<K> {
    async fn get(&self, key: &ObjectKey) -> Result<K, ClusterError> {
        self.namespaced(&key.namespace)
            .get(&key.name)
            .await
            .map_err(|e| classify::<K>(e, key))
    }

    async fn create(&self, obj: &K) -> Result<K, ClusterError> {
        let key = ObjectKey::of(obj);
        self.namespaced(&key.namespace)
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| classify::<K>(e, &key))
    }

    async fn replace(&self, obj: &K) -> Result<K, ClusterError> {
        let key = ObjectKey::of(obj);
        self.namespaced(&key.namespace)
            .replace(&key.name, &PostParams::default(), obj)
            .await
            .map_err(|e| classify::<K>(e, &key))
    }

    async fn replace_status(&self, obj: &K) -> Result<K, ClusterError> {
        let key = ObjectKey::of(obj);
        let body = serde_json::to_vec(obj)?;
        self.namespaced(&key.namespace)
            .replace_status(&key.name, &PostParams::default(), body)
            .await
            .map_err(|e| classify::<K>(e, &key))
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), ClusterError> {
        self.namespaced(&key.namespace)
            .delete(&key.name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| classify::<K>(e, key))
    }

    async fn list_keys(&self) -> Result<Vec<ObjectKey>, ClusterError> {
        let list = Api::<K>::all(self.client.clone())
            .list(&ListParams::default())
            .await
            .map_err(|e| ClusterError::Api(e.to_string()))?;
        Ok(list.items.iter().map(ObjectKey::of).collect())
    }
}

/// One API handle per kind the operator touches.
#[derive(Clone)]
pub struct Cluster {
    pub workspaces: Arc<dyn ResourceApi<Workspace>>,
    pub pods: Arc<dyn ResourceApi<Pod>>,
    pub pvcs: Arc<dyn ResourceApi<PersistentVolumeClaim>>,
}

impl Cluster {
    pub fn from_client(client: Client) -> Self {
        Self {
            workspaces: Arc::new(KubeApi::<Workspace>::new(client.clone())),
            pods: Arc::new(KubeApi::<Pod>::new(client.clone())),
            pvcs: Arc::new(KubeApi::<PersistentVolumeClaim>::new(client)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: format!("{reason} happened"),
            reason: reason.into(),
            code,
        })
    }

    #[test]
    fn test_classify_api_errors() {
        let key = ObjectKey::new("ns", "ws");
        assert!(classify::<Pod>(api_error(404, "NotFound"), &key).is_not_found());
        assert!(classify::<Pod>(api_error(409, "AlreadyExists"), &key).is_already_exists());
        assert!(classify::<Workspace>(api_error(409, "Conflict"), &key).is_conflict());
        assert!(matches!(
            classify::<Pod>(api_error(500, "InternalError"), &key),
            ClusterError::Api(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_reports_operation() {
        let result: Result<(), _> = with_timeout("delete pvc", PVC_DELETE_TIMEOUT, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert_eq!(
            result,
            Err(ClusterError::Timeout {
                operation: "delete pvc",
                after: PVC_DELETE_TIMEOUT
            })
        );
    }

    #[test]
    fn test_object_key_display() {
        assert_eq!(ObjectKey::new("team-a", "dev-1").to_string(), "team-a/dev-1");
    }
}
