use std::{collections::BTreeMap, sync::Arc};

use k8s_openapi::{
    api::core::v1::{
        Container, ContainerPort, PersistentVolumeClaimVolumeSource, Pod, PodSpec, ResourceRequirements, Volume,
        VolumeMount,
    },
    apimachinery::pkg::{api::resource::Quantity, apis::meta::v1::ObjectMeta},
};
use tracing::{debug, instrument};

use super::{create_tolerant, delete_tolerant, exists, labels, VOLUME_NAME};
use crate::{
    cluster::{ObjectKey, ResourceApi, CREATE_TIMEOUT, POD_DELETE_TIMEOUT},
    config::RuntimeMode,
    crd::Workspace,
    error::ProvisionError,
    quantity,
};

/// Creates and removes the Pod running a workspace's IDE container.
#[derive(Clone)]
pub struct PodProvisioner {
    api: Arc<dyn ResourceApi<Pod>>,
    mode: RuntimeMode,
}

impl PodProvisioner {
    pub fn new(api: Arc<dyn ResourceApi<Pod>>, mode: RuntimeMode) -> Self {
        Self { api, mode }
    }

    pub async fn exists(&self, key: &ObjectKey) -> Result<bool, ProvisionError> {
        exists(self.api.as_ref(), key).await
    }

    #[instrument(skip_all, fields(workspace = %workspace.key()))]
    pub async fn create(&self, workspace: &Workspace) -> Result<(), ProvisionError> {
        let pod = self.build(workspace)?;
        create_tolerant(self.api.as_ref(), &pod, "create pod", CREATE_TIMEOUT).await?;
        debug!("pod created");
        Ok(())
    }

    #[instrument(skip_all, fields(workspace = %key))]
    pub async fn delete(&self, key: &ObjectKey) -> Result<(), ProvisionError> {
        delete_tolerant(self.api.as_ref(), key, "delete pod", POD_DELETE_TIMEOUT).await
    }

    /// Pod for `workspace`: one container, the PVC mounted at the workspace's
    /// mount path, and resource bounds only when running in release mode.
    pub fn build(&self, workspace: &Workspace) -> Result<Pod, ProvisionError> {
        let key = workspace.key();
        let spec = &workspace.spec;

        let resources = match self.mode {
            RuntimeMode::Release => {
                let bounds = BTreeMap::from([
                    ("cpu".to_string(), checked(&key, "cpu", &spec.cpu)?),
                    ("memory".to_string(), checked(&key, "memory", &spec.memory)?),
                ]);
                Some(ResourceRequirements {
                    requests: Some(bounds.clone()),
                    limits: Some(bounds),
                    ..Default::default()
                })
            }
            RuntimeMode::Dev => None,
        };

        Ok(Pod {
            metadata: ObjectMeta {
                name: Some(key.name.clone()),
                namespace: Some(key.namespace.clone()),
                labels: Some(labels()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                volumes: Some(vec![Volume {
                    name: VOLUME_NAME.to_string(),
                    persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                        claim_name: key.name.clone(),
                        read_only: Some(false),
                    }),
                    ..Default::default()
                }]),
                containers: vec![Container {
                    name: key.name.clone(),
                    image: Some(spec.image.clone()),
                    image_pull_policy: Some("IfNotPresent".to_string()),
                    ports: Some(vec![ContainerPort {
                        container_port: spec.port,
                        ..Default::default()
                    }]),
                    volume_mounts: Some(vec![VolumeMount {
                        name: VOLUME_NAME.to_string(),
                        mount_path: spec.mount_path.clone(),
                        read_only: Some(false),
                        ..Default::default()
                    }]),
                    resources,
                    ..Default::default()
                }],
                ..Default::default()
            }),
            ..Default::default()
        })
    }
}

fn checked(key: &ObjectKey, field: &'static str, value: &str) -> Result<Quantity, ProvisionError> {
    quantity::parse(value).ok_or_else(|| ProvisionError::InvalidQuantity {
        key: key.clone(),
        field,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        crd::WorkspaceSpec,
        error::ClusterError,
        memory::{MemoryApi, Verb},
    };

    fn workspace(cpu: &str, memory: &str) -> Workspace {
        Workspace::with_key(
            &ObjectKey::new("team-a", "dev-1"),
            WorkspaceSpec {
                cpu: cpu.into(),
                memory: memory.into(),
                storage: "10Gi".into(),
                image: "codercom/code-server:latest".into(),
                port: 8080,
                mount_path: "/home/coder".into(),
                ..Default::default()
            },
        )
    }

    fn setup(mode: RuntimeMode) -> (Arc<MemoryApi<Pod>>, PodProvisioner) {
        let api = Arc::new(MemoryApi::<Pod>::new());
        let provisioner = PodProvisioner::new(api.clone(), mode);
        (api, provisioner)
    }

    #[test]
    fn test_dev_pod_shape() {
        let (_, provisioner) = setup(RuntimeMode::Dev);
        let pod = provisioner.build(&workspace("2", "4Gi")).unwrap();

        assert_eq!(pod.metadata.labels.unwrap()["app"], "cloud-ide");
        let spec = pod.spec.unwrap();
        let container = &spec.containers[0];
        assert_eq!(container.name, "dev-1");
        assert_eq!(container.image_pull_policy.as_deref(), Some("IfNotPresent"));
        assert_eq!(container.ports.as_ref().unwrap()[0].container_port, 8080);
        assert_eq!(container.volume_mounts.as_ref().unwrap()[0].mount_path, "/home/coder");
        assert!(container.resources.is_none());

        let volumes = spec.volumes.unwrap();
        let volume = &volumes[0];
        assert_eq!(volume.name, VOLUME_NAME);
        assert_eq!(volume.persistent_volume_claim.as_ref().unwrap().claim_name, "dev-1");
    }

    #[test]
    fn test_release_pod_is_bounded_by_spec() {
        let (_, provisioner) = setup(RuntimeMode::Release);
        let pod = provisioner.build(&workspace("2", "4Gi")).unwrap();
        let resources = pod.spec.unwrap().containers[0].resources.clone().unwrap();
        let limits = resources.limits.unwrap();

        assert_eq!(limits["cpu"], Quantity("2".into()));
        assert_eq!(limits["memory"], Quantity("4Gi".into()));
        assert_eq!(resources.requests.unwrap(), limits);
    }

    #[test]
    fn test_release_rejects_bad_quantity() {
        let (_, provisioner) = setup(RuntimeMode::Release);
        let err = provisioner.build(&workspace("two", "4Gi")).unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidQuantity { field: "cpu", .. }));

        // dev mode never looks at the quantities
        let (_, provisioner) = setup(RuntimeMode::Dev);
        assert!(provisioner.build(&workspace("two", "4Gi")).is_ok());
    }

    #[tokio::test]
    async fn test_create_and_delete_are_idempotent() {
        let (api, provisioner) = setup(RuntimeMode::Dev);
        let ws = workspace("2", "4Gi");
        let key = ws.key();

        provisioner.create(&ws).await.unwrap();
        provisioner.create(&ws).await.unwrap();
        assert!(provisioner.exists(&key).await.unwrap());
        assert_eq!(api.len(), 1);

        provisioner.delete(&key).await.unwrap();
        provisioner.delete(&key).await.unwrap();
        assert!(!provisioner.exists(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_surfaces_other_errors() {
        let (api, provisioner) = setup(RuntimeMode::Dev);
        api.fail_next(Verb::Delete, ClusterError::Api("etcd unavailable".into()));

        let err = provisioner.delete(&ObjectKey::new("team-a", "dev-1")).await.unwrap_err();
        assert_eq!(err, ProvisionError::Cluster(ClusterError::Api("etcd unavailable".into())));
    }
}
