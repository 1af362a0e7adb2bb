use std::{collections::BTreeMap, sync::Arc};

use k8s_openapi::{
    api::core::v1::{PersistentVolumeClaim, PersistentVolumeClaimSpec, VolumeResourceRequirements},
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
use tracing::{debug, instrument};

use super::{create_tolerant, delete_tolerant, exists, labels};
use crate::{
    cluster::{ObjectKey, ResourceApi, CREATE_TIMEOUT, PVC_DELETE_TIMEOUT},
    crd::Workspace,
    error::ProvisionError,
    quantity,
};

/// Creates and removes the claim holding a workspace's files.
#[derive(Clone)]
pub struct PvcProvisioner {
    api: Arc<dyn ResourceApi<PersistentVolumeClaim>>,
}

impl PvcProvisioner {
    pub fn new(api: Arc<dyn ResourceApi<PersistentVolumeClaim>>) -> Self {
        Self { api }
    }

    pub async fn exists(&self, key: &ObjectKey) -> Result<bool, ProvisionError> {
        exists(self.api.as_ref(), key).await
    }

    /// Fails with [`ProvisionError::InvalidQuantity`] before touching the
    /// API when the storage size is malformed.
    #[instrument(skip_all, fields(workspace = %workspace.key()))]
    pub async fn create(&self, workspace: &Workspace) -> Result<(), ProvisionError> {
        let pvc = build(workspace)?;
        create_tolerant(self.api.as_ref(), &pvc, "create pvc", CREATE_TIMEOUT).await?;
        debug!("pvc created");
        Ok(())
    }

    #[instrument(skip_all, fields(workspace = %key))]
    pub async fn delete(&self, key: &ObjectKey) -> Result<(), ProvisionError> {
        delete_tolerant(self.api.as_ref(), key, "delete pvc", PVC_DELETE_TIMEOUT).await
    }
}

pub fn build(workspace: &Workspace) -> Result<PersistentVolumeClaim, ProvisionError> {
    let key = workspace.key();
    let storage = quantity::parse(&workspace.spec.storage).ok_or_else(|| ProvisionError::InvalidQuantity {
        key: key.clone(),
        field: "storage",
        value: workspace.spec.storage.clone(),
    })?;
    let size = BTreeMap::from([("storage".to_string(), storage)]);

    Ok(PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(key.name),
            namespace: Some(key.namespace),
            labels: Some(labels()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteMany".to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(size.clone()),
                limits: Some(size),
            }),
            ..Default::default()
        }),
        ..Default::default()
    })
}
