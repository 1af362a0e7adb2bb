//! Child resources backing a workspace: one Pod and one PVC, both named
//! after the workspace and living in its namespace.
//!
//! Creates treat already-exists as success, deletes treat not-found as
//! success, so every operation here can be repeated safely.

mod pod;
mod pvc;

pub use pod::PodProvisioner;
pub use pvc::PvcProvisioner;

use std::{collections::BTreeMap, time::Duration};

use crate::{
    cluster::{with_timeout, ManagedResource, ObjectKey, ResourceApi, GET_TIMEOUT},
    error::ProvisionError,
};

/// Label put on every Pod and PVC the operator owns.
pub const APP_LABEL: (&str, &str) = ("app", "cloud-ide");

/// Name of the Pod volume that mounts the workspace PVC.
pub const VOLUME_NAME: &str = "volume-user-workspace";

pub(crate) fn labels() -> BTreeMap<String, String> {
    BTreeMap::from([(APP_LABEL.0.to_string(), APP_LABEL.1.to_string())])
}

pub(crate) async fn exists<K: ManagedResource>(
    api: &dyn ResourceApi<K>,
    key: &ObjectKey,
) -> Result<bool, ProvisionError> {
    Ok(with_timeout("get resource", GET_TIMEOUT, api.get_opt(key)).await?.is_some())
}

pub(crate) async fn create_tolerant<K: ManagedResource>(
    api: &dyn ResourceApi<K>,
    obj: &K,
    operation: &'static str,
    after: Duration,
) -> Result<(), ProvisionError> {
    match with_timeout(operation, after, api.create(obj)).await {
        Ok(_) => Ok(()),
        Err(e) if e.is_already_exists() => Ok(()),
        Err(e) => Err(e.into()),
    }
}

pub(crate) async fn delete_tolerant<K: ManagedResource>(
    api: &dyn ResourceApi<K>,
    key: &ObjectKey,
    operation: &'static str,
    after: Duration,
) -> Result<(), ProvisionError> {
    match with_timeout(operation, after, api.delete(key)).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e.into()),
    }
}
