//! Request and response bodies of the workspace service.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::cluster::ObjectKey;

/// Pod status value reported when no Pod exists for the workspace.
pub const POD_NOT_EXIST: i32 = 0;
/// Pod status value reported when the Pod exists, whatever its phase.
pub const POD_EXIST: i32 = 1;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLimit {
    #[serde(default)]
    pub cpu: String,
    #[serde(default)]
    pub memory: String,
    #[serde(default)]
    pub storage: String,
}

/// Everything needed to create a workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceInfo {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub port: i32,
    #[serde(default)]
    pub volume_mount_path: String,
    #[serde(default)]
    pub resource_limit: ResourceLimit,
}

impl WorkspaceInfo {
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueryOption {
    pub name: String,
    pub namespace: String,
}

impl QueryOption {
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }
}

/// Where a running workspace can be reached.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceRunningInfo {
    pub node_name: String,
    pub ip: String,
    pub port: i32,
}

/// Pod-level view of a workspace. `status` is [`POD_EXIST`] or
/// [`POD_NOT_EXIST`]; `phase` and `message` are copied from the Pod.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodSpaceStatus {
    pub status: i32,
    #[serde(default)]
    pub phase: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct EmptyResponse {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_workspace_info_wire_names() {
        let info: WorkspaceInfo = serde_json::from_value(json!({
            "name": "dev-1",
            "namespace": "team-a",
            "image": "codercom/code-server:latest",
            "port": 8080,
            "volumeMountPath": "/home/coder",
            "resourceLimit": { "cpu": "2", "memory": "4Gi", "storage": "10Gi" }
        }))
        .unwrap();

        assert_eq!(info.key(), ObjectKey::new("team-a", "dev-1"));
        assert_eq!(info.volume_mount_path, "/home/coder");
        assert_eq!(info.resource_limit.storage, "10Gi");
    }

    #[test]
    fn test_running_info_serializes_camel_case() {
        let info = WorkspaceRunningInfo {
            node_name: "node-1".into(),
            ip: "10.0.0.7".into(),
            port: 8080,
        };
        assert_eq!(
            serde_json::to_value(info).unwrap(),
            json!({ "nodeName": "node-1", "ip": "10.0.0.7", "port": 8080 })
        );
    }
}
