//! The `WorkSpace` custom resource.
//!
//! Only `spec.operation` is interpreted as an action by the reconciler; the
//! remaining spec fields describe the Pod and PVC that back the workspace.
//! Quantity strings are stored verbatim and validated when they are used.

use std::fmt;

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::cluster::ObjectKey;

pub const API_GROUP: &str = "cloud-ide.mangohow.com";

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "cloud-ide.mangohow.com",
    version = "v1",
    kind = "WorkSpace",
    root = "Workspace",
    plural = "workspaces",
    namespaced,
    status = "WorkspaceStatus",
    printcolumn = r#"{"name":"Status", "type":"string", "jsonPath":".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSpec {
    /// CPU limit, e.g. `2` or `500m`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cpu: String,

    /// Memory limit, e.g. `4Gi`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub memory: String,

    /// Size of the persistent volume, e.g. `10Gi`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub storage: String,

    /// Human readable summary (`2C4G10G`) shown by `kubectl get`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hardware: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,

    /// Port the IDE server listens on inside the container.
    #[serde(default)]
    pub port: i32,

    pub mount_path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub operation: Option<Operation>,
}

impl WorkspaceSpec {
    /// Builds the `hardware` summary: cpu, `C`, then memory and storage with
    /// their binary suffix cut at the `i` (`4Gi` -> `4G`).
    pub fn hardware_label(cpu: &str, memory: &str, storage: &str) -> String {
        let trim = |q: &str| q.split('i').next().unwrap_or_default().to_string();
        format!("{cpu}C{}{}", trim(memory), trim(storage))
    }
}

/// Declared intent for a workspace.
///
/// Values other than `Start` and `Stop` are kept as `Unknown` so a typo in a
/// manifest reconciles to a no-op instead of breaking deserialization.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Operation {
    Start,
    Stop,
    Unknown(String),
}

impl From<String> for Operation {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "Start" => Self::Start,
            "Stop" => Self::Stop,
            _ => Self::Unknown(raw),
        }
    }
}

impl From<Operation> for String {
    fn from(op: Operation) -> Self {
        op.to_string()
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Start => write!(f, "Start"),
            Operation::Stop => write!(f, "Stop"),
            Operation::Unknown(raw) => write!(f, "{raw}"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Phase {
    Running,
    Stopped,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Running => write!(f, "Running"),
            Phase::Stopped => write!(f, "Stopped"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WorkspaceStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
}

impl Workspace {
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace().unwrap_or_default(), self.name_any())
    }

    /// Builds a namespaced workspace object ready to be created.
    pub fn with_key(key: &ObjectKey, spec: WorkspaceSpec) -> Self {
        let mut workspace = Workspace::new(&key.name, spec);
        workspace.metadata.namespace = Some(key.namespace.clone());
        workspace
    }

    pub fn phase(&self) -> Option<Phase> {
        self.status.as_ref().and_then(|s| s.phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operation_round_trips_known_values() {
        let op: Operation = serde_json::from_value(json!("Start")).unwrap();
        assert_eq!(op, Operation::Start);
        assert_eq!(serde_json::to_value(Operation::Stop).unwrap(), json!("Stop"));
    }

    #[test]
    fn test_operation_keeps_unknown_values() {
        let op: Operation = serde_json::from_value(json!("Restart")).unwrap();
        assert_eq!(op, Operation::Unknown("Restart".to_string()));
        assert_eq!(serde_json::to_value(op).unwrap(), json!("Restart"));
    }

    #[test]
    fn test_hardware_label() {
        assert_eq!(WorkspaceSpec::hardware_label("2", "4Gi", "10Gi"), "2C4G10G");
        assert_eq!(WorkspaceSpec::hardware_label("1", "512M", "1G"), "1C512M1G");
    }

    #[test]
    fn test_workspace_wire_shape() {
        let key = ObjectKey::new("team-a", "dev-1");
        let spec = WorkspaceSpec {
            cpu: "2".into(),
            memory: "4Gi".into(),
            storage: "10Gi".into(),
            image: "codercom/code-server:latest".into(),
            port: 8080,
            mount_path: "/home/coder".into(),
            operation: Some(Operation::Start),
            ..Default::default()
        };
        let workspace = Workspace::with_key(&key, spec);
        let value = serde_json::to_value(&workspace).unwrap();

        assert_eq!(value["apiVersion"], format!("{API_GROUP}/v1"));
        assert_eq!(value["kind"], "WorkSpace");
        assert_eq!(value["metadata"]["namespace"], "team-a");
        assert_eq!(value["spec"]["mountPath"], "/home/coder");
        assert_eq!(value["spec"]["operation"], "Start");
        assert_eq!(workspace.key(), key);
        assert_eq!(workspace.phase(), None);
    }

    #[test]
    fn test_crd_definition() {
        use kube::CustomResourceExt;

        let crd = Workspace::crd();
        assert_eq!(crd.metadata.name.as_deref(), Some("workspaces.cloud-ide.mangohow.com"));
        assert_eq!(crd.spec.group, API_GROUP);
        assert_eq!(crd.spec.names.kind, "WorkSpace");
        assert_eq!(crd.spec.scope, "Namespaced");

        let version = &crd.spec.versions[0];
        assert_eq!(version.name, "v1");
        assert!(version.subresources.as_ref().and_then(|s| s.status.as_ref()).is_some());
    }
}
