use std::time::Duration;

use thiserror::Error;

use crate::cluster::ObjectKey;

/// Failures talking to the cluster API, already classified into the cases
/// the reconciler and service treat differently.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClusterError {
    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: ObjectKey },

    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: &'static str, key: ObjectKey },

    #[error("conflict writing {kind} {key}: {message}")]
    Conflict {
        kind: &'static str,
        key: ObjectKey,
        message: String,
    },

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("API error: {0}")]
    Api(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, ClusterError::AlreadyExists { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ClusterError::Conflict { .. })
    }
}

impl From<serde_json::Error> for ClusterError {
    fn from(err: serde_json::Error) -> Self {
        ClusterError::Serialization(err.to_string())
    }
}

/// Failures building or applying a Pod or PVC.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProvisionError {
    #[error("invalid {field} quantity {value:?} for {key}")]
    InvalidQuantity {
        key: ObjectKey,
        field: &'static str,
        value: String,
    },

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

/// A reconciliation that must be retried later.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("failed to read workspace {key}: {source}")]
    Fetch { key: ObjectKey, source: ClusterError },

    #[error("failed to delete pod for {key}: {source}")]
    DeletePod { key: ObjectKey, source: ProvisionError },

    #[error("failed to delete pvc for {key}: {source}")]
    DeletePvc { key: ObjectKey, source: ProvisionError },

    #[error("failed to create pvc for {key}: {source}")]
    CreatePvc { key: ObjectKey, source: ProvisionError },

    #[error("failed to create pod for {key}: {source}")]
    CreatePod { key: ObjectKey, source: ProvisionError },
}

pub const WORKSPACE_ALREADY_EXIST: &str = "workspace already exist";
pub const WORKSPACE_CREATE_FAILED: &str = "create workspace error";
pub const WORKSPACE_NOT_EXIST: &str = "workspace not exist";
pub const WORKSPACE_START_FAILED: &str = "start workspace error";
pub const WORKSPACE_DELETE_FAILED: &str = "delete workspace error";
pub const WORKSPACE_QUERY_FAILED: &str = "query workspace error";

/// Coarse status codes returned to remote callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
    AlreadyExists,
    NotFound,
    Internal,
    Unknown,
    Unimplemented,
}

impl Code {
    pub fn as_str(&self) -> &'static str {
        match self {
            Code::AlreadyExists => "AlreadyExists",
            Code::NotFound => "NotFound",
            Code::Internal => "Internal",
            Code::Unknown => "Unknown",
            Code::Unimplemented => "Unimplemented",
        }
    }
}

/// Errors surfaced by the workspace service. The message is deliberately
/// coarse; the underlying cause is only logged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("{}", WORKSPACE_ALREADY_EXIST)]
    AlreadyExists,

    #[error("{}", WORKSPACE_NOT_EXIST)]
    NotFound,

    #[error("{0}")]
    Internal(&'static str),

    #[error("{0}")]
    Unknown(String),

    #[error("method {0} not implemented")]
    Unimplemented(String),
}

impl ServiceError {
    pub fn code(&self) -> Code {
        match self {
            ServiceError::AlreadyExists => Code::AlreadyExists,
            ServiceError::NotFound => Code::NotFound,
            ServiceError::Internal(_) => Code::Internal,
            ServiceError::Unknown(_) => Code::Unknown,
            ServiceError::Unimplemented(_) => Code::Unimplemented,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_error_classification() {
        let key = ObjectKey::new("ns", "ws");
        let not_found = ClusterError::NotFound {
            kind: "Pod",
            key: key.clone(),
        };
        assert!(not_found.is_not_found());
        assert!(!not_found.is_conflict());
        assert_eq!(not_found.to_string(), "Pod ns/ws not found");

        let exists = ClusterError::AlreadyExists { kind: "PersistentVolumeClaim", key };
        assert!(exists.is_already_exists());
    }

    #[test]
    fn test_service_error_codes_and_messages() {
        assert_eq!(ServiceError::AlreadyExists.code(), Code::AlreadyExists);
        assert_eq!(ServiceError::AlreadyExists.to_string(), "workspace already exist");
        assert_eq!(ServiceError::NotFound.to_string(), "workspace not exist");
        assert_eq!(
            ServiceError::Internal(WORKSPACE_START_FAILED).to_string(),
            "start workspace error"
        );
        assert_eq!(ServiceError::Unknown("boom".into()).code().as_str(), "Unknown");
    }
}
