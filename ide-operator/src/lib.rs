//! Cloud IDE workspace operator
//!
//! Keeps one Pod and one PVC per `WorkSpace` custom resource in line with the
//! workspace's declared operation, and exposes the service used by remote
//! callers to create, start, stop, delete and inspect workspaces.
//!
//! The binary in `ide-api` wires a [`Controller`] to live watches and serves
//! [`WorkspaceService`] over HTTP. Everything here talks to the cluster
//! through [`cluster::ResourceApi`], so it can run against the in-memory
//! cluster in `memory` (feature `test-utils`).

pub mod cluster;
pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod messages;
pub mod poller;
pub mod provision;
pub mod quantity;
pub mod reconciler;
pub mod service;
pub mod status;

#[cfg(any(test, feature = "test-utils"))]
pub mod memory;

pub use cluster::{Cluster, ObjectKey};
pub use config::{OperatorConfig, RuntimeMode};
pub use controller::{kube_triggers, Controller, ResourceKind, WatchEvent, WorkQueue};
pub use crd::{Operation, Phase, Workspace, WorkspaceSpec, WorkspaceStatus};
pub use error::{ClusterError, Code, ProvisionError, ReconcileError, ServiceError};
pub use poller::{ReadinessPoller, RetryPolicy};
pub use reconciler::{Action, Reconciler};
pub use service::WorkspaceService;
pub use status::{ConflictRetry, StatusUpdater};
