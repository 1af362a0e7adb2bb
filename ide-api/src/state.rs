use ide_operator::{Cluster, WorkspaceService};

#[derive(Clone)]
pub struct AppState {
    pub service: WorkspaceService,
}

impl AppState {
    pub fn new(cluster: &Cluster) -> Self {
        Self {
            service: WorkspaceService::new(cluster),
        }
    }

    pub fn with_service(service: WorkspaceService) -> Self {
        Self { service }
    }
}
