use ide_operator::messages::{
    EmptyResponse, PodSpaceStatus, QueryOption, ResourceLimit, WorkspaceInfo, WorkspaceRunningInfo,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::health::health_check,
        crate::routes::spaces::create_space,
        crate::routes::spaces::start_space,
        crate::routes::spaces::stop_space,
        crate::routes::spaces::delete_space,
        crate::routes::spaces::get_pod_space_status,
        crate::routes::spaces::get_pod_space_info,
    ),
    components(
        schemas(
            WorkspaceInfo,
            ResourceLimit,
            QueryOption,
            WorkspaceRunningInfo,
            PodSpaceStatus,
            EmptyResponse
        )
    ),
    tags(
        (name = "ide-api", description = "Cloud IDE workspace service")
    )
)]
pub struct ApiDoc;
